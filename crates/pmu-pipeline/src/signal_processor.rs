//! One section of the processing chain.
//!
//! ```text
//!                      ┌─> AnalyticProcessor #1 ─┐
//! input ──> look-ahead ┼─> AnalyticProcessor #2 ─┼──> merge (declaration order) ──> output
//!                      └─> AnalyticProcessor #n ─┘
//! ```
//!
//! Every processor sees the same immutable frame and candidate window. Results
//! are merged serially onto a fresh copy of the input frame under the section's
//! conflict policy, so frame order is preserved end to end.

use futures::future::join_all;
use parking_lot::Mutex;
use pmu_core::{
    AnalyticRegistry, ConflictPolicy, Frame, Measurement, MessageBus, PmuError, PmuResult, Ticks,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::analytic_processor::{AnalyticProcessor, SignalRates};
use crate::cancel::CancelSignal;
use crate::config::SectionTemplate;

/// Counters reported by a section when its input closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectionStats {
    /// Frames received.
    pub frames_in: u64,
    /// Frames forwarded, completion frame included.
    pub frames_out: u64,
    /// Analytic outputs merged into frames.
    pub values_routed: u64,
    /// Analytic outputs without a route.
    pub values_unrouted: u64,
    /// Analytic outputs refused by the conflict policy.
    pub conflicts_rejected: u64,
}

/// A section: analytics run side by side on every frame.
pub struct SignalProcessor {
    name: String,
    processors: Vec<Arc<Mutex<AnalyticProcessor>>>,
    lookahead: usize,
    policy: ConflictPolicy,
    messages: MessageBus,
}

impl SignalProcessor {
    /// Build every analytic of `template`. Rates of the keys it produces are
    /// recorded in `rates` for the sections after it.
    pub fn new(
        template: &SectionTemplate,
        registry: &AnalyticRegistry,
        rates: &mut SignalRates,
        messages: MessageBus,
    ) -> Self {
        let mut processors = Vec::with_capacity(template.analytics.len());
        for analytic in &template.analytics {
            let processor = AnalyticProcessor::new(analytic, registry, rates, messages.clone());
            processors.push(processor);
        }
        for processor in &processors {
            for (key, rate) in processor.output_rates() {
                rates.insert(key.clone(), *rate);
            }
        }
        Self::from_processors(&template.name, processors, template.conflict_policy, messages)
    }

    /// Section over already built processors.
    pub fn from_processors(
        name: &str,
        processors: Vec<AnalyticProcessor>,
        policy: ConflictPolicy,
        messages: MessageBus,
    ) -> Self {
        let lookahead = processors
            .iter()
            .map(AnalyticProcessor::future_frames)
            .max()
            .unwrap_or(0);
        Self {
            name: name.to_string(),
            processors: processors
                .into_iter()
                .map(|p| Arc::new(Mutex::new(p)))
                .collect(),
            lookahead,
            policy,
            messages,
        }
    }

    /// Section label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames buffered ahead of the one being processed.
    pub fn lookahead(&self) -> usize {
        self.lookahead
    }

    /// Consume `input` until it closes, forwarding one frame per input frame
    /// plus a final completion frame when analytics flush pending output.
    /// `output` is dropped (closed) on return.
    pub async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<Frame>,
        output: mpsc::UnboundedSender<Frame>,
        mut cancel: CancelSignal,
    ) -> PmuResult<SectionStats> {
        let mut stats = SectionStats::default();
        let mut window: VecDeque<Arc<Frame>> = VecDeque::with_capacity(self.lookahead + 1);
        let mut cutoff = Ticks::MIN;

        tracing::info!(
            section = %self.name,
            analytics = self.processors.len(),
            lookahead = self.lookahead,
            "section started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PmuError::Cancelled),
                frame = input.recv() => frame,
            };
            let Some(frame) = next else { break };
            stats.frames_in += 1;
            window.push_back(Arc::new(frame));
            if window.len() > self.lookahead {
                cutoff = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PmuError::Cancelled),
                    processed = self.process_front(&mut window, &output, &mut stats) => processed?,
                };
            }
        }

        while !window.is_empty() {
            cutoff = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PmuError::Cancelled),
                processed = self.process_front(&mut window, &output, &mut stats) => processed?,
            };
        }

        if stats.frames_in > 0 {
            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PmuError::Cancelled),
                completion = self.complete(cutoff, &mut stats) => completion?,
            };
            if !completion.is_empty() {
                self.send(&output, completion, &mut stats)?;
            }
        }

        tracing::info!(
            section = %self.name,
            frames_in = stats.frames_in,
            frames_out = stats.frames_out,
            routed = stats.values_routed,
            "section finished"
        );
        Ok(stats)
    }

    /// Process the oldest buffered frame against the frames after it.
    async fn process_front(
        &self,
        window: &mut VecDeque<Arc<Frame>>,
        output: &mpsc::UnboundedSender<Frame>,
        stats: &mut SectionStats,
    ) -> PmuResult<Ticks> {
        let Some(current) = window.pop_front() else {
            return Ok(Ticks::MIN);
        };
        let candidates: Arc<[Arc<Frame>]> = window.iter().cloned().collect();

        let tasks = self.processors.iter().map(|processor| {
            let processor = Arc::clone(processor);
            let frame = Arc::clone(&current);
            let candidates = Arc::clone(&candidates);
            tokio::task::spawn_blocking(move || processor.lock().run(&frame, &candidates))
        });
        let results = join_all(tasks).await;

        let mut out = Frame::clone(&current);
        for (processor, result) in self.processors.iter().zip(results) {
            let produced = result.map_err(|e| PmuError::TaskFailed(format!("{}: {e}", self.name)))?;
            self.route(processor, produced, &mut out, stats);
        }
        let timestamp = out.timestamp;
        self.send(output, out, stats)?;
        Ok(timestamp)
    }

    /// Flush every analytic's pending output into one frame stamped `cutoff`.
    async fn complete(&self, cutoff: Ticks, stats: &mut SectionStats) -> PmuResult<Frame> {
        let tasks = self.processors.iter().map(|processor| {
            let processor = Arc::clone(processor);
            tokio::task::spawn_blocking(move || processor.lock().complete(cutoff))
        });
        let results = join_all(tasks).await;

        let mut out = Frame::new(cutoff);
        out.published = true;
        for (processor, result) in self.processors.iter().zip(results) {
            let produced = result.map_err(|e| PmuError::TaskFailed(format!("{}: {e}", self.name)))?;
            self.route(processor, produced, &mut out, stats);
        }
        if !out.is_empty() {
            self.messages.info(
                &self.name,
                format!("completion frame carries {} pending outputs", out.len()),
            );
        }
        Ok(out)
    }

    fn route(
        &self,
        processor: &Mutex<AnalyticProcessor>,
        produced: Vec<Measurement>,
        out: &mut Frame,
        stats: &mut SectionStats,
    ) {
        if produced.is_empty() {
            return;
        }
        let counts = processor.lock().route_output(produced, out, self.policy);
        stats.values_routed += counts.routed;
        stats.values_unrouted += counts.unrouted;
        stats.conflicts_rejected += counts.rejected;
    }

    fn send(
        &self,
        output: &mpsc::UnboundedSender<Frame>,
        frame: Frame,
        stats: &mut SectionStats,
    ) -> PmuResult<()> {
        output
            .send(frame)
            .map_err(|_| PmuError::ChannelClosed(format!("section '{}' output", self.name)))?;
        stats.frames_out += 1;
        Ok(())
    }
}
