//! Run orchestration.
//!
//! ```text
//! FrameSource ──> section 1 ──> … ──> section n ──> drain ──┬─> writer "F.avg"
//!   (reader)                                                ├─> writer "F/excursion"
//!                                                           └─> …
//! ```
//!
//! Every arrow is an unbounded, order-preserving queue. Closing the source
//! queue cascades down the chain until every writer has flushed and rebuilt
//! its index. The first stage to fail reports on the [`MessageBus`] and
//! cancels the others.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pmu_core::{AnalyticRegistry, Frame, Measurement, MessageBus, PmuError, PmuResult, SignalKey};
use pmu_storage::WriterStats;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::analytic_processor::SignalRates;
use crate::analytics::builtin_registry;
use crate::cancel::{CancelHandle, CancelSignal};
use crate::config::PipelineConfig;
use crate::signal_processor::{SectionStats, SignalProcessor};
use crate::sink::SignalSink;
use crate::source::{FrameSource, SourceRegistry};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// The source was exhausted and every writer finalized its tree.
    Completed,
    /// Cancelled through the [`CancelHandle`].
    Cancelled,
    /// A stage failed; see [`RunReport::faults`].
    Faulted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Completed => f.write_str("completed"),
            RunState::Cancelled => f.write_str("cancelled"),
            RunState::Faulted => f.write_str("faulted"),
        }
    }
}

/// Outcome of one [`TaskProcessor::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// How the run ended.
    pub state: RunState,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
    /// Frames produced by the source.
    pub frames_read: u64,
    /// Frames that reached the writer stage, completion frames included.
    pub frames_forwarded: u64,
    /// Measurements handed to a writer.
    pub values_routed: u64,
    /// Measurements with no configured output signal.
    pub values_unrouted: u64,
    /// Per-section counters, in chain order. Sections stopped by a fault or
    /// cancellation are missing.
    pub sections: Vec<(String, SectionStats)>,
    /// Final counters of every writer that finalized its tree.
    pub writers: BTreeMap<SignalKey, WriterStats>,
    /// Error messages of failed stages, first failure first.
    pub faults: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct DrainCounts {
    frames: u64,
    routed: u64,
    unrouted: u64,
}

/// Builds and runs the stage graph described by a [`PipelineConfig`].
pub struct TaskProcessor {
    config: PipelineConfig,
    analytics: Arc<AnalyticRegistry>,
    sources: Arc<SourceRegistry>,
    messages: MessageBus,
    cancel: CancelHandle,
}

impl TaskProcessor {
    /// Processor over the given registries.
    pub fn new(
        config: PipelineConfig,
        analytics: Arc<AnalyticRegistry>,
        sources: Arc<SourceRegistry>,
    ) -> Self {
        Self {
            config,
            analytics,
            sources,
            messages: MessageBus::default(),
            cancel: CancelHandle::new(),
        }
    }

    /// Processor using only the built-in analytics and sources.
    pub fn with_builtins(config: PipelineConfig) -> Self {
        Self::new(
            config,
            Arc::new(builtin_registry()),
            Arc::new(SourceRegistry::with_builtins()),
        )
    }

    /// Publish messages on `messages` instead of a private bus.
    pub fn with_message_bus(mut self, messages: MessageBus) -> Self {
        self.messages = messages;
        self
    }

    /// Channel carrying every info/warning/error message of the run.
    pub fn messages(&self) -> MessageBus {
        self.messages.clone()
    }

    /// Handle that cancels the run from outside.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Execute the run to completion.
    ///
    /// Returns `Err` only when the run cannot start: invalid configuration or
    /// an unavailable source. Failures after that are reported in the
    /// [`RunReport`] with [`RunState::Faulted`].
    pub async fn run(self) -> PmuResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = tracing::info_span!("run", %run_id, app = %self.config.application.name);

        self.config.validate()?;
        let source = match self.sources.create(&self.config.source) {
            Ok(source) => source,
            Err(e) => {
                self.messages.error("source", e.to_string());
                return Err(e);
            }
        };

        let base_rate = if self.config.source.frames_per_second > 0.0 {
            self.config.source.frames_per_second
        } else {
            source.frames_per_second()
        };
        let mut rates = SignalRates::new(base_rate);
        let sections: Vec<SignalProcessor> = self
            .config
            .sections
            .iter()
            .map(|template| {
                SignalProcessor::new(template, &self.analytics, &mut rates, self.messages.clone())
            })
            .collect();

        let supervisor = Supervisor {
            messages: self.messages.clone(),
            cancel: self.cancel.clone(),
            faults: Arc::new(Mutex::new(Vec::new())),
        };

        // Writers first so nothing is produced before its consumer exists.
        let mut writer_queues = HashMap::new();
        let mut writers = Vec::with_capacity(self.config.outputs.len());
        for output in &self.config.outputs {
            let sink = SignalSink::for_output(
                output,
                &self.config.storage.root,
                self.config.storage.out_of_order_capacity,
            );
            let (tx, rx) = mpsc::unbounded_channel::<Measurement>();
            writer_queues.insert(output.key.clone(), tx);
            let key = output.key.clone();
            let signal = self.cancel.signal();
            let task = supervisor.spawn(
                format!("writer '{}'", output.key),
                sink.drain(key, rx, signal).instrument(span.clone()),
            );
            writers.push((output.key.clone(), task));
        }

        let (source_tx, mut upstream) = mpsc::unbounded_channel();
        let reader = supervisor.spawn(
            "source".into(),
            read_source(source, source_tx, self.cancel.signal()).instrument(span.clone()),
        );

        let mut section_tasks = Vec::with_capacity(sections.len());
        for section in sections {
            let (tx, rx) = mpsc::unbounded_channel();
            let name = section.name().to_string();
            let task = supervisor.spawn(
                format!("section '{name}'"),
                section.run(upstream, tx, self.cancel.signal()).instrument(span.clone()),
            );
            section_tasks.push((name, task));
            upstream = rx;
        }

        let drain = supervisor.spawn(
            "drain".into(),
            drain_frames(upstream, writer_queues, self.cancel.signal()).instrument(span.clone()),
        );

        let frames_read = settled(reader).await;
        let mut section_stats = Vec::with_capacity(section_tasks.len());
        for (name, task) in section_tasks {
            if let Ok(Some(stats)) = task.await {
                section_stats.push((name, stats));
            }
        }
        let drained = settled(drain).await;
        let mut writer_stats = BTreeMap::new();
        for (key, task) in writers {
            if let Ok(Some(stats)) = task.await {
                writer_stats.insert(key, stats);
            }
        }

        let faults = supervisor.faults.lock().clone();
        let state = if !faults.is_empty() {
            RunState::Faulted
        } else if self.cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };

        span.in_scope(|| {
            tracing::info!(
                state = %state,
                frames_read,
                frames_forwarded = drained.frames,
                values_routed = drained.routed,
                "run finished"
            );
        });
        self.messages.info("run", format!("run {run_id} {state}"));

        Ok(RunReport {
            run_id,
            state,
            started_at,
            finished_at: Utc::now(),
            frames_read,
            frames_forwarded: drained.frames,
            values_routed: drained.routed,
            values_unrouted: drained.unrouted,
            sections: section_stats,
            writers: writer_stats,
            faults,
        })
    }
}

/// Records the first failure of any stage and cancels the rest.
#[derive(Clone)]
struct Supervisor {
    messages: MessageBus,
    cancel: CancelHandle,
    faults: Arc<Mutex<Vec<String>>>,
}

impl Supervisor {
    fn spawn<T, F>(&self, stage: String, future: F) -> JoinHandle<Option<T>>
    where
        T: Send + 'static,
        F: Future<Output = PmuResult<T>> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let result = future.await;
            this.settle(&stage, result)
        })
    }

    fn settle<T>(&self, stage: &str, result: PmuResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) if e.is_cancelled() => None,
            // Queues torn down by an earlier fault or cancellation.
            Err(e) if self.cancel.is_cancelled() => {
                tracing::debug!(stage, error = %e, "stage stopped after cancellation");
                None
            }
            Err(e) => {
                self.faults.lock().push(format!("{stage}: {e}"));
                self.messages.error(stage, e.to_string());
                self.cancel.cancel();
                None
            }
        }
    }
}

async fn settled<T: Default>(task: JoinHandle<Option<T>>) -> T {
    task.await.ok().flatten().unwrap_or_default()
}

/// Pull frames from the source into the chain. Returns the number read,
/// also when stopped by cancellation.
async fn read_source(
    mut source: Box<dyn FrameSource>,
    output: mpsc::UnboundedSender<Frame>,
    mut cancel: CancelSignal,
) -> PmuResult<u64> {
    let mut read = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(frames = read, "source reading cancelled");
                return Ok(read);
            }
            next = source.next_frame() => next,
        };
        let Some(frame) = next.map_err(|e| PmuError::Source(format!("{e:#}")))? else {
            break;
        };
        read += 1;
        output
            .send(frame)
            .map_err(|_| PmuError::ChannelClosed("source output".into()))?;
    }
    tracing::info!(frames = read, "source exhausted");
    Ok(read)
}

/// Route every measurement of every frame to the writer of its key. Returning
/// drops every writer queue, which lets the writers finalize.
async fn drain_frames(
    mut input: mpsc::UnboundedReceiver<Frame>,
    mut writers: HashMap<SignalKey, mpsc::UnboundedSender<Measurement>>,
    mut cancel: CancelSignal,
) -> PmuResult<DrainCounts> {
    let mut counts = DrainCounts::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = input.recv() => frame,
        };
        let Some(frame) = next else { break };
        counts.frames += 1;
        for (key, measurement) in frame.measurements {
            let Some(queue) = writers.get(&key) else {
                counts.unrouted += 1;
                continue;
            };
            if queue.send(measurement).is_err() {
                // The writer already failed and reported it.
                tracing::debug!(signal = %key, "writer queue closed; dropping signal");
                writers.remove(&key);
                continue;
            }
            counts.routed += 1;
        }
    }
    Ok(counts)
}
