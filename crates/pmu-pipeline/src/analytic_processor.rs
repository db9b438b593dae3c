//! Adapts one analytic instance to the frame stream.
//!
//! The processor owns the routing tables between pipeline keys and the
//! analytic's own input/output names, gates invocations to the analytic's
//! declared rate, and keeps the history window the analytic asked for.

use pmu_core::time::{Ticks, TICKS_PER_SECOND};
use pmu_core::{
    Analytic, AnalyticFrame, AnalyticRegistry, ConflictPolicy, Frame, Measurement, MergeOutcome,
    MessageBus, SignalKey, TimeSeriesValue,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::config::AnalyticTemplate;

/// Known frame rates of upstream signals, falling back to the source rate.
#[derive(Debug, Clone, Default)]
pub struct SignalRates {
    base: f64,
    known: HashMap<SignalKey, f64>,
}

impl SignalRates {
    /// Rates defaulting to `base` frames per second.
    pub fn new(base: f64) -> Self {
        Self {
            base,
            known: HashMap::new(),
        }
    }

    /// Rate of the source stream.
    pub fn base(&self) -> f64 {
        self.base
    }

    /// Record the rate of `key`.
    pub fn insert(&mut self, key: SignalKey, rate: f64) {
        self.known.insert(key, rate);
    }

    /// Rate of `key`, or the base rate when unknown.
    pub fn rate_of(&self, key: &SignalKey) -> f64 {
        self.known.get(key).copied().unwrap_or(self.base)
    }
}

/// Counters of one `route_output` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteCounts {
    /// Measurements merged into the frame.
    pub routed: u64,
    /// Measurements without an output route.
    pub unrouted: u64,
    /// Measurements refused by the conflict policy.
    pub rejected: u64,
}

/// One configured analytic with its routing tables, rate gate and history.
pub struct AnalyticProcessor {
    label: String,
    analytic: Option<Box<dyn Analytic>>,
    input_names: Vec<String>,
    input_keys: Vec<Option<SignalKey>>,
    output_routes: HashMap<String, SignalKey>,
    output_rates: Vec<(SignalKey, f64)>,
    prev_frames: usize,
    future_frames: usize,
    period: Option<Ticks>,
    anchor: Option<Ticks>,
    steps: i64,
    next_timestamp: Ticks,
    history: VecDeque<AnalyticFrame>,
    invocations: u64,
    messages: MessageBus,
}

impl std::fmt::Debug for AnalyticProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticProcessor")
            .field("label", &self.label)
            .field("inert", &self.analytic.is_none())
            .field("prev_frames", &self.prev_frames)
            .field("future_frames", &self.future_frames)
            .field("period", &self.period)
            .field("invocations", &self.invocations)
            .finish()
    }
}

impl AnalyticProcessor {
    /// Instantiate the template's analytic and wire its inputs and outputs.
    ///
    /// Creation or configuration failures are reported on `messages` and leave
    /// the processor inert.
    pub fn new(
        template: &AnalyticTemplate,
        registry: &AnalyticRegistry,
        rates: &SignalRates,
        messages: MessageBus,
    ) -> Self {
        let mut processor = Self {
            label: template.name.clone(),
            analytic: None,
            input_names: Vec::new(),
            input_keys: Vec::new(),
            output_routes: HashMap::new(),
            output_rates: Vec::new(),
            prev_frames: 0,
            future_frames: 0,
            period: None,
            anchor: None,
            steps: 0,
            next_timestamp: Ticks::MIN,
            history: VecDeque::new(),
            invocations: 0,
            messages,
        };

        let mut analytic = match registry.create(&template.r#type, &template.settings) {
            Ok(analytic) => analytic,
            Err(e) => {
                processor.messages.error(
                    &processor.label,
                    format!("analytic '{}' could not be created: {e:#}", template.r#type),
                );
                return processor;
            }
        };

        processor.input_names = analytic.input_names();
        processor.input_keys = processor
            .input_names
            .iter()
            .map(|name| template.inputs.get(name).cloned())
            .collect();
        for (name, key) in processor.input_names.iter().zip(&processor.input_keys) {
            if key.is_none() {
                processor.messages.warn(
                    &processor.label,
                    format!("input '{name}' is not mapped; it will read as NaN"),
                );
            }
        }
        let input_rates: Vec<f64> = processor
            .input_keys
            .iter()
            .map(|key| key.as_ref().map_or(rates.base(), |k| rates.rate_of(k)))
            .collect();
        analytic.set_input_fps(&input_rates);

        let rate = analytic.frames_per_second();
        processor.period =
            (rate > 0.0).then(|| ((TICKS_PER_SECOND as f64 / rate).round() as Ticks).max(1));
        processor.prev_frames = analytic.prev_frames();
        processor.future_frames = analytic.future_frames();

        let declared = analytic.outputs();
        for (name, key) in &template.outputs {
            match declared.iter().find(|d| &d.name == name) {
                Some(descriptor) => {
                    let out_rate = if descriptor.rate > 0.0 {
                        descriptor.rate
                    } else if rate > 0.0 {
                        rate
                    } else {
                        rates.base()
                    };
                    processor.output_rates.push((key.clone(), out_rate));
                    processor.output_routes.insert(name.clone(), key.clone());
                }
                None => processor.messages.warn(
                    &processor.label,
                    format!("output '{name}' is not declared by '{}'", template.r#type),
                ),
            }
        }

        tracing::debug!(
            analytic = %processor.label,
            r#type = %template.r#type,
            rate,
            prev = processor.prev_frames,
            future = processor.future_frames,
            "analytic processor ready"
        );
        processor.analytic = Some(analytic);
        processor
    }

    /// Instance label from the template.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// `true` when the analytic could not be created.
    pub fn is_inert(&self) -> bool {
        self.analytic.is_none()
    }

    /// Frames of look-ahead needed.
    pub fn future_frames(&self) -> usize {
        self.future_frames
    }

    /// Frames of history kept.
    pub fn prev_frames(&self) -> usize {
        self.prev_frames
    }

    /// Number of `compute` calls so far.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Earliest timestamp the next invocation may have.
    pub fn next_timestamp(&self) -> Ticks {
        self.next_timestamp
    }

    /// Downstream keys produced by this processor with their nominal rates.
    pub fn output_rates(&self) -> &[(SignalKey, f64)] {
        &self.output_rates
    }

    /// Process `frame` if it is due. `candidates` are the frames following it,
    /// nearest first. Returns measurements keyed by analytic output name.
    pub fn run(&mut self, frame: &Frame, candidates: &[Arc<Frame>]) -> Vec<Measurement> {
        if self.analytic.is_none() || !self.is_due(frame.timestamp) {
            return Vec::new();
        }

        let current = self.remap(frame);
        let future: Vec<AnalyticFrame> = candidates
            .iter()
            .take(self.future_frames)
            .map(|f| self.remap(f))
            .collect();

        let past = self.history.make_contiguous();
        let Some(analytic) = self.analytic.as_mut() else {
            return Vec::new();
        };
        self.invocations += 1;
        let produced = match analytic.compute(&current, past, &future) {
            Ok(produced) => produced,
            Err(e) => {
                self.messages.error(
                    &self.label,
                    format!("compute failed at {}: {e:#}", frame.timestamp),
                );
                Vec::new()
            }
        };

        if self.prev_frames > 0 {
            self.history.push_back(current);
            while self.history.len() > self.prev_frames {
                self.history.pop_front();
            }
        }
        produced
    }

    // Anchored gating: due times are anchor + n * period, with 1% jitter
    // tolerance. A frame more than one period past its due time re-anchors.
    fn is_due(&mut self, ts: Ticks) -> bool {
        let Some(period) = self.period else {
            return true;
        };
        let tolerance = period / 100;
        match self.anchor {
            Some(anchor) => {
                let due = anchor + self.steps * period;
                if ts + tolerance < due {
                    return false;
                }
                if ts >= due + period {
                    self.anchor = Some(ts);
                    self.steps = 1;
                } else {
                    self.steps += 1;
                }
            }
            None => {
                self.anchor = Some(ts);
                self.steps = 1;
            }
        }
        self.next_timestamp = self.anchor.unwrap_or(ts) + self.steps * period;
        true
    }

    /// Express `frame` in the analytic's input vocabulary.
    fn remap(&self, frame: &Frame) -> AnalyticFrame {
        let inputs = self
            .input_names
            .iter()
            .zip(&self.input_keys)
            .map(|(name, key)| {
                let local = SignalKey::new(name.as_str());
                match key.as_ref().and_then(|k| frame.get(k)) {
                    Some(m) => adjust_signal(m.clone(), &local),
                    None => TimeSeriesValue::new(local, f64::NAN, frame.timestamp).into(),
                }
            })
            .collect();
        AnalyticFrame {
            timestamp: frame.timestamp,
            inputs,
        }
    }

    /// Rekey produced measurements onto downstream keys and merge them into `out`.
    pub fn route_output(
        &self,
        produced: Vec<Measurement>,
        out: &mut Frame,
        policy: ConflictPolicy,
    ) -> RouteCounts {
        let mut counts = RouteCounts::default();
        for measurement in produced {
            let Some(key) = self.output_routes.get(measurement.key().as_str()) else {
                counts.unrouted += 1;
                tracing::trace!(
                    analytic = %self.label,
                    output = %measurement.key(),
                    "unmapped output dropped"
                );
                continue;
            };
            match out.merge(adjust_signal(measurement, key), policy) {
                MergeOutcome::Rejected => {
                    counts.rejected += 1;
                    self.messages.warn(
                        &self.label,
                        format!(
                            "output for '{key}' rejected: key already set in frame {}",
                            out.timestamp
                        ),
                    );
                }
                _ => counts.routed += 1,
            }
        }
        counts
    }

    /// Flush pending analytic state at end of stream.
    pub fn complete(&mut self, cutoff: Ticks) -> Vec<Measurement> {
        let Some(analytic) = self.analytic.as_mut() else {
            return Vec::new();
        };
        match analytic.complete_computation(cutoff) {
            Ok(produced) => produced,
            Err(e) => {
                self.messages
                    .error(&self.label, format!("completion failed: {e:#}"));
                Vec::new()
            }
        }
    }
}

/// Rekey a measurement. Events keep every parameter.
pub fn adjust_signal(measurement: Measurement, key: &SignalKey) -> Measurement {
    measurement.with_key(key.clone())
}
