//! Frame and measurement data model.
//!
//! A [`Frame`] is the unit flowing through the pipeline: a timestamp and a map
//! of signal key to [`Measurement`]. Frames are shared between concurrently
//! running analytics behind an `Arc` and are never mutated once handed off; a
//! stage that adds outputs clones the frame and merges into the clone.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::time::Ticks;

/// Identifier of a signal inside the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalKey(String);

impl SignalKey {
    /// Create a key from any string-like value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SignalKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SignalKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// A single continuous value. `NaN` means "no data".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesValue {
    /// Signal the value belongs to.
    pub key: SignalKey,
    /// Sample value.
    pub value: f64,
    /// Sample timestamp.
    pub timestamp: Ticks,
}

impl TimeSeriesValue {
    /// A sample of `key`.
    pub fn new(key: impl Into<SignalKey>, value: f64, timestamp: Ticks) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
        }
    }
}

/// A named numeric attribute carried by an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventParameter {
    /// Parameter name; fixed per event signal.
    pub name: String,
    /// Parameter value.
    pub value: f64,
}

impl EventParameter {
    /// A named parameter value.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A discrete occurrence with a duration and ordered named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event signal key.
    pub key: SignalKey,
    /// Headline value, such as the peak.
    pub value: f64,
    /// Start of the event.
    pub timestamp: Ticks,
    /// Duration in seconds.
    pub duration: f64,
    /// Named parameters, in schema order.
    #[serde(default)]
    pub parameters: Vec<EventParameter>,
}

impl Event {
    /// An event without parameters.
    pub fn new(key: impl Into<SignalKey>, value: f64, timestamp: Ticks, duration: f64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
            duration,
            parameters: Vec::new(),
        }
    }

    /// Append a named parameter, keeping declaration order.
    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.push(EventParameter::new(name, value));
        self
    }

    /// Parameter names in declaration order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }
}

/// Anything a frame can carry for a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    /// A plain sample.
    Value(TimeSeriesValue),
    /// A duration-bearing event.
    Event(Event),
}

impl Measurement {
    /// Signal key of either variant.
    pub fn key(&self) -> &SignalKey {
        match self {
            Measurement::Value(v) => &v.key,
            Measurement::Event(e) => &e.key,
        }
    }

    /// Numeric value of either variant.
    pub fn value(&self) -> f64 {
        match self {
            Measurement::Value(v) => v.value,
            Measurement::Event(e) => e.value,
        }
    }

    /// Timestamp of either variant.
    pub fn timestamp(&self) -> Ticks {
        match self {
            Measurement::Value(v) => v.timestamp,
            Measurement::Event(e) => e.timestamp,
        }
    }

    /// `true` for [`Measurement::Event`].
    pub fn is_event(&self) -> bool {
        matches!(self, Measurement::Event(_))
    }

    /// `true` when the value is `NaN`, i.e. no data.
    pub fn is_missing(&self) -> bool {
        self.value().is_nan()
    }

    /// Rekey the measurement. Events keep duration and every parameter.
    pub fn with_key(self, key: SignalKey) -> Self {
        match self {
            Measurement::Value(v) => Measurement::Value(TimeSeriesValue { key, ..v }),
            Measurement::Event(e) => Measurement::Event(Event { key, ..e }),
        }
    }
}

impl From<TimeSeriesValue> for Measurement {
    fn from(value: TimeSeriesValue) -> Self {
        Measurement::Value(value)
    }
}

impl From<Event> for Measurement {
    fn from(event: Event) -> Self {
        Measurement::Event(event)
    }
}

/// What happens when two analytics route an output to the same key of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The first value merged into the frame is kept.
    FirstWins,
    /// Later values replace earlier ones.
    #[default]
    LastWins,
    /// The existing value is kept and the conflict is reported.
    Reject,
}

/// Result of merging a measurement into a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The key was free.
    Inserted,
    /// An earlier value was replaced.
    Replaced,
    /// The earlier value was kept.
    Kept,
    /// The value was refused under [`ConflictPolicy::Reject`].
    Rejected,
}

/// A set of measurements sharing one timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Shared timestamp of every measurement.
    pub timestamp: Ticks,
    /// Set on completion frames emitted at end of stream.
    #[serde(default)]
    pub published: bool,
    /// Measurements by signal key.
    #[serde(default)]
    pub measurements: BTreeMap<SignalKey, Measurement>,
}

impl Frame {
    /// Empty frame at `timestamp`.
    pub fn new(timestamp: Ticks) -> Self {
        Self {
            timestamp,
            published: false,
            measurements: BTreeMap::new(),
        }
    }

    /// Builder-style insert keyed by the measurement's own key.
    pub fn with(mut self, measurement: impl Into<Measurement>) -> Self {
        self.insert(measurement);
        self
    }

    /// Insert or replace a measurement under its own key.
    pub fn insert(&mut self, measurement: impl Into<Measurement>) {
        let measurement = measurement.into();
        self.measurements
            .insert(measurement.key().clone(), measurement);
    }

    /// Measurement stored under `key`.
    pub fn get(&self, key: &SignalKey) -> Option<&Measurement> {
        self.measurements.get(key)
    }

    /// Number of measurements.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// `true` when the frame holds nothing.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Merge a measurement under its key following `policy`.
    pub fn merge(&mut self, measurement: Measurement, policy: ConflictPolicy) -> MergeOutcome {
        use std::collections::btree_map::Entry;

        match self.measurements.entry(measurement.key().clone()) {
            Entry::Vacant(slot) => {
                slot.insert(measurement);
                MergeOutcome::Inserted
            }
            Entry::Occupied(mut slot) => match policy {
                ConflictPolicy::LastWins => {
                    slot.insert(measurement);
                    MergeOutcome::Replaced
                }
                ConflictPolicy::FirstWins => MergeOutcome::Kept,
                ConflictPolicy::Reject => MergeOutcome::Rejected,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rekeying_an_event_preserves_parameters() {
        let event = Event::new("raw", 2.0, 10, 0.5)
            .with_parameter("peak", 3.0)
            .with_parameter("mean", 1.5);
        let moved = Measurement::from(event.clone()).with_key(SignalKey::from("dst"));

        match moved {
            Measurement::Event(e) => {
                assert_eq!(e.key.as_str(), "dst");
                assert_eq!(e.parameters, event.parameters);
                assert_eq!(e.duration, 0.5);
            }
            Measurement::Value(_) => panic!("event lost its kind"),
        }
    }

    #[test]
    fn merge_follows_conflict_policy() {
        let first = Measurement::from(TimeSeriesValue::new("k", 1.0, 0));
        let second = Measurement::from(TimeSeriesValue::new("k", 2.0, 0));
        let key = SignalKey::from("k");

        let mut frame = Frame::new(0);
        assert_eq!(frame.merge(first.clone(), ConflictPolicy::LastWins), MergeOutcome::Inserted);
        assert_eq!(frame.merge(second.clone(), ConflictPolicy::FirstWins), MergeOutcome::Kept);
        assert_eq!(frame.get(&key).map(Measurement::value), Some(1.0));
        assert_eq!(frame.merge(second.clone(), ConflictPolicy::Reject), MergeOutcome::Rejected);
        assert_eq!(frame.get(&key).map(Measurement::value), Some(1.0));
        assert_eq!(frame.merge(second, ConflictPolicy::LastWins), MergeOutcome::Replaced);
        assert_eq!(frame.get(&key).map(Measurement::value), Some(2.0));
    }

    #[test]
    fn missing_means_nan() {
        assert!(Measurement::from(TimeSeriesValue::new("k", f64::NAN, 0)).is_missing());
        assert!(!Measurement::from(TimeSeriesValue::new("k", 0.0, 0)).is_missing());
    }
}
