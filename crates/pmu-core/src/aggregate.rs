//! Associative statistical aggregates used by both signal stores.
//!
//! Every directory of the store keeps one aggregate for everything below it,
//! so the merge must be associative: merging the aggregates of two adjacent
//! ranges gives the aggregate of their union. [`Aggregate::empty`] is the
//! identity of the merge.
//!
//! Both aggregates encode to a fixed 56-byte little-endian record.
//!
//! ```text
//! GraphPoint:   count:u64 | min:f64 | max:f64 | sum:f64 | sum_sq:f64 | t_min:i64 | t_max:i64
//! EventSummary: count:u64 | min:f64 | max:f64 | sum:f64 | t_min:i64 | t_max:i64
//!               | continuation:u8 | pad:[u8;7]
//! ```

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::time::Ticks;

/// An associative summary with a fixed binary encoding.
pub trait Aggregate: Copy + Debug + Send + Sync + 'static {
    /// Size of the encoded record in bytes.
    const ENCODED_LEN: usize;

    /// Identity element of [`Aggregate::merge`].
    fn empty() -> Self;

    /// `true` when nothing has been folded in.
    fn is_empty(&self) -> bool;

    /// Number of real samples or events summarized.
    fn sample_count(&self) -> u64;

    /// First and last timestamp covered, or `None` when empty.
    fn time_range(&self) -> Option<(Ticks, Ticks)>;

    /// Combine two aggregates. Must be associative with `empty()` as identity.
    fn merge(&self, other: &Self) -> Self;

    /// Append the fixed-size encoding to `buf`.
    fn encode(&self, buf: &mut impl BufMut);

    /// Decode one record, or `None` when fewer than `ENCODED_LEN` bytes remain.
    fn decode(buf: &mut impl Buf) -> Option<Self>;
}

/// Fold any number of aggregates with the shared associative merge.
pub fn fold<A: Aggregate>(items: impl IntoIterator<Item = A>) -> A {
    items
        .into_iter()
        .fold(A::empty(), |acc, item| acc.merge(&item))
}

/// Summary of continuous values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphPoint {
    /// Samples folded in.
    pub count: u64,
    /// Smallest value, `NaN` when empty.
    pub min: f64,
    /// Largest value, `NaN` when empty.
    pub max: f64,
    /// Sum of values.
    pub sum: f64,
    /// Sum of squared values.
    pub sum_of_squares: f64,
    /// Earliest timestamp.
    pub t_min: Ticks,
    /// Latest timestamp.
    pub t_max: Ticks,
}

impl GraphPoint {
    /// Aggregate of a single sample.
    pub fn from_sample(ticks: Ticks, value: f64) -> Self {
        Self {
            count: 1,
            min: value,
            max: value,
            sum: value,
            sum_of_squares: value * value,
            t_min: ticks,
            t_max: ticks,
        }
    }

    /// Arithmetic mean, `NaN` when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }

    /// Population standard deviation, `NaN` when empty.
    pub fn std_dev(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        (self.sum_of_squares / n - mean * mean).max(0.0).sqrt()
    }
}

impl Default for GraphPoint {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aggregate for GraphPoint {
    const ENCODED_LEN: usize = 56;

    fn empty() -> Self {
        Self {
            count: 0,
            min: f64::NAN,
            max: f64::NAN,
            sum: 0.0,
            sum_of_squares: 0.0,
            t_min: Ticks::MAX,
            t_max: Ticks::MIN,
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn sample_count(&self) -> u64 {
        self.count
    }

    fn time_range(&self) -> Option<(Ticks, Ticks)> {
        (!self.is_empty()).then_some((self.t_min, self.t_max))
    }

    fn merge(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
            sum_of_squares: self.sum_of_squares + other.sum_of_squares,
            t_min: self.t_min.min(other.t_min),
            t_max: self.t_max.max(other.t_max),
        }
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.count);
        buf.put_f64_le(self.min);
        buf.put_f64_le(self.max);
        buf.put_f64_le(self.sum);
        buf.put_f64_le(self.sum_of_squares);
        buf.put_i64_le(self.t_min);
        buf.put_i64_le(self.t_max);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            count: buf.get_u64_le(),
            min: buf.get_f64_le(),
            max: buf.get_f64_le(),
            sum: buf.get_f64_le(),
            sum_of_squares: buf.get_f64_le(),
            t_min: buf.get_i64_le(),
            t_max: buf.get_i64_le(),
        })
    }
}

/// Summary of events.
///
/// `count`, `min` and `max` describe event values; `sum` is the duration in
/// seconds that falls inside the summarized range. Spillover records add
/// duration without adding to `count`. `continuation` is `true` only when the
/// range holds nothing but spillover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    /// Real events folded in; spillover does not count.
    pub count: u64,
    /// Smallest event value, `NaN` without real events.
    pub min: f64,
    /// Largest event value, `NaN` without real events.
    pub max: f64,
    /// Seconds of event duration inside the range.
    pub sum: f64,
    /// Earliest record timestamp.
    pub t_min: Ticks,
    /// Latest record timestamp.
    pub t_max: Ticks,
    /// Only spillover was folded in.
    pub continuation: bool,
}

impl EventSummary {
    /// Contribution of a real event: its value and the part of its duration
    /// (seconds) that lies inside the bucket it was written to.
    pub fn from_event(ticks: Ticks, value: f64, duration_in_bucket: f64) -> Self {
        Self {
            count: 1,
            min: value,
            max: value,
            sum: duration_in_bucket,
            t_min: ticks,
            t_max: ticks,
            continuation: false,
        }
    }

    /// Contribution of a synthetic spillover record.
    pub fn spillover(ticks: Ticks, duration_in_bucket: f64) -> Self {
        Self {
            count: 0,
            min: f64::NAN,
            max: f64::NAN,
            sum: duration_in_bucket,
            t_min: ticks,
            t_max: ticks,
            continuation: true,
        }
    }

    /// Total duration in seconds covered by the summarized events.
    pub fn total_duration(&self) -> f64 {
        self.sum
    }
}

impl Default for EventSummary {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aggregate for EventSummary {
    const ENCODED_LEN: usize = 56;

    fn empty() -> Self {
        Self {
            count: 0,
            min: f64::NAN,
            max: f64::NAN,
            sum: 0.0,
            t_min: Ticks::MAX,
            t_max: Ticks::MIN,
            continuation: false,
        }
    }

    // Spillover summaries have count 0, so emptiness is tracked by time range.
    fn is_empty(&self) -> bool {
        self.t_min > self.t_max
    }

    fn sample_count(&self) -> u64 {
        self.count
    }

    fn time_range(&self) -> Option<(Ticks, Ticks)> {
        (!self.is_empty()).then_some((self.t_min, self.t_max))
    }

    fn merge(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
            t_min: self.t_min.min(other.t_min),
            t_max: self.t_max.max(other.t_max),
            continuation: self.continuation && other.continuation,
        }
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.count);
        buf.put_f64_le(self.min);
        buf.put_f64_le(self.max);
        buf.put_f64_le(self.sum);
        buf.put_i64_le(self.t_min);
        buf.put_i64_le(self.t_max);
        buf.put_u8(u8::from(self.continuation));
        buf.put_bytes(0, 7);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::ENCODED_LEN {
            return None;
        }
        let summary = Self {
            count: buf.get_u64_le(),
            min: buf.get_f64_le(),
            max: buf.get_f64_le(),
            sum: buf.get_f64_le(),
            t_min: buf.get_i64_le(),
            t_max: buf.get_i64_le(),
            continuation: buf.get_u8() != 0,
        };
        buf.advance(7);
        Some(summary)
    }
}
