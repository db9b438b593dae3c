//! Raw records stored in leaf files.
//!
//! A leaf file is the header aggregate of its second followed by the records
//! of that second in tick order:
//!
//! ```text
//! data:  header:GraphPoint   | (ticks:i64, value:f64)*
//! event: header:EventSummary | (ticks:i64, value:f64, duration:f64, param:f64 * P)*
//! ```

use bytes::{Buf, BufMut};
use pmu_core::time::{self, Ticks, TICKS_PER_SECOND};
use pmu_core::{Aggregate, EventSummary, GraphPoint};

/// Per-signal layout information needed to size records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordLayout {
    /// Number of event parameters per record.
    pub parameters: usize,
}

/// A record kind that can be stored in a leaf and summarized.
pub trait LeafRecord: Clone + Send + Sync + 'static {
    /// Aggregate the record folds into.
    type Summary: Aggregate;

    /// Timestamp of the record.
    fn ticks(&self) -> Ticks;

    /// This record's contribution to its second's aggregate.
    fn summary(&self) -> Self::Summary;

    /// Encoded size of one record.
    fn encoded_len(layout: &RecordLayout) -> usize;

    /// Append the little-endian encoding.
    fn encode(&self, buf: &mut impl BufMut);

    /// Decode one record, `None` when too few bytes remain.
    fn decode(buf: &mut impl Buf, layout: &RecordLayout) -> Option<Self>;
}

/// One continuous sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRecord {
    /// Sample timestamp.
    pub ticks: Ticks,
    /// Sample value.
    pub value: f64,
}

impl LeafRecord for DataRecord {
    type Summary = GraphPoint;

    fn ticks(&self) -> Ticks {
        self.ticks
    }

    fn summary(&self) -> GraphPoint {
        GraphPoint::from_sample(self.ticks, self.value)
    }

    fn encoded_len(_layout: &RecordLayout) -> usize {
        16
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(self.ticks);
        buf.put_f64_le(self.value);
    }

    fn decode(buf: &mut impl Buf, _layout: &RecordLayout) -> Option<Self> {
        if buf.remaining() < 16 {
            return None;
        }
        Some(Self {
            ticks: buf.get_i64_le(),
            value: buf.get_f64_le(),
        })
    }
}

/// One stored event or spillover record.
///
/// Spillover records carry a `NaN` value, start at a second boundary and hold
/// the part of the originating event's duration that falls inside their second.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Event start, or the second boundary for spillover.
    pub ticks: Ticks,
    /// Event value, `NaN` for spillover.
    pub value: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Parameter values in schema order.
    pub parameters: Vec<f64>,
}

impl EventRecord {
    /// `true` for spillover records.
    pub fn is_continuation(&self) -> bool {
        self.value.is_nan()
    }

    /// Seconds of this record's duration inside its own second.
    pub fn duration_in_second(&self) -> f64 {
        let next = time::floor_second(self.ticks) + TICKS_PER_SECOND;
        self.duration
            .min(time::ticks_to_seconds(next - self.ticks))
            .max(0.0)
    }
}

impl LeafRecord for EventRecord {
    type Summary = EventSummary;

    fn ticks(&self) -> Ticks {
        self.ticks
    }

    fn summary(&self) -> EventSummary {
        if self.is_continuation() {
            EventSummary::spillover(self.ticks, self.duration_in_second())
        } else {
            EventSummary::from_event(self.ticks, self.value, self.duration_in_second())
        }
    }

    fn encoded_len(layout: &RecordLayout) -> usize {
        24 + 8 * layout.parameters
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(self.ticks);
        buf.put_f64_le(self.value);
        buf.put_f64_le(self.duration);
        for p in &self.parameters {
            buf.put_f64_le(*p);
        }
    }

    fn decode(buf: &mut impl Buf, layout: &RecordLayout) -> Option<Self> {
        if buf.remaining() < Self::encoded_len(layout) {
            return None;
        }
        let ticks = buf.get_i64_le();
        let value = buf.get_f64_le();
        let duration = buf.get_f64_le();
        let parameters = (0..layout.parameters).map(|_| buf.get_f64_le()).collect();
        Some(Self {
            ticks,
            value,
            duration,
            parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_summary_is_clipped_to_its_second() {
        let record = EventRecord {
            ticks: 7 * TICKS_PER_SECOND + TICKS_PER_SECOND / 2,
            value: 3.0,
            duration: 2.0,
            parameters: vec![1.0],
        };
        let summary = record.summary();
        assert_eq!(summary.count, 1);
        assert!((summary.sum - 0.5).abs() < 1e-12);

        let spill = EventRecord {
            ticks: 8 * TICKS_PER_SECOND,
            value: f64::NAN,
            duration: 1.0,
            parameters: vec![1.0],
        };
        assert!(spill.summary().continuation);
        assert_eq!(spill.summary().count, 0);
    }

    #[test]
    fn event_record_size_depends_on_parameters() {
        let layout = RecordLayout { parameters: 3 };
        let record = EventRecord {
            ticks: 1,
            value: 2.0,
            duration: 0.1,
            parameters: vec![4.0, 5.0, 6.0],
        };
        let mut buf = Vec::new();
        record.encode(&mut buf);
        assert_eq!(buf.len(), EventRecord::encoded_len(&layout));
        assert_eq!(EventRecord::decode(&mut buf.as_slice(), &layout), Some(record));
        assert!(EventRecord::decode(&mut &buf[..30], &layout).is_none());
    }
}
