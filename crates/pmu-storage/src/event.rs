//! Store for duration-bearing events.
//!
//! Uses the same tree as the data store. An event whose duration runs past the
//! end of its second also writes one continuation record (value `NaN`) at the
//! start of every following second it covers, so each second's aggregate holds
//! exactly the duration spent inside it.

use pmu_core::time::{self, Ticks, TICKS_PER_SECOND};
use pmu_core::{Event, EventSummary, Measurement, PmuResult};
use std::path::{Path, PathBuf};

use crate::record::{EventRecord, RecordLayout};
use crate::root_config::{RootConfig, SignalKind, SignalMetadata};
use crate::stats::{OutOfOrderLog, WriterStats};
use crate::tree::{Trend, TreeReader, TreeWriter};
use crate::DEFAULT_OUT_OF_ORDER_CAPACITY;

// Remaining spillover below this many seconds is treated as exhausted.
const DURATION_EPSILON: f64 = 1e-9;

/// Duration of an accepted event not yet written as continuation records.
#[derive(Debug)]
struct Spill {
    next: Ticks,
    remaining: f64,
    parameters: Vec<f64>,
}

/// Appends events to a signal tree.
///
/// The first accepted event fixes the parameter schema. Later events with a
/// different set of parameter names are rejected.
#[derive(Debug)]
pub struct EventSignalWriter {
    root: PathBuf,
    metadata: SignalMetadata,
    tree: Option<TreeWriter<EventRecord>>,
    schema: Vec<String>,
    current_second: Option<Ticks>,
    buffer: Vec<EventRecord>,
    pending: Vec<Spill>,
    last_ticks: Option<Ticks>,
    out_of_order: OutOfOrderLog<Event>,
    stats: WriterStats,
}

impl EventSignalWriter {
    /// Writer for the signal under `root`; nothing is created before the first event.
    pub fn new(root: impl Into<PathBuf>, metadata: SignalMetadata) -> Self {
        Self {
            root: root.into(),
            metadata,
            tree: None,
            schema: Vec::new(),
            current_second: None,
            buffer: Vec::new(),
            pending: Vec::new(),
            last_ticks: None,
            out_of_order: OutOfOrderLog::new(DEFAULT_OUT_OF_ORDER_CAPACITY),
            stats: WriterStats::default(),
        }
    }

    /// Bound the out-of-order diagnostic list.
    pub fn with_out_of_order_capacity(mut self, capacity: usize) -> Self {
        self.out_of_order = OutOfOrderLog::new(capacity);
        self
    }

    /// Signal root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Counters so far.
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Parameter schema, empty before the first event.
    pub fn parameter_names(&self) -> &[String] {
        &self.schema
    }

    /// Most recent out-of-order events.
    pub fn out_of_order(&self) -> impl Iterator<Item = &Event> {
        self.out_of_order.items()
    }

    /// Write a measurement. Plain values are counted as kind mismatches and dropped.
    pub fn write_measurement(&mut self, measurement: &Measurement) -> PmuResult<()> {
        match measurement {
            Measurement::Event(event) => self.write(event),
            Measurement::Value(value) => {
                self.stats.kind_mismatch += 1;
                tracing::warn!(
                    signal = %self.metadata.name,
                    key = %value.key,
                    "plain value sent to event signal"
                );
                Ok(())
            }
        }
    }

    /// Append one event and queue its spillover.
    pub fn write(&mut self, event: &Event) -> PmuResult<()> {
        if event.value.is_nan() {
            self.stats.nan_skipped += 1;
            return Ok(());
        }

        if !fits_tick_range(event) {
            self.stats.invalid_durations += 1;
            tracing::warn!(
                signal = %self.metadata.name,
                ticks = event.timestamp,
                duration = event.duration,
                "event rejected: duration is not representable"
            );
            return Ok(());
        }

        let names = event.parameter_names();
        if self.tree.is_none() {
            RootConfig::initialize(&self.root, SignalKind::Event, &self.metadata, names.clone())?;
            self.tree = Some(TreeWriter::new(
                self.root.clone(),
                RecordLayout {
                    parameters: names.len(),
                },
            ));
            self.schema = names;
        } else if names != self.schema {
            self.stats.schema_rejects += 1;
            tracing::warn!(
                signal = %self.metadata.name,
                expected = ?self.schema,
                found = ?names,
                "event rejected: parameter names differ from stored schema"
            );
            return Ok(());
        }

        if let Some(last) = self.last_ticks.filter(|last| event.timestamp < *last) {
            self.stats.out_of_order += 1;
            self.out_of_order.push(event.clone());
            tracing::warn!(
                signal = %self.metadata.name,
                ticks = event.timestamp,
                last,
                "out-of-order event diverted"
            );
            return Ok(());
        }

        let second = time::floor_second(event.timestamp);
        self.advance_to(second)?;
        self.current_second = Some(second);
        self.last_ticks = Some(event.timestamp);

        let parameters: Vec<f64> = event.parameters.iter().map(|p| p.value).collect();
        let duration = event.duration.max(0.0);
        self.buffer.push(EventRecord {
            ticks: event.timestamp,
            value: event.value,
            duration,
            parameters: parameters.clone(),
        });

        let next = second + TICKS_PER_SECOND;
        let remaining = duration - time::ticks_to_seconds(next - event.timestamp);
        if remaining > DURATION_EPSILON {
            self.pending.push(Spill {
                next,
                remaining,
                parameters,
            });
        }
        Ok(())
    }

    /// Continuation records of every open spill for `second`.
    fn take_spillover(&mut self, second: Ticks) -> Vec<EventRecord> {
        let mut records = Vec::new();
        self.pending.retain_mut(|spill| {
            if spill.next != second {
                return true;
            }
            records.push(EventRecord {
                ticks: second,
                value: f64::NAN,
                duration: spill.remaining.min(1.0),
                parameters: spill.parameters.clone(),
            });
            spill.remaining -= 1.0;
            spill.next = spill.next.saturating_add(TICKS_PER_SECOND);
            spill.remaining > DURATION_EPSILON
        });
        self.stats.spillover_records += records.len() as u64;
        records
    }

    /// Flush every buffered or pending second that starts before `second`.
    fn advance_to(&mut self, second: Ticks) -> PmuResult<()> {
        loop {
            let current = self.current_second.filter(|s| *s < second);
            let spill = self.pending.iter().map(|s| s.next).min().filter(|s| *s < second);
            let target = match (current, spill) {
                (Some(c), Some(p)) => c.min(p),
                (Some(c), None) => c,
                (None, Some(p)) => p,
                (None, None) => return Ok(()),
            };

            let mut records = self.take_spillover(target);
            if current == Some(target) {
                let real = self.buffer.len() as u64;
                records.append(&mut self.buffer);
                self.current_second = None;
                self.stats.points_written += real;
            }
            records.sort_by_key(|r| r.ticks);

            if let Some(tree) = self.tree.as_mut() {
                tree.write_leaf(&records)?;
                self.stats.leaf_files = tree.leaf_files();
            }
        }
    }

    /// Flush everything, including pending spillover, and rebuild the index.
    pub fn finish(&mut self) -> PmuResult<WriterStats> {
        self.advance_to(Ticks::MAX)?;
        if let Some(tree) = self.tree.as_mut() {
            let total = tree.finish()?;
            tracing::info!(
                signal = %self.metadata.name,
                events = self.stats.points_written,
                stored = total.count,
                spillover = self.stats.spillover_records,
                "event signal finalized"
            );
        }
        Ok(self.stats)
    }
}

/// `false` when the event's duration is not finite or its end overflows [`Ticks`].
fn fits_tick_range(event: &Event) -> bool {
    if !event.duration.is_finite() {
        return false;
    }
    let span = event.duration.max(0.0) * TICKS_PER_SECOND as f64;
    span < (Ticks::MAX - event.timestamp.max(0)) as f64
}

/// Read-only access to an event signal tree.
#[derive(Debug, Clone)]
pub struct EventSignalReader {
    config: RootConfig,
    tree: TreeReader<EventRecord>,
}

impl EventSignalReader {
    /// Open the event signal under `root`.
    pub fn open(root: impl Into<PathBuf>) -> PmuResult<Self> {
        let root = root.into();
        let config = RootConfig::open(&root, SignalKind::Event)?;
        let layout = RecordLayout {
            parameters: config.parameters.len(),
        };
        Ok(Self {
            config,
            tree: TreeReader::new(root, layout),
        })
    }

    /// Metadata from `Root.config`.
    pub fn metadata(&self) -> &SignalMetadata {
        &self.config.metadata
    }

    /// Parameter schema.
    pub fn parameter_names(&self) -> &[String] {
        &self.config.parameters
    }

    /// At most about `budget` aggregates covering `[start, end)`.
    pub fn trend(&self, start: Ticks, end: Ticks, budget: usize) -> PmuResult<Trend<EventSummary>> {
        self.tree.trend(start, end, budget)
    }

    /// Single aggregate over `[start, end)`.
    pub fn statistics(&self, start: Ticks, end: Ticks) -> PmuResult<EventSummary> {
        self.tree.aggregate(start, end)
    }

    /// Every stored record in `[start, end)`, continuation records included.
    pub fn read_events(&self, start: Ticks, end: Ticks) -> PmuResult<Vec<EventRecord>> {
        self.tree.records(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmu_core::SignalKey;
    use tracing_test::traced_test;

    const BASE: Ticks = 1_720_000_000 * TICKS_PER_SECOND;

    fn event(offset_ms: i64, value: f64, duration: f64) -> Event {
        Event::new(
            SignalKey::new("trip"),
            value,
            BASE + offset_ms * pmu_core::time::TICKS_PER_MILLISECOND,
            duration,
        )
        .with_parameter("peak", value * 2.0)
    }

    #[test]
    fn spillover_only_seconds_get_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EventSignalWriter::new(dir.path(), SignalMetadata::named("trip"));
        writer.write(&event(500, 1.0, 2.75)).unwrap();
        let stats = writer.finish().unwrap();

        assert_eq!(stats.points_written, 1);
        assert_eq!(stats.spillover_records, 3);
        assert_eq!(stats.leaf_files, 4);

        let reader = EventSignalReader::open(dir.path()).unwrap();
        let records = reader.read_events(BASE, BASE + 10 * TICKS_PER_SECOND).unwrap();
        assert_eq!(records.len(), 4);
        assert!(!records[0].is_continuation());
        assert!(records[1..].iter().all(EventRecord::is_continuation));
        assert_eq!(records[3].ticks, BASE + 3 * TICKS_PER_SECOND);
        assert!((records[3].duration - 0.25).abs() < 1e-9);
        assert_eq!(records[2].parameters, vec![2.0]);

        let third = reader
            .statistics(BASE + 2 * TICKS_PER_SECOND, BASE + 3 * TICKS_PER_SECOND)
            .unwrap();
        assert!(third.continuation);
        assert_eq!(third.count, 0);
    }

    #[test]
    fn real_events_share_a_second_with_spillover() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EventSignalWriter::new(dir.path(), SignalMetadata::named("trip"));
        writer.write(&event(900, 1.0, 0.5)).unwrap();
        writer.write(&event(1200, 4.0, 0.1)).unwrap();
        writer.finish().unwrap();

        let reader = EventSignalReader::open(dir.path()).unwrap();
        let second = reader
            .statistics(BASE + TICKS_PER_SECOND, BASE + 2 * TICKS_PER_SECOND)
            .unwrap();
        assert_eq!(second.count, 1);
        assert!(!second.continuation);
        assert!((second.total_duration() - 0.5).abs() < 1e-9);
        assert_eq!(reader.parameter_names().to_vec(), vec!["peak".to_string()]);
    }

    #[test]
    #[traced_test]
    fn schema_changes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EventSignalWriter::new(dir.path(), SignalMetadata::named("trip"));
        writer.write(&event(0, 1.0, 0.0)).unwrap();
        let odd = Event::new(SignalKey::new("trip"), 2.0, BASE + 10, 0.0)
            .with_parameter("other", 1.0);
        writer.write(&odd).unwrap();
        let stats = writer.finish().unwrap();

        assert_eq!(stats.schema_rejects, 1);
        assert_eq!(stats.points_written, 1);
        assert!(logs_contain("parameter names differ"));
    }

    #[test]
    #[traced_test]
    fn unbounded_durations_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EventSignalWriter::new(dir.path(), SignalMetadata::named("trip"));
        writer.write(&event(0, 1.0, f64::INFINITY)).unwrap();
        writer.write(&event(100, 1.0, f64::NAN)).unwrap();
        writer.write(&event(200, 1.0, 1e15)).unwrap();
        assert!(!dir.path().join("Root.config").exists());

        writer.write(&event(300, 1.0, 1.2)).unwrap();
        let stats = writer.finish().unwrap();
        assert_eq!(stats.invalid_durations, 3);
        assert_eq!(stats.points_written, 1);
        assert_eq!(stats.spillover_records, 1);
        assert!(logs_contain("duration is not representable"));
    }

    #[test]
    #[traced_test]
    fn late_events_are_diverted_behind_pending_spillover() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EventSignalWriter::new(dir.path(), SignalMetadata::named("trip"))
            .with_out_of_order_capacity(4);
        writer.write(&event(500, 1.0, 2.0)).unwrap();
        writer.write(&event(1200, 3.0, 0.1)).unwrap();
        // Earlier than the last accepted event, while second 2 still waits for spillover.
        writer.write(&event(800, 5.0, 0.1)).unwrap();
        let stats = writer.finish().unwrap();

        assert_eq!(stats.out_of_order, 1);
        assert_eq!(stats.points_written, 2);
        assert_eq!(stats.spillover_records, 2);
        let diverted: Vec<_> = writer.out_of_order().map(|e| (e.timestamp, e.value)).collect();
        assert_eq!(diverted, vec![(BASE + 800 * pmu_core::time::TICKS_PER_MILLISECOND, 5.0)]);
        assert!(logs_contain("out-of-order event diverted"));

        let reader = EventSignalReader::open(dir.path()).unwrap();
        let records = reader.read_events(BASE, BASE + 5 * TICKS_PER_SECOND).unwrap();
        let stamps: Vec<Ticks> = records.iter().map(|r| r.ticks).collect();
        let ms = pmu_core::time::TICKS_PER_MILLISECOND;
        let expected = [500, 1000, 1200, 2000].map(|offset| BASE + offset * ms);
        assert_eq!(stamps, expected);
        assert!(records.iter().all(|r| r.value != 5.0));
        assert_eq!(reader.statistics(BASE, BASE + 5 * TICKS_PER_SECOND).unwrap().count, 2);
    }

    #[test]
    fn plain_values_are_counted_as_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EventSignalWriter::new(dir.path(), SignalMetadata::named("trip"));
        let value = pmu_core::TimeSeriesValue::new("trip", 1.0, BASE);
        writer.write_measurement(&value.into()).unwrap();
        assert_eq!(writer.finish().unwrap().kind_mismatch, 1);
        assert!(!dir.path().join("Root.config").exists());
    }
}
