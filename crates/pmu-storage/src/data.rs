//! Store for continuous values.

use pmu_core::time::{self, Ticks};
use pmu_core::{GraphPoint, Measurement, PmuResult};
use std::path::{Path, PathBuf};

use crate::record::{DataRecord, RecordLayout};
use crate::root_config::{RootConfig, SignalKind, SignalMetadata};
use crate::stats::{OutOfOrderLog, WriterStats};
use crate::tree::{Trend, TreeReader, TreeWriter};

/// Default capacity of the out-of-order diagnostic list.
pub const DEFAULT_OUT_OF_ORDER_CAPACITY: usize = 1024;

/// Appends continuous samples to a signal tree.
///
/// Samples sharing a whole second are buffered and flushed as one leaf when a
/// later second arrives or the writer finishes. The subtree and `Root.config`
/// are created on the first accepted sample.
#[derive(Debug)]
pub struct DataSignalWriter {
    metadata: SignalMetadata,
    tree: TreeWriter<DataRecord>,
    initialized: bool,
    current_second: Option<Ticks>,
    buffer: Vec<DataRecord>,
    last_ticks: Option<Ticks>,
    out_of_order: OutOfOrderLog<DataRecord>,
    stats: WriterStats,
}

impl DataSignalWriter {
    /// Writer for the signal under `root`; nothing is created before the first sample.
    pub fn new(root: impl Into<PathBuf>, metadata: SignalMetadata) -> Self {
        Self {
            metadata,
            tree: TreeWriter::new(root, RecordLayout::default()),
            initialized: false,
            current_second: None,
            buffer: Vec::new(),
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
        self.tree.root()
    }

    /// Counters so far.
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Samples diverted because they arrived out of order, newest last.
    pub fn out_of_order(&self) -> impl Iterator<Item = &DataRecord> {
        self.out_of_order.items()
    }

    /// Write any measurement; events are stored by their value.
    pub fn write_measurement(&mut self, measurement: &Measurement) -> PmuResult<()> {
        self.write(measurement.timestamp(), measurement.value())
    }

    /// Append one sample.
    pub fn write(&mut self, ticks: Ticks, value: f64) -> PmuResult<()> {
        if value.is_nan() {
            self.stats.nan_skipped += 1;
            return Ok(());
        }
        if let Some(last) = self.last_ticks.filter(|last| ticks < *last) {
            self.stats.out_of_order += 1;
            self.out_of_order.push(DataRecord { ticks, value });
            tracing::warn!(
                signal = %self.metadata.name,
                ticks,
                last,
                "out-of-order sample diverted"
            );
            return Ok(());
        }
        if !self.initialized {
            RootConfig::initialize(self.tree.root(), SignalKind::Data, &self.metadata, Vec::new())?;
            self.initialized = true;
        }

        let second = time::floor_second(ticks);
        if self.current_second.is_some_and(|current| current != second) {
            self.flush()?;
        }
        self.current_second = Some(second);
        self.buffer.push(DataRecord { ticks, value });
        self.last_ticks = Some(ticks);
        Ok(())
    }

    fn flush(&mut self) -> PmuResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.tree.write_leaf(&self.buffer)?;
        self.stats.points_written += self.buffer.len() as u64;
        self.stats.leaf_files = self.tree.leaf_files();
        self.buffer.clear();
        self.current_second = None;
        Ok(())
    }

    /// Flush the partial second and rebuild the index. Returns the final counters.
    pub fn finish(&mut self) -> PmuResult<WriterStats> {
        self.flush()?;
        if self.initialized {
            let total = self.tree.finish()?;
            tracing::info!(
                signal = %self.metadata.name,
                points = self.stats.points_written,
                stored = total.count,
                leaves = self.stats.leaf_files,
                "data signal finalized"
            );
        }
        Ok(self.stats)
    }
}

/// Read-only access to a continuous signal tree.
#[derive(Debug, Clone)]
pub struct DataSignalReader {
    config: RootConfig,
    tree: TreeReader<DataRecord>,
}

impl DataSignalReader {
    /// Open the data signal under `root`.
    pub fn open(root: impl Into<PathBuf>) -> PmuResult<Self> {
        let root = root.into();
        let config = RootConfig::open(&root, SignalKind::Data)?;
        Ok(Self {
            config,
            tree: TreeReader::new(root, RecordLayout::default()),
        })
    }

    /// Metadata from `Root.config`.
    pub fn metadata(&self) -> &SignalMetadata {
        &self.config.metadata
    }

    /// At most about `budget` aggregates covering `[start, end)`.
    pub fn trend(&self, start: Ticks, end: Ticks, budget: usize) -> PmuResult<Trend<GraphPoint>> {
        self.tree.trend(start, end, budget)
    }

    /// Single aggregate over `[start, end)`; `NaN` min/max/mean when empty.
    pub fn statistics(&self, start: Ticks, end: Ticks) -> PmuResult<GraphPoint> {
        self.tree.aggregate(start, end)
    }

    /// Every stored sample in `[start, end)`, in time order.
    pub fn read_samples(&self, start: Ticks, end: Ticks) -> PmuResult<Vec<DataRecord>> {
        self.tree.records(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmu_core::{PmuError, TICKS_PER_SECOND};
    use tracing_test::traced_test;

    const BASE: Ticks = 1_710_000_000 * TICKS_PER_SECOND;

    #[test]
    fn nothing_is_created_before_the_first_sample() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sig");
        let mut writer = DataSignalWriter::new(&root, SignalMetadata::named("f"));
        writer.write(BASE, f64::NAN).unwrap();
        let stats = writer.finish().unwrap();
        assert!(!root.exists());
        assert_eq!(stats.nan_skipped, 1);
        assert_eq!(stats.points_written, 0);
    }

    #[test]
    #[traced_test]
    fn out_of_order_samples_are_diverted_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DataSignalWriter::new(dir.path(), SignalMetadata::named("f"))
            .with_out_of_order_capacity(4);
        writer.write(BASE + 10, 1.0).unwrap();
        writer.write(BASE + 5, 2.0).unwrap();
        writer.write(BASE + 10, 3.0).unwrap();
        let stats = writer.finish().unwrap();

        assert_eq!(stats.out_of_order, 1);
        assert_eq!(stats.points_written, 2);
        assert_eq!(writer.out_of_order().map(|r| r.value).collect::<Vec<_>>(), vec![2.0]);
        assert!(logs_contain("out-of-order sample diverted"));

        let reader = DataSignalReader::open(dir.path()).unwrap();
        let samples = reader.read_samples(BASE, BASE + TICKS_PER_SECOND).unwrap();
        assert_eq!(samples.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1.0, 3.0]);
    }

    #[test]
    fn empty_range_statistics_are_nan() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DataSignalWriter::new(dir.path(), SignalMetadata::named("f"));
        writer.write(BASE, 1.0).unwrap();
        writer.finish().unwrap();

        let reader = DataSignalReader::open(dir.path()).unwrap();
        let stats = reader
            .statistics(BASE + 5 * TICKS_PER_SECOND, BASE + 6 * TICKS_PER_SECOND)
            .unwrap();
        assert_eq!(stats.count, 0);
        assert!(stats.min.is_nan() && stats.max.is_nan() && stats.mean().is_nan());
    }

    #[test]
    fn opening_a_missing_signal_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(DataSignalReader::open(dir.path().join("none")), Err(PmuError::Io(_))));
    }
}
