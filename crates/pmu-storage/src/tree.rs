//! Generic hierarchical tree shared by the data and event stores.
//!
//! [`TreeWriter`] appends one leaf per whole second and keeps a running
//! aggregate per directory level. When a flushed leaf lands in a different
//! directory than the previous one, every finished directory is closed from
//! the finest level to the coarsest: its aggregate is written to
//! `summary.node`, folded into its parent's running aggregate, and reset.
//!
//! [`TreeReader`] answers range aggregates and trend queries, preferring
//! `summary.node` and leaf headers for buckets fully inside the range and
//! recomputing from children otherwise.

use bytes::Buf;
use pmu_core::{Aggregate, PmuError, PmuResult, Ticks};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::level::{BucketKey, Level, Resolution};
use crate::record::{LeafRecord, RecordLayout};

/// File name of per-directory aggregates.
pub const SUMMARY_FILE: &str = "summary.node";

/// Result of a trend query.
#[derive(Debug, Clone, PartialEq)]
pub struct Trend<S> {
    /// Level the points are aggregated at.
    pub resolution: Resolution,
    /// One aggregate per non-empty bucket (or per record at `Raw`), in time order.
    pub points: Vec<S>,
}

/// Read a `summary.node`, `Ok(None)` when it does not exist.
pub fn read_summary<S: Aggregate>(path: &Path) -> PmuResult<Option<S>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    S::decode(&mut bytes.as_slice())
        .map(Some)
        .ok_or_else(|| PmuError::corrupt(path, "truncated summary"))
}

/// Write a `summary.node`.
pub fn write_summary<S: Aggregate>(path: &Path, summary: &S) -> PmuResult<()> {
    let mut buf = Vec::with_capacity(S::ENCODED_LEN);
    summary.encode(&mut buf);
    std::fs::write(path, buf)?;
    Ok(())
}

/// Read a leaf file: its header and every record.
pub fn read_leaf<R: LeafRecord>(
    path: &Path,
    layout: &RecordLayout,
) -> PmuResult<(R::Summary, Vec<R>)> {
    let bytes = std::fs::read(path)?;
    let mut buf = bytes.as_slice();
    let header =
        R::Summary::decode(&mut buf).ok_or_else(|| PmuError::corrupt(path, "truncated header"))?;
    let record_len = R::encoded_len(layout);
    if buf.remaining() % record_len != 0 {
        return Err(PmuError::corrupt(
            path,
            format!("{} trailing bytes after records", buf.remaining() % record_len),
        ));
    }
    let mut records = Vec::with_capacity(buf.remaining() / record_len);
    while let Some(record) = R::decode(&mut buf, layout) {
        records.push(record);
    }
    Ok((header, records))
}

fn read_leaf_header<S: Aggregate>(path: &Path) -> PmuResult<S> {
    let bytes = std::fs::read(path)?;
    S::decode(&mut bytes.as_slice()).ok_or_else(|| PmuError::corrupt(path, "truncated header"))
}

/// Numeric children of `dir` at `level`, sorted. Anything else is ignored.
fn list_children(dir: &Path, level: Level) -> PmuResult<Vec<u32>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut values = Vec::new();
    for entry in entries {
        let entry = entry?;
        let is_dir = entry.file_type()?.is_dir();
        if is_dir == (level == Level::Second) {
            continue;
        }
        if let Some(value) = entry.file_name().to_str().and_then(|n| level.parse_segment(n)) {
            values.push(value);
        }
    }
    values.sort_unstable();
    Ok(values)
}

/// Child bucket keys of `parent` (the root when `None`).
fn child_keys(
    root: &Path,
    parent: Option<(BucketKey, Level)>,
) -> PmuResult<(Level, Vec<BucketKey>)> {
    let (base, dir, level) = match parent {
        None => (BucketKey::ORIGIN, root.to_path_buf(), Level::Year),
        Some((key, level)) => match level.finer() {
            Some(finer) => (key, key.directory(root, level), finer),
            None => return Ok((level, Vec::new())),
        },
    };
    let keys = list_children(&dir, level)?
        .into_iter()
        .filter_map(|v| base.with_segment(level, v))
        .collect();
    Ok((level, keys))
}

/// Append-only writer of one signal tree.
#[derive(Debug)]
pub struct TreeWriter<R: LeafRecord> {
    root: PathBuf,
    layout: RecordLayout,
    active: Option<BucketKey>,
    running: [R::Summary; 5],
    root_summary: R::Summary,
    leaf_files: u64,
}

impl<R: LeafRecord> TreeWriter<R> {
    /// Writer for the tree under `root`.
    pub fn new(root: impl Into<PathBuf>, layout: RecordLayout) -> Self {
        Self {
            root: root.into(),
            layout,
            active: None,
            running: [R::Summary::empty(); 5],
            root_summary: R::Summary::empty(),
            leaf_files: 0,
        }
    }

    /// Tree root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Leaf files written so far.
    pub fn leaf_files(&self) -> u64 {
        self.leaf_files
    }

    /// Write the leaf for the second containing `records[0]` and update the
    /// running aggregates. Records must be sorted and share one second.
    pub fn write_leaf(&mut self, records: &[R]) -> PmuResult<R::Summary> {
        let Some(first) = records.first() else {
            return Ok(R::Summary::empty());
        };
        let key = BucketKey::from_ticks(first.ticks());
        if let Some(level) = self.active.and_then(|active| active.first_divergence(&key)) {
            self.close_from(level)?;
        }

        let header = pmu_core::fold(records.iter().map(LeafRecord::summary));
        let mut buf = Vec::with_capacity(
            R::Summary::ENCODED_LEN + records.len() * R::encoded_len(&self.layout),
        );
        header.encode(&mut buf);
        for record in records {
            record.encode(&mut buf);
        }

        let path = key.leaf_path(&self.root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, buf)?;
        tracing::trace!(path = %path.display(), records = records.len(), "leaf written");

        let minute = Level::Minute.index();
        self.running[minute] = self.running[minute].merge(&header);
        self.active = Some(key);
        self.leaf_files += 1;
        Ok(header)
    }

    /// Close every directory level from `Minute` up to and including `level`.
    fn close_from(&mut self, level: Level) -> PmuResult<()> {
        let Some(active) = self.active else {
            return Ok(());
        };
        for lv in Level::DIRECTORIES.into_iter().rev().filter(|lv| *lv >= level) {
            let i = lv.index();
            let summary = self.running[i];
            write_summary(&active.directory(&self.root, lv).join(SUMMARY_FILE), &summary)?;
            match lv.coarser() {
                Some(parent) => {
                    let p = parent.index();
                    self.running[p] = self.running[p].merge(&summary);
                }
                None => self.root_summary = self.root_summary.merge(&summary),
            }
            self.running[i] = R::Summary::empty();
        }
        Ok(())
    }

    /// Close all pending levels, write the root summary and rebuild the whole
    /// index bottom-up from leaf headers.
    pub fn finish(&mut self) -> PmuResult<R::Summary> {
        if self.active.is_some() {
            self.close_from(Level::Year)?;
            write_summary(&self.root.join(SUMMARY_FILE), &self.root_summary)?;
            self.active = None;
        }
        if !self.root.exists() {
            return Ok(R::Summary::empty());
        }
        let rebuilt = rebuild_index::<R::Summary>(&self.root)?;
        self.root_summary = R::Summary::empty();
        Ok(rebuilt)
    }
}

/// Recompute and rewrite every `summary.node` under `root` from leaf headers.
pub fn rebuild_index<S: Aggregate>(root: &Path) -> PmuResult<S> {
    let summary = rebuild_children::<S>(root, None)?;
    write_summary(&root.join(SUMMARY_FILE), &summary)?;
    Ok(summary)
}

fn rebuild_children<S: Aggregate>(root: &Path, parent: Option<(BucketKey, Level)>) -> PmuResult<S> {
    let (level, keys) = child_keys(root, parent)?;
    let mut acc = S::empty();
    for key in keys {
        let summary = if level == Level::Second {
            read_leaf_header::<S>(&key.leaf_path(root))?
        } else {
            let summary = rebuild_children::<S>(root, Some((key, level)))?;
            write_summary(&key.directory(root, level).join(SUMMARY_FILE), &summary)?;
            summary
        };
        acc = acc.merge(&summary);
    }
    Ok(acc)
}

/// Read-only view of one signal tree.
#[derive(Debug, Clone)]
pub struct TreeReader<R: LeafRecord> {
    root: PathBuf,
    layout: RecordLayout,
    _records: PhantomData<fn() -> R>,
}

impl<R: LeafRecord> TreeReader<R> {
    /// Reader for the tree under `root`.
    pub fn new(root: impl Into<PathBuf>, layout: RecordLayout) -> Self {
        Self {
            root: root.into(),
            layout,
            _records: PhantomData,
        }
    }

    /// Aggregate of everything in `[start, end)`.
    pub fn aggregate(&self, start: Ticks, end: Ticks) -> PmuResult<R::Summary> {
        if end <= start {
            return Ok(R::Summary::empty());
        }
        self.aggregate_children(None, start, end)
    }

    fn aggregate_children(
        &self,
        parent: Option<(BucketKey, Level)>,
        start: Ticks,
        end: Ticks,
    ) -> PmuResult<R::Summary> {
        let (level, keys) = child_keys(&self.root, parent)?;
        let mut acc = R::Summary::empty();
        for key in keys {
            if intersects(&key, level, start, end) {
                acc = acc.merge(&self.bucket(&key, level, start, end)?);
            }
        }
        Ok(acc)
    }

    /// Aggregate of the part of bucket (`key`, `level`) inside `[start, end)`.
    fn bucket(
        &self,
        key: &BucketKey,
        level: Level,
        start: Ticks,
        end: Ticks,
    ) -> PmuResult<R::Summary> {
        let inside = start <= key.start_ticks(level) && key.end_ticks(level) <= end;
        if level == Level::Second {
            let path = key.leaf_path(&self.root);
            if inside {
                return read_leaf_header(&path);
            }
            let (_, records) = read_leaf::<R>(&path, &self.layout)?;
            return Ok(pmu_core::fold(
                records
                    .iter()
                    .filter(|r| (start..end).contains(&r.ticks()))
                    .map(LeafRecord::summary),
            ));
        }
        if inside {
            let path = key.directory(&self.root, level).join(SUMMARY_FILE);
            if let Some(summary) = read_summary(&path)? {
                return Ok(summary);
            }
            tracing::debug!(path = %path.display(), "summary missing, recomputing from children");
        }
        self.aggregate_children(Some((*key, level)), start, end)
    }

    /// Approximate series over `[start, end)` with at most about `budget` points.
    pub fn trend(&self, start: Ticks, end: Ticks, budget: usize) -> PmuResult<Trend<R::Summary>> {
        let stored = self.aggregate(start, end)?;
        // Only the stored extent counts towards bucket math.
        let (start, end) = match stored.time_range() {
            Some((first, last)) => (start.max(first), end.min(last.saturating_add(1))),
            None => (start, start),
        };
        let resolution = Resolution::choose(start, end, budget.max(1), stored.sample_count());
        let mut points = Vec::new();
        if end > start {
            match resolution {
                Resolution::Raw => {
                    points = self.records(start, end)?.iter().map(LeafRecord::summary).collect();
                }
                Resolution::Aggregated(target) => {
                    self.collect(None, target, start, end, &mut points)?;
                }
            }
        }
        Ok(Trend { resolution, points })
    }

    fn collect(
        &self,
        parent: Option<(BucketKey, Level)>,
        target: Level,
        start: Ticks,
        end: Ticks,
        out: &mut Vec<R::Summary>,
    ) -> PmuResult<()> {
        let (level, keys) = child_keys(&self.root, parent)?;
        for key in keys {
            if !intersects(&key, level, start, end) {
                continue;
            }
            if level == target {
                let summary = self.bucket(&key, level, start, end)?;
                if !summary.is_empty() {
                    out.push(summary);
                }
            } else {
                self.collect(Some((key, level)), target, start, end, out)?;
            }
        }
        Ok(())
    }

    /// Every stored record in `[start, end)` in time order.
    pub fn records(&self, start: Ticks, end: Ticks) -> PmuResult<Vec<R>> {
        let mut out = Vec::new();
        if end > start {
            self.collect_records(None, start, end, &mut out)?;
        }
        Ok(out)
    }

    fn collect_records(
        &self,
        parent: Option<(BucketKey, Level)>,
        start: Ticks,
        end: Ticks,
        out: &mut Vec<R>,
    ) -> PmuResult<()> {
        let (level, keys) = child_keys(&self.root, parent)?;
        for key in keys {
            if !intersects(&key, level, start, end) {
                continue;
            }
            if level == Level::Second {
                let (_, records) = read_leaf::<R>(&key.leaf_path(&self.root), &self.layout)?;
                out.extend(records.into_iter().filter(|r| (start..end).contains(&r.ticks())));
            } else {
                self.collect_records(Some((key, level)), start, end, out)?;
            }
        }
        Ok(())
    }
}

fn intersects(key: &BucketKey, level: Level, start: Ticks, end: Ticks) -> bool {
    key.start_ticks(level) < end && start < key.end_ticks(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DataRecord;
    use pmu_core::{GraphPoint, TICKS_PER_SECOND};

    const BASE: Ticks = 1_700_000_000 * TICKS_PER_SECOND;

    fn second(offset: i64, values: &[f64]) -> Vec<DataRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DataRecord {
                ticks: BASE + offset * TICKS_PER_SECOND + i as i64 * 1000,
                value: *v,
            })
            .collect()
    }

    #[test]
    fn writer_closes_directories_as_it_crosses_them() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TreeWriter::<DataRecord>::new(dir.path(), RecordLayout::default());

        writer.write_leaf(&second(0, &[1.0, 2.0])).unwrap();
        let minute_dir = BucketKey::from_ticks(BASE).directory(dir.path(), Level::Minute);
        assert!(!minute_dir.join(SUMMARY_FILE).exists());

        // Far enough to change the minute.
        writer.write_leaf(&second(120, &[5.0])).unwrap();
        let closed: GraphPoint = read_summary(&minute_dir.join(SUMMARY_FILE)).unwrap().unwrap();
        assert_eq!(closed.count, 2);
        assert_eq!(closed.max, 2.0);

        let total: GraphPoint = writer.finish().unwrap();
        assert_eq!(total.count, 3);
        let root: GraphPoint = read_summary(&dir.path().join(SUMMARY_FILE)).unwrap().unwrap();
        assert_eq!(root, total);
        assert_eq!(writer.leaf_files(), 2);
    }

    #[test]
    fn rebuild_replaces_stale_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TreeWriter::<DataRecord>::new(dir.path(), RecordLayout::default());
        writer.write_leaf(&second(0, &[1.0])).unwrap();
        writer.write_leaf(&second(1, &[3.0])).unwrap();
        writer.finish().unwrap();

        let hour_dir = BucketKey::from_ticks(BASE).directory(dir.path(), Level::Hour);
        write_summary(&hour_dir.join(SUMMARY_FILE), &GraphPoint::from_sample(0, 99.0)).unwrap();

        let rebuilt: GraphPoint = rebuild_index(dir.path()).unwrap();
        assert_eq!(rebuilt.count, 2);
        let hour: GraphPoint = read_summary(&hour_dir.join(SUMMARY_FILE)).unwrap().unwrap();
        assert_eq!(hour.max, 3.0);
    }

    #[test]
    fn reader_recomputes_missing_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TreeWriter::<DataRecord>::new(dir.path(), RecordLayout::default());
        writer.write_leaf(&second(0, &[1.0, 4.0])).unwrap();
        writer.write_leaf(&second(1, &[2.0])).unwrap();
        writer.finish().unwrap();

        let key = BucketKey::from_ticks(BASE);
        for level in [Level::Year, Level::Month, Level::Day] {
            std::fs::remove_file(key.directory(dir.path(), level).join(SUMMARY_FILE)).unwrap();
        }

        let reader = TreeReader::<DataRecord>::new(dir.path(), RecordLayout::default());
        let span = TICKS_PER_SECOND * 86_400 * 400;
        let all = reader.aggregate(BASE - span, BASE + span).unwrap();
        assert_eq!(all.count, 3);
        assert_eq!(all.max, 4.0);

        let partial = reader.aggregate(BASE + 500, BASE + 2 * TICKS_PER_SECOND).unwrap();
        assert_eq!(partial.count, 2);
        assert_eq!(partial.min, 2.0);
    }

    #[test]
    fn stray_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TreeWriter::<DataRecord>::new(dir.path(), RecordLayout::default());
        writer.write_leaf(&second(0, &[1.0])).unwrap();
        writer.finish().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir_all(dir.path().join("backup")).unwrap();

        let reader = TreeReader::<DataRecord>::new(dir.path(), RecordLayout::default());
        assert_eq!(reader.records(BASE, BASE + TICKS_PER_SECOND).unwrap().len(), 1);
    }

    #[test]
    fn truncated_leaf_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00.bin");
        std::fs::write(&path, [0u8; 12]).unwrap();
        let err = read_leaf::<DataRecord>(&path, &RecordLayout::default()).unwrap_err();
        assert!(matches!(err, PmuError::CorruptFile { .. }));
    }
}
