//! Calendar levels of the store and the bucket keys that address them.
//!
//! ```text
//! <signal root>/
//! ├── Root.config
//! ├── summary.node
//! └── 2024/                 Level::Year
//!     ├── summary.node
//!     └── 03/               Level::Month
//!         └── 17/           Level::Day
//!             └── 09/       Level::Hour
//!                 └── 41/   Level::Minute
//!                     ├── summary.node
//!                     ├── 00.bin    Level::Second (leaf)
//!                     └── 01.bin
//! ```

use chrono::{Datelike, NaiveDate, Timelike};
use pmu_core::time::{self, Ticks, TICKS_PER_SECOND};
use std::path::{Path, PathBuf};

/// Extension of leaf files.
pub const LEAF_EXTENSION: &str = "bin";

/// One level of the calendar hierarchy, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Directory `yyyy`.
    Year,
    /// Directory `MM`.
    Month,
    /// Directory `dd`.
    Day,
    /// Directory `HH`.
    Hour,
    /// Directory `mm`.
    Minute,
    /// Leaf file `ss.bin`.
    Second,
}

impl Level {
    /// Every level, coarsest first.
    pub const ALL: [Level; 6] = [
        Level::Year,
        Level::Month,
        Level::Day,
        Level::Hour,
        Level::Minute,
        Level::Second,
    ];

    /// Levels stored as directories (each holds a `summary.node`).
    pub const DIRECTORIES: [Level; 5] = [
        Level::Year,
        Level::Month,
        Level::Day,
        Level::Hour,
        Level::Minute,
    ];

    /// Position in [`Level::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Next finer level.
    pub fn finer(self) -> Option<Level> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Next coarser level.
    pub fn coarser(self) -> Option<Level> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Start of the bucket at this level containing `ticks`.
    pub fn truncate(self, ticks: Ticks) -> Ticks {
        BucketKey::from_ticks(ticks).start_ticks(self)
    }

    /// Start of the bucket following the one containing `ticks`.
    pub fn next_boundary(self, ticks: Ticks) -> Ticks {
        BucketKey::from_ticks(ticks).end_ticks(self)
    }

    /// Number of buckets at this level intersecting `[start, end)`, counting
    /// no further than `cap + 1`.
    pub fn bucket_count(self, start: Ticks, end: Ticks, cap: usize) -> usize {
        let mut count = 0;
        let mut cursor = self.truncate(start);
        while cursor < end && count <= cap {
            count += 1;
            cursor = self.next_boundary(cursor);
        }
        count
    }

    /// Directory or file name of a segment value at this level.
    pub fn segment_name(self, value: u32) -> String {
        match self {
            Level::Year => format!("{value:04}"),
            Level::Second => format!("{value:02}.{LEAF_EXTENSION}"),
            _ => format!("{value:02}"),
        }
    }

    /// Parse a directory or leaf file name back into its segment value.
    pub fn parse_segment(self, name: &str) -> Option<u32> {
        let digits = match self {
            Level::Second => name.strip_suffix(LEAF_EXTENSION)?.strip_suffix('.')?,
            _ => name,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

/// Resolution a trend query returns points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolution {
    /// One aggregate per bucket of the given level.
    Aggregated(Level),
    /// One point per stored sample.
    Raw,
}

impl Resolution {
    /// Pick the resolution for a query over `[start, end)` returning at most
    /// about `budget` points when `native` samples lie in range.
    ///
    /// Raw samples are returned when they fit the budget. Otherwise the finest
    /// level whose bucket count still fits is used, descending level by level
    /// from years.
    pub fn choose(start: Ticks, end: Ticks, budget: usize, native: u64) -> Resolution {
        if native <= budget as u64 {
            return Resolution::Raw;
        }
        let mut chosen = Level::Year;
        for level in Level::ALL {
            if level.bucket_count(start, end, budget) > budget {
                break;
            }
            chosen = level;
        }
        Resolution::Aggregated(chosen)
    }
}

/// Calendar address of a bucket. Components finer than the level a key is used
/// at are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    /// Calendar year.
    pub year: i32,
    /// Month, 1-based.
    pub month: u32,
    /// Day of month, 1-based.
    pub day: u32,
    /// Hour.
    pub hour: u32,
    /// Minute.
    pub minute: u32,
    /// Second.
    pub second: u32,
}

impl BucketKey {
    /// Key whose every component sits at its minimum (used for the root).
    pub const ORIGIN: BucketKey = BucketKey {
        year: 1970,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Key of the second containing `ticks`.
    pub fn from_ticks(ticks: Ticks) -> Self {
        let dt = time::to_datetime(ticks);
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        }
    }

    /// Component addressed at `level`.
    pub fn segment(&self, level: Level) -> u32 {
        match level {
            Level::Year => self.year.max(0) as u32,
            Level::Month => self.month,
            Level::Day => self.day,
            Level::Hour => self.hour,
            Level::Minute => self.minute,
            Level::Second => self.second,
        }
    }

    /// Replace the component at `level` and reset every finer one.
    /// Returns `None` when the result is not a valid calendar date.
    pub fn with_segment(&self, level: Level, value: u32) -> Option<Self> {
        let mut key = *self;
        match level {
            Level::Year => key.year = i32::try_from(value).ok()?,
            Level::Month => key.month = value,
            Level::Day => key.day = value,
            Level::Hour => key.hour = value,
            Level::Minute => key.minute = value,
            Level::Second => key.second = value,
        }
        for finer in Level::ALL.iter().filter(|l| **l > level) {
            match finer {
                Level::Month => key.month = 1,
                Level::Day => key.day = 1,
                Level::Hour => key.hour = 0,
                Level::Minute => key.minute = 0,
                Level::Second => key.second = 0,
                Level::Year => {}
            }
        }
        let date = NaiveDate::from_ymd_opt(key.year, key.month, key.day)?;
        date.and_hms_opt(key.hour, key.minute, key.second)?;
        Some(key)
    }

    /// Start of this key's bucket at `level`.
    pub fn start_ticks(&self, level: Level) -> Ticks {
        let (month, day, hour, minute, second) = match level {
            Level::Year => (1, 1, 0, 0, 0),
            Level::Month => (self.month, 1, 0, 0, 0),
            Level::Day => (self.month, self.day, 0, 0, 0),
            Level::Hour => (self.month, self.day, self.hour, 0, 0),
            Level::Minute => (self.month, self.day, self.hour, self.minute, 0),
            Level::Second => (self.month, self.day, self.hour, self.minute, self.second),
        };
        civil_ticks(self.year, month, day, hour, minute, second)
    }

    /// End (exclusive) of this key's bucket at `level`.
    pub fn end_ticks(&self, level: Level) -> Ticks {
        let start = self.start_ticks(level);
        match level {
            Level::Year => civil_ticks(self.year + 1, 1, 1, 0, 0, 0),
            Level::Month => {
                if self.month == 12 {
                    civil_ticks(self.year + 1, 1, 1, 0, 0, 0)
                } else {
                    civil_ticks(self.year, self.month + 1, 1, 0, 0, 0)
                }
            }
            Level::Day => start.saturating_add(86_400 * TICKS_PER_SECOND),
            Level::Hour => start.saturating_add(3_600 * TICKS_PER_SECOND),
            Level::Minute => start.saturating_add(60 * TICKS_PER_SECOND),
            Level::Second => start.saturating_add(TICKS_PER_SECOND),
        }
    }

    /// Directory of this key at `level` (`level` must be a directory level).
    pub fn directory(&self, root: &Path, level: Level) -> PathBuf {
        let mut path = root.to_path_buf();
        for l in Level::DIRECTORIES.iter().filter(|l| **l <= level) {
            path.push(l.segment_name(self.segment(*l)));
        }
        path
    }

    /// Leaf file holding this key's second.
    pub fn leaf_path(&self, root: &Path) -> PathBuf {
        self.directory(root, Level::Minute)
            .join(Level::Second.segment_name(self.second))
    }

    /// Coarsest directory level at which `self` and `other` differ, if any.
    pub fn first_divergence(&self, other: &BucketKey) -> Option<Level> {
        Level::DIRECTORIES
            .into_iter()
            .find(|level| self.segment(*level) != other.segment(*level))
    }
}

fn civil_ticks(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Ticks {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map_or(Ticks::MAX, |naive| time::from_datetime(naive.and_utc()))
}
