//! Writer counters and the out-of-order diagnostic log.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Counters reported by a signal writer when it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    /// Samples or real events persisted.
    pub points_written: u64,
    /// Leaf files written (one per flushed second).
    pub leaf_files: u64,
    /// Inputs dropped because their value was `NaN`.
    pub nan_skipped: u64,
    /// Inputs diverted because they arrived earlier than the last accepted one.
    pub out_of_order: u64,
    /// Events dropped because their parameter names differ from the stored schema.
    pub schema_rejects: u64,
    /// Synthetic spillover records persisted.
    pub spillover_records: u64,
    /// Inputs of the wrong kind for this writer (a plain value sent to an event signal).
    pub kind_mismatch: u64,
    /// Events dropped because their duration is not finite or runs past the tick range.
    pub invalid_durations: u64,
}

/// Bounded diagnostic list of out-of-order inputs. Oldest entries are dropped
/// once the capacity is reached; `total` keeps counting.
#[derive(Debug, Clone)]
pub struct OutOfOrderLog<T> {
    capacity: usize,
    items: VecDeque<T>,
    total: u64,
}

impl<T> OutOfOrderLog<T> {
    /// Log keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(1024)),
            total: 0,
        }
    }

    /// Record an entry, dropping the oldest when full.
    pub fn push(&mut self, item: T) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Kept entries, oldest first.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Number of kept entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` when nothing is kept.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries recorded, dropped ones included.
    pub fn total(&self) -> u64 {
        self.total
    }
}
