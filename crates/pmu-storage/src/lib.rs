//! `pmu-storage`
//!
//! Multi-resolution on-disk store for continuous values and events.
//!
//! Each signal lives in its own directory tree partitioned by calendar level
//! (year, month, day, hour, minute) with one leaf file per observed second.
//! Every directory carries a `summary.node` aggregate of its subtree, so
//! range statistics and trend queries read a handful of files regardless of
//! how many samples the range holds.
//!
//! ## Key Types
//!
//! - [`DataSignalWriter`] / [`DataSignalReader`]: continuous values summarized as
//!   [`pmu_core::GraphPoint`]
//! - [`EventSignalWriter`] / [`EventSignalReader`]: events summarized as [`pmu_core::EventSummary`]
//! - [`Level`] / [`Resolution`]: calendar levels and trend resolution selection
//! - [`WriterStats`]: counters reported when a writer finishes

pub mod data;
pub mod event;
pub mod level;
pub mod record;
pub mod root_config;
pub mod stats;
pub mod tree;

pub use data::{DataSignalReader, DataSignalWriter, DEFAULT_OUT_OF_ORDER_CAPACITY};
pub use event::{EventSignalReader, EventSignalWriter};
pub use level::{BucketKey, Level, Resolution};
pub use record::{DataRecord, EventRecord, LeafRecord, RecordLayout};
pub use root_config::{RootConfig, SignalKind, SignalMetadata};
pub use stats::WriterStats;
pub use tree::Trend;
