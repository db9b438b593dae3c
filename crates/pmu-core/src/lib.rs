//! `pmu-core`
//!
//! Core data model and plugin contracts for the phasor analytics pipeline.
//!
//! This crate holds everything the store and the pipeline stages share: the
//! frame model, the associative aggregates kept by the signal store, the
//! analytic plugin contract with its registry, the message channel and the
//! error type.
//!
//! ## Key Types
//!
//! - [`Frame`] / [`Measurement`]: timestamped signal values and events
//! - [`GraphPoint`] / [`EventSummary`]: associative aggregates ([`Aggregate`])
//! - [`Analytic`]: the per-frame transform contract, created through [`AnalyticRegistry`]
//! - [`MessageBus`]: the info/warning/error channel
//! - [`PmuError`]: the shared error type

pub mod aggregate;
pub mod analytic;
pub mod data;
pub mod error;
pub mod messages;
pub mod registry;
pub mod time;

pub use aggregate::{fold, Aggregate, EventSummary, GraphPoint};
pub use analytic::{Analytic, AnalyticFrame, AnalyticOutputDescriptor, MeasurementType, Phase};
pub use data::{
    ConflictPolicy, Event, EventParameter, Frame, Measurement, MergeOutcome, SignalKey,
    TimeSeriesValue,
};
pub use error::{PmuError, PmuResult};
pub use messages::{MessageBus, MessageSeverity, ProcessMessage};
pub use registry::AnalyticRegistry;
pub use time::{Ticks, TICKS_PER_SECOND};
