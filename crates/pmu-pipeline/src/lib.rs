//! `pmu-pipeline`
//!
//! Streams frames from a source through configurable sections of analytics
//! and persists selected signals into the hierarchical store.
//!
//! ## Stages
//!
//! - [`source`]: [`FrameSource`] adapters and their registry
//! - [`analytic_processor`]: one analytic instance with its routing, rate gate and history
//! - [`signal_processor`]: a section running its analytics concurrently per frame
//! - [`sink`]: writer tasks in front of `pmu-storage`
//! - [`task_processor`]: wires the stages for one run and reports how it ended
//!
//! Configuration is loaded with [`config::PipelineConfig`]; logging is set up
//! by [`telemetry`].

pub mod analytic_processor;
pub mod analytics;
pub mod cancel;
pub mod config;
pub mod signal_processor;
pub mod sink;
pub mod source;
pub mod task_processor;
pub mod telemetry;

pub use analytic_processor::{adjust_signal, AnalyticProcessor, RouteCounts, SignalRates};
pub use analytics::{builtin_registry, register_builtins};
pub use cancel::{CancelHandle, CancelSignal};
pub use config::{
    AnalyticTemplate, ApplicationConfig, OutputSignal, PipelineConfig, SectionTemplate,
    SourceConfig, StorageConfig,
};
pub use signal_processor::{SectionStats, SignalProcessor};
pub use sink::SignalSink;
pub use source::{FrameSource, MemorySource, SourceRegistry, SyntheticSource};
pub use task_processor::{RunReport, RunState, TaskProcessor};
