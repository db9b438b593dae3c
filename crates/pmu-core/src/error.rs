//! Custom error types for the pipeline.
//!
//! `PmuError` is the single error type shared by the store and the pipeline
//! stages. Plugin boundaries (analytics and frame sources) use `anyhow` and are
//! folded into one of these variants where they cross into the core.
//!
//! ## Error Categories
//!
//! 1. **Configuration Errors** - `Configuration`, `AnalyticNotFound`, `SourceUnavailable`
//!    - Occur while a run is being assembled
//!    - Recovery: fix the configuration and start the run again
//!
//! 2. **Persistence Errors** - `Io`, `CorruptFile`, `SignalKindMismatch`
//!    - Occur inside writers and readers
//!    - A writer that hits one of these faults the run it belongs to
//!
//! 3. **Runtime Errors** - `Source`, `ChannelClosed`, `TaskFailed`, `Cancelled`
//!    - Occur while stages are streaming frames

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the pipeline error type.
pub type PmuResult<T> = std::result::Result<T, PmuError>;

/// Primary error type for the pipeline and the signal store.
#[derive(Error, Debug)]
pub enum PmuError {
    /// Standard I/O operation failed.
    ///
    /// Raised by the store when a leaf file, `summary.node` or `Root.config`
    /// cannot be created, read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration validation failed.
    ///
    /// Values parsed correctly but are logically invalid (empty ids, duplicate
    /// output keys, non-positive rates).
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// No analytic factory is registered under the requested type id.
    #[error("Analytic type '{0}' is not registered")]
    AnalyticNotFound(String),

    /// The frame source could not be instantiated; the run never starts.
    #[error("Frame source '{source_type}' unavailable: {message}")]
    SourceUnavailable {
        /// Registry id of the source adapter.
        source_type: String,
        /// Reason reported by the factory.
        message: String,
    },

    /// The frame source failed while producing frames.
    #[error("Frame source error: {0}")]
    Source(String),

    /// A stored file does not have the expected layout.
    #[error("Corrupt file {path}: {reason}")]
    CorruptFile {
        /// Offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A reader was opened on a tree written for the other signal kind.
    #[error("Signal at {path} is stored as {found}, expected {expected}")]
    SignalKindMismatch {
        /// Signal root directory.
        path: PathBuf,
        /// Kind the caller asked for.
        expected: String,
        /// Kind recorded in `Root.config`.
        found: String,
    },

    /// A downstream queue was dropped while a stage still had output for it.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// A spawned stage or analytic task panicked or was aborted.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The run was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,
}

impl PmuError {
    /// Build a [`PmuError::CorruptFile`] for `path`.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error only reflects cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PmuError::Configuration("storage root is empty".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: storage root is empty"
        );
    }

    #[test]
    fn test_source_unavailable_display() {
        let err = PmuError::SourceUnavailable {
            source_type: "historian".into(),
            message: "not registered".into(),
        };
        assert!(err
            .to_string()
            .contains("Frame source 'historian' unavailable"));
    }

    #[test]
    fn test_corrupt_helper() {
        let err = PmuError::corrupt("/tmp/x/05.bin", "truncated header");
        assert!(err.to_string().contains("05.bin"));
        assert!(!err.is_cancelled());
        assert!(PmuError::Cancelled.is_cancelled());
    }
}
