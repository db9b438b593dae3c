//! Pipeline configuration using Figment.
//!
//! Loaded from a TOML file, then overridden by environment variables prefixed
//! with `PMU_` (nested keys separated by `__`, e.g.
//! `PMU_STORAGE__ROOT=/data/pmu`).
//!
//! ```toml
//! [application]
//! name = "substation-7"
//! log_level = "info"
//!
//! [storage]
//! root = "/data/pmu"
//!
//! [source]
//! type = "synthetic"
//! frames_per_second = 30.0
//! settings = { channels = ["F", "VA"], duration_secs = 60 }
//!
//! [[sections]]
//! name = "smoothing"
//! conflict_policy = "last_wins"
//!
//! [[sections.analytics]]
//! name = "f-avg"
//! type = "moving_average"
//! settings = { window = 5 }
//! inputs = { input = "F" }
//! outputs = { average = "F.avg" }
//!
//! [[outputs]]
//! key = "F.avg"
//! kind = "data"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use pmu_core::{ConflictPolicy, PmuError, PmuResult, SignalKey};
use pmu_storage::{SignalKind, SignalMetadata, DEFAULT_OUT_OF_ORDER_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::telemetry::{parse_log_level, OutputFormat};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Run name and logging.
    pub application: ApplicationConfig,
    /// Store location and writer limits.
    pub storage: StorageConfig,
    /// Frame source of the run.
    pub source: SourceConfig,
    /// Section templates, applied in order.
    #[serde(default)]
    pub sections: Vec<SectionTemplate>,
    /// Signals persisted at the end of the chain.
    #[serde(default)]
    pub outputs: Vec<OutputSignal>,
}

/// `[application]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Run name, used in logs.
    pub name: String,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// `[storage]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one subtree per output signal.
    pub root: PathBuf,
    /// Cap of each writer's out-of-order diagnostic list.
    #[serde(default = "default_out_of_order_capacity")]
    pub out_of_order_capacity: usize,
}

/// `[source]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source registry id (e.g. "memory", "synthetic").
    pub r#type: String,
    /// Nominal rate; `0` lets the source report its own.
    #[serde(default)]
    pub frames_per_second: f64,
    /// Source-specific settings (dynamic).
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// One stage of the processing chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionTemplate {
    /// Section label used in messages and logs.
    pub name: String,
    /// How colliding output keys are merged.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Analytics of the section, in declaration order.
    #[serde(default)]
    pub analytics: Vec<AnalyticTemplate>,
}

/// One analytic instance within a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticTemplate {
    /// Instance label used in messages and logs.
    pub name: String,
    /// Analytic registry id.
    pub r#type: String,
    /// Analytic-specific settings, passed to `configure`.
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Analytic input name -> upstream signal key.
    #[serde(default)]
    pub inputs: BTreeMap<String, SignalKey>,
    /// Analytic output name -> downstream signal key.
    #[serde(default)]
    pub outputs: BTreeMap<String, SignalKey>,
}

/// A signal persisted by the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSignal {
    /// Signal key routed to this writer.
    pub key: SignalKey,
    /// Data or event store.
    #[serde(default)]
    pub kind: SignalKind,
    /// Subdirectory under the storage root; derived from the key when absent.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Metadata written to `Root.config`.
    #[serde(default)]
    pub metadata: SignalMetadata,
}

impl OutputSignal {
    /// Root directory of this signal's tree under `storage_root`.
    pub fn root(&self, storage_root: &Path) -> PathBuf {
        match &self.directory {
            Some(dir) => storage_root.join(dir),
            None => storage_root.join(sanitize(self.key.as_str())),
        }
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_out_of_order_capacity() -> usize {
    DEFAULT_OUT_OF_ORDER_CAPACITY
}

impl PipelineConfig {
    /// Load from a TOML file and `PMU_` environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PMU_").split("__"))
            .extract()
    }

    /// Parse an in-memory TOML document (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::string(toml)).extract()
    }

    /// Render the effective configuration (after environment overrides) as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check values that parse but cannot run.
    pub fn validate(&self) -> PmuResult<()> {
        let invalid = |msg: String| Err(PmuError::Configuration(msg));

        parse_log_level(&self.application.log_level).map_err(PmuError::Configuration)?;
        if self.application.name.trim().is_empty() {
            return invalid("application name is empty".into());
        }
        if self.storage.root.as_os_str().is_empty() {
            return invalid("storage root is empty".into());
        }
        if self.source.r#type.trim().is_empty() {
            return invalid("source type is empty".into());
        }
        if !(self.source.frames_per_second.is_finite() && self.source.frames_per_second >= 0.0) {
            return invalid(format!(
                "source frames_per_second must be non-negative, got {}",
                self.source.frames_per_second
            ));
        }

        let mut sections = HashSet::new();
        for section in &self.sections {
            if section.name.trim().is_empty() {
                return invalid("section name is empty".into());
            }
            if !sections.insert(section.name.as_str()) {
                return invalid(format!("Duplicate section name: {}", section.name));
            }
            for analytic in &section.analytics {
                if analytic.name.trim().is_empty() || analytic.r#type.trim().is_empty() {
                    return invalid(format!(
                        "section '{}' has an analytic without name or type",
                        section.name
                    ));
                }
            }
        }

        let mut keys = HashSet::new();
        let mut roots = HashSet::new();
        for output in &self.outputs {
            if output.key.as_str().is_empty() {
                return invalid("output signal key is empty".into());
            }
            if !keys.insert(&output.key) {
                return invalid(format!("Duplicate output key: {}", output.key));
            }
            if !roots.insert(output.root(&self.storage.root)) {
                return invalid(format!(
                    "output '{}' shares a directory with another output",
                    output.key
                ));
            }
            let fps = output.metadata.frames_per_second;
            if !(fps.is_finite() && fps >= 0.0) {
                return invalid(format!(
                    "output '{}' has invalid frames_per_second {fps}",
                    output.key
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [application]
        name = "unit"

        [storage]
        root = "/tmp/pmu-store"

        [source]
        type = "synthetic"
        frames_per_second = 30.0
        settings = { channels = ["F"], duration_secs = 2 }

        [[sections]]
        name = "smooth"
        conflict_policy = "first_wins"

        [[sections.analytics]]
        name = "f-avg"
        type = "moving_average"
        settings = { window = 3 }
        inputs = { input = "F" }
        outputs = { average = "F.avg" }

        [[outputs]]
        key = "F.avg"

        [[outputs]]
        key = "F/excursion"
        kind = "event"
        metadata = { name = "F excursion", frames_per_second = 30.0 }
    "#;

    #[test]
    fn test_parse_and_defaults() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.storage.out_of_order_capacity, DEFAULT_OUT_OF_ORDER_CAPACITY);
        assert_eq!(config.sections[0].conflict_policy, ConflictPolicy::FirstWins);
        let analytic = &config.sections[0].analytics[0];
        assert_eq!(analytic.inputs.get("input"), Some(&SignalKey::new("F")));
        assert_eq!(analytic.settings["window"], 3);
        assert_eq!(config.outputs[0].kind, SignalKind::Data);
        assert_eq!(config.outputs[1].kind, SignalKind::Event);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_directories_are_sanitized() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            config.outputs[1].root(Path::new("/store")),
            PathBuf::from("/store/F_excursion")
        );
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        config.outputs[1].key = SignalKey::new("F.avg");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate output key: F.avg"));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        config.application.log_level = "loud".into();
        assert!(matches!(config.validate(), Err(PmuError::Configuration(_))));
    }

    #[test]
    fn test_effective_config_round_trips() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let rendered = config.to_toml_string().unwrap();
        let reparsed = PipelineConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed.outputs.len(), 2);
        assert_eq!(
            reparsed.sections[0].analytics[0].outputs,
            config.sections[0].analytics[0].outputs
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = PipelineConfig::load_from(&path).unwrap();
        assert_eq!(config.application.name, "unit");
    }
}
