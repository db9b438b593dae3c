//! `Root.config`: signal metadata stored at the root of each signal tree.
//!
//! Plain text, one field per line:
//!
//! ```text
//! [EVENT]            (event signals only)
//! name
//! deviceId
//! signalId
//! description
//! phase
//! type
//! framesPerSecond
//! [parameter names]  (event signals only, one per line)
//! ```

use pmu_core::{MeasurementType, Phase, PmuError, PmuResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// File name of the metadata file.
pub const ROOT_CONFIG_FILE: &str = "Root.config";

const EVENT_MARKER: &str = "EVENT";

/// Lines holding [`SignalMetadata`], marker and parameters excluded.
const METADATA_FIELDS: usize = 7;

/// Which store layout a signal tree uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Continuous values.
    #[default]
    Data,
    /// Duration-bearing events.
    Event,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Data => f.write_str("data"),
            SignalKind::Event => f.write_str("event"),
        }
    }
}

/// Descriptive metadata of a stored signal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalMetadata {
    /// Display name.
    pub name: String,
    /// Measuring device.
    pub device_id: String,
    /// Signal id on the device.
    pub signal_id: String,
    /// Free text.
    pub description: String,
    /// Electrical phase.
    pub phase: Phase,
    /// Measured quantity.
    pub measurement_type: MeasurementType,
    /// Nominal rate, `0` when unknown.
    pub frames_per_second: f64,
}

impl SignalMetadata {
    /// Metadata with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Parsed contents of a `Root.config`.
#[derive(Debug, Clone, PartialEq)]
pub struct RootConfig {
    /// Store layout.
    pub kind: SignalKind,
    /// Signal metadata.
    pub metadata: SignalMetadata,
    /// Event parameter names; empty for data signals.
    pub parameters: Vec<String>,
}

impl RootConfig {
    /// Location of the config under `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(ROOT_CONFIG_FILE)
    }

    /// Read the config under `root`, `Ok(None)` when the signal was never written.
    pub fn read(root: &Path) -> PmuResult<Option<Self>> {
        let path = Self::path(root);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text, &path).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the config of an existing signal, checking its kind.
    pub fn open(root: &Path, kind: SignalKind) -> PmuResult<Self> {
        let config = Self::read(root)?.ok_or_else(|| {
            PmuError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no signal stored at {}", root.display()),
            ))
        })?;
        config.expect_kind(root, kind)?;
        Ok(config)
    }

    /// Create the signal root and write its config, refusing a tree already
    /// stored as the other kind.
    pub fn initialize(
        root: &Path,
        kind: SignalKind,
        metadata: &SignalMetadata,
        parameters: Vec<String>,
    ) -> PmuResult<Self> {
        if let Some(existing) = Self::read(root)? {
            existing.expect_kind(root, kind)?;
        }
        let config = Self {
            kind,
            metadata: metadata.clone(),
            parameters,
        };
        config.write(root)?;
        tracing::debug!(root = %root.display(), %kind, "signal root initialized");
        Ok(config)
    }

    fn expect_kind(&self, root: &Path, kind: SignalKind) -> PmuResult<()> {
        if self.kind == kind {
            return Ok(());
        }
        Err(PmuError::SignalKindMismatch {
            path: root.to_path_buf(),
            expected: kind.to_string(),
            found: self.kind.to_string(),
        })
    }

    /// Create `root` and write the config.
    pub fn write(&self, root: &Path) -> PmuResult<()> {
        std::fs::create_dir_all(root)?;
        std::fs::write(Self::path(root), self.render())?;
        Ok(())
    }

    /// Text form of the config.
    pub fn render(&self) -> String {
        let m = &self.metadata;
        let mut lines: Vec<String> = Vec::new();
        if self.kind == SignalKind::Event {
            lines.push(EVENT_MARKER.to_string());
        }
        lines.push(single_line(&m.name));
        lines.push(single_line(&m.device_id));
        lines.push(single_line(&m.signal_id));
        lines.push(single_line(&m.description));
        lines.push(m.phase.to_string());
        lines.push(m.measurement_type.to_string());
        lines.push(m.frames_per_second.to_string());
        lines.extend(self.parameters.iter().map(|p| single_line(p)));
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    /// Parse the text form; `path` is only used in errors.
    pub fn parse(text: &str, path: &Path) -> PmuResult<Self> {
        let all: Vec<&str> = text.lines().collect();
        // A data config is exactly its fields, so a data signal named like the
        // marker is never taken for an event config.
        let kind = if all.len() > METADATA_FIELDS && all[0].trim() == EVENT_MARKER {
            SignalKind::Event
        } else {
            SignalKind::Data
        };
        let mut lines = all.into_iter().skip(usize::from(kind == SignalKind::Event));

        let mut field = |name: &str| {
            lines
                .next()
                .map(str::to_string)
                .ok_or_else(|| PmuError::corrupt(path, format!("missing {name}")))
        };
        let name = field("name")?;
        let device_id = field("deviceId")?;
        let signal_id = field("signalId")?;
        let description = field("description")?;
        let phase = field("phase")?
            .parse::<Phase>()
            .map_err(|e| PmuError::corrupt(path, e))?;
        let measurement_type = field("type")?
            .parse::<MeasurementType>()
            .map_err(|e| PmuError::corrupt(path, e))?;
        let frames_per_second = field("framesPerSecond")?
            .trim()
            .parse::<f64>()
            .map_err(|e| PmuError::corrupt(path, format!("framesPerSecond: {e}")))?;

        let parameters = match kind {
            SignalKind::Event => lines
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect(),
            SignalKind::Data => Vec::new(),
        };

        Ok(Self {
            kind,
            metadata: SignalMetadata {
                name,
                device_id,
                signal_id,
                description,
                phase,
                measurement_type,
                frames_per_second,
            },
            parameters,
        })
    }
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SignalMetadata {
        SignalMetadata {
            name: "Bus 12 frequency".into(),
            device_id: "PMU-7".into(),
            signal_id: "F".into(),
            description: "line one\nline two".into(),
            phase: Phase::Positive,
            measurement_type: MeasurementType::Frequency,
            frames_per_second: 30.0,
        }
    }

    #[test]
    fn data_config_has_no_marker() {
        let config = RootConfig {
            kind: SignalKind::Data,
            metadata: metadata(),
            parameters: Vec::new(),
        };
        let text = config.render();
        assert!(text.starts_with("Bus 12 frequency\n"));
        assert_eq!(text.lines().count(), 7);

        let parsed = RootConfig::parse(&text, Path::new("Root.config")).unwrap();
        assert_eq!(parsed.kind, SignalKind::Data);
        assert_eq!(parsed.metadata.description, "line one line two");
        assert_eq!(parsed.metadata.phase, Phase::Positive);
    }

    #[test]
    fn event_config_lists_parameters() {
        let config = RootConfig {
            kind: SignalKind::Event,
            metadata: metadata(),
            parameters: vec!["peak".into(), "samples".into()],
        };
        let text = config.render();
        assert!(text.starts_with("EVENT\n"));
        let parsed = RootConfig::parse(&text, Path::new("Root.config")).unwrap();
        assert_eq!(parsed.kind, SignalKind::Event);
        assert_eq!(parsed.parameters, vec!["peak".to_string(), "samples".to_string()]);
    }

    #[test]
    fn data_signal_named_like_the_marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let named = SignalMetadata::named(EVENT_MARKER);
        RootConfig::initialize(dir.path(), SignalKind::Data, &named, Vec::new()).unwrap();

        let config = RootConfig::open(dir.path(), SignalKind::Data).unwrap();
        assert_eq!(config.metadata, named);
        assert!(config.parameters.is_empty());

        // An event signal without parameters is still one line longer.
        let event = RootConfig {
            kind: SignalKind::Event,
            metadata: named,
            parameters: Vec::new(),
        };
        let parsed = RootConfig::parse(&event.render(), Path::new("Root.config")).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn truncated_config_is_corrupt() {
        let err = RootConfig::parse("name\ndevice\n", Path::new("x/Root.config")).unwrap_err();
        assert!(err.to_string().contains("missing signalId"));
    }

    #[test]
    fn initialize_refuses_the_other_kind() {
        let dir = tempfile::tempdir().unwrap();
        RootConfig::initialize(dir.path(), SignalKind::Event, &metadata(), vec!["p".into()])
            .unwrap();
        let err = RootConfig::initialize(dir.path(), SignalKind::Data, &metadata(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, PmuError::SignalKindMismatch { .. }));
        assert!(RootConfig::open(dir.path(), SignalKind::Event).is_ok());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RootConfig::read(dir.path()).unwrap().is_none());
    }
}
