//! Frame source adapters.
//!
//! A run reads its frames from exactly one [`FrameSource`], created by type id
//! from a [`SourceRegistry`]. Two adapters are built in:
//!
//! - `memory`: frames listed in the settings (`settings.frames`), or handed over
//!   directly with [`MemorySource::new`]
//! - `synthetic`: deterministic sine channels at the configured rate

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pmu_core::time::{from_datetime, seconds_to_ticks, Ticks};
use pmu_core::{Frame, PmuError, PmuResult, TimeSeriesValue};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};

use crate::config::SourceConfig;

/// Producer of timestamp-ordered frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Nominal rate of the stream in frames per second.
    fn frames_per_second(&self) -> f64;

    /// Next frame, or `None` once the stream is exhausted.
    async fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

type SourceFactory =
    Box<dyn Fn(&SourceConfig) -> anyhow::Result<Box<dyn FrameSource>> + Send + Sync>;

/// Maps source type ids to factories.
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    /// Registry without adapters.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `memory` and `synthetic` adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |config| {
            Ok(Box::new(MemorySource::from_config(config)?) as Box<dyn FrameSource>)
        });
        registry.register("synthetic", |config| {
            Ok(Box::new(SyntheticSource::from_config(config)?) as Box<dyn FrameSource>)
        });
        registry
    }

    /// Register (or replace) the factory for `type_id`.
    pub fn register<F>(&mut self, type_id: impl Into<String>, factory: F)
    where
        F: Fn(&SourceConfig) -> anyhow::Result<Box<dyn FrameSource>> + Send + Sync + 'static,
    {
        self.factories.insert(type_id.into(), Box::new(factory));
    }

    /// `true` when `type_id` is registered.
    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }

    /// Create the source named by `config`.
    pub fn create(&self, config: &SourceConfig) -> PmuResult<Box<dyn FrameSource>> {
        let unavailable = |message: String| PmuError::SourceUnavailable {
            source_type: config.r#type.clone(),
            message,
        };
        let factory = self
            .factories
            .get(&config.r#type)
            .ok_or_else(|| unavailable("no adapter registered under this type".into()))?;
        factory(config).map_err(|e| unavailable(format!("{e:#}")))
    }
}

/// Replays a fixed list of frames.
#[derive(Debug, Clone)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
    frames_per_second: f64,
}

#[derive(Debug, Default, Deserialize)]
struct MemorySettings {
    #[serde(default)]
    frames: Vec<Frame>,
}

impl MemorySource {
    /// Source replaying `frames`.
    pub fn new(frames: impl IntoIterator<Item = Frame>, frames_per_second: f64) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            frames_per_second,
        }
    }

    /// Source replaying `settings.frames`.
    pub fn from_config(config: &SourceConfig) -> anyhow::Result<Self> {
        let settings: MemorySettings = if config.settings.is_null() {
            MemorySettings::default()
        } else {
            serde_json::from_value(config.settings.clone())?
        };
        Ok(Self::new(settings.frames, config.frames_per_second))
    }

    /// Frames not read yet.
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    fn frames_per_second(&self) -> f64 {
        self.frames_per_second
    }

    async fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Sine channels `offset + amplitude * sin(2π f t + i π / 3)`, one per name.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    settings: SyntheticSettings,
    frames_per_second: f64,
    start: Ticks,
    index: u64,
    total: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct SyntheticSettings {
    channels: Vec<String>,
    #[serde(default = "default_duration")]
    duration_secs: f64,
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default = "default_amplitude")]
    amplitude: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default = "default_frequency")]
    frequency_hz: f64,
}

fn default_duration() -> f64 {
    10.0
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_frequency() -> f64 {
    0.5
}

impl SyntheticSource {
    /// Source described by `settings`.
    pub fn from_config(config: &SourceConfig) -> anyhow::Result<Self> {
        let settings: SyntheticSettings = serde_json::from_value(config.settings.clone())?;
        let fps = config.frames_per_second;
        anyhow::ensure!(fps > 0.0, "synthetic source needs a positive frames_per_second");
        anyhow::ensure!(
            !settings.channels.is_empty(),
            "synthetic source needs at least one channel"
        );
        anyhow::ensure!(
            settings.duration_secs.is_finite() && settings.duration_secs >= 0.0,
            "duration_secs must be non-negative"
        );
        let start = settings
            .start
            .map(from_datetime)
            .unwrap_or_else(|| from_datetime(Utc::now()));
        let total = (settings.duration_secs * fps).floor() as u64;
        Ok(Self {
            settings,
            frames_per_second: fps,
            start,
            index: 0,
            total,
        })
    }

    fn frame_at(&self, index: u64) -> Frame {
        let elapsed = index as f64 / self.frames_per_second;
        let timestamp = self.start + seconds_to_ticks(elapsed);
        let s = &self.settings;
        let mut frame = Frame::new(timestamp);
        for (i, channel) in s.channels.iter().enumerate() {
            let phase = i as f64 * std::f64::consts::FRAC_PI_3;
            let angle = 2.0 * std::f64::consts::PI * s.frequency_hz * elapsed + phase;
            let value = s.offset + s.amplitude * angle.sin();
            frame.insert(TimeSeriesValue::new(channel.as_str(), value, timestamp));
        }
        frame
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    fn frames_per_second(&self) -> f64 {
        self.frames_per_second
    }

    async fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        if self.index >= self.total {
            return Ok(None);
        }
        let frame = self.frame_at(self.index);
        self.index += 1;
        Ok(Some(frame))
    }
}
