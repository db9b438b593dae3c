use pmu_core::{
    Analytic, AnalyticFrame, AnalyticOutputDescriptor, Measurement, MeasurementType,
    TimeSeriesValue,
};
use serde::Deserialize;

use super::{settings, INPUT};

/// Trailing mean over the current frame and up to `window - 1` earlier ones.
/// Missing (`NaN`) inputs are left out of the mean.
#[derive(Debug, Clone, Default)]
pub struct MovingAverage {
    settings: MovingAverageSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct MovingAverageSettings {
    window: usize,
    /// Output rate; `0` averages every frame.
    frames_per_second: f64,
}

impl Default for MovingAverageSettings {
    fn default() -> Self {
        Self {
            window: 5,
            frames_per_second: 0.0,
        }
    }
}

impl MovingAverage {
    /// Output name.
    pub const OUTPUT: &'static str = "average";

    /// Average over `window` frames.
    pub fn new(window: usize) -> Self {
        Self {
            settings: MovingAverageSettings {
                window: window.max(1),
                ..Default::default()
            },
        }
    }
}

impl Analytic for MovingAverage {
    fn input_names(&self) -> Vec<String> {
        vec![INPUT.to_string()]
    }

    fn outputs(&self) -> Vec<AnalyticOutputDescriptor> {
        vec![AnalyticOutputDescriptor::new(
            Self::OUTPUT,
            self.settings.frames_per_second,
            MeasurementType::Analog,
        )]
    }

    fn configure(&mut self, value: &serde_json::Value) -> anyhow::Result<()> {
        let parsed: MovingAverageSettings = settings(value)?;
        anyhow::ensure!(parsed.window >= 1, "window must be at least 1");
        anyhow::ensure!(
            parsed.frames_per_second >= 0.0,
            "frames_per_second must be non-negative"
        );
        self.settings = parsed;
        Ok(())
    }

    fn prev_frames(&self) -> usize {
        self.settings.window - 1
    }

    fn compute(
        &mut self,
        current: &AnalyticFrame,
        past: &[AnalyticFrame],
        _future: &[AnalyticFrame],
    ) -> anyhow::Result<Vec<Measurement>> {
        let (sum, n) = past
            .iter()
            .chain(std::iter::once(current))
            .map(|frame| frame.value(0))
            .filter(|v| !v.is_nan())
            .fold((0.0, 0u32), |(sum, n), v| (sum + v, n + 1));
        let mean = if n == 0 { f64::NAN } else { sum / f64::from(n) };
        Ok(vec![TimeSeriesValue::new(Self::OUTPUT, mean, current.timestamp).into()])
    }
}
