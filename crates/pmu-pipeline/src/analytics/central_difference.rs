use pmu_core::time::ticks_to_seconds;
use pmu_core::{
    Analytic, AnalyticFrame, AnalyticOutputDescriptor, Measurement, MeasurementType,
    TimeSeriesValue,
};
use serde::Deserialize;

use super::{settings, INPUT};

/// Rate of change per second from the neighbouring frames.
///
/// Uses `(next - prev) / Δt` when both neighbours exist and a one-sided
/// difference with the current frame at either end of the stream.
#[derive(Debug, Clone, Default)]
pub struct CentralDifference {
    settings: CentralDifferenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CentralDifferenceSettings {
    /// Multiplies the derivative (e.g. `60` for per-minute).
    scale: Option<f64>,
}

impl CentralDifference {
    /// Output name.
    pub const OUTPUT: &'static str = "derivative";
}

fn point(frame: &AnalyticFrame) -> Option<(f64, f64)> {
    let value = frame.value(0);
    (!value.is_nan()).then(|| (ticks_to_seconds(frame.timestamp), value))
}

impl Analytic for CentralDifference {
    fn input_names(&self) -> Vec<String> {
        vec![INPUT.to_string()]
    }

    fn outputs(&self) -> Vec<AnalyticOutputDescriptor> {
        vec![AnalyticOutputDescriptor::new(Self::OUTPUT, 0.0, MeasurementType::Rocof)]
    }

    fn configure(&mut self, value: &serde_json::Value) -> anyhow::Result<()> {
        self.settings = settings(value)?;
        Ok(())
    }

    fn prev_frames(&self) -> usize {
        1
    }

    fn future_frames(&self) -> usize {
        1
    }

    fn compute(
        &mut self,
        current: &AnalyticFrame,
        past: &[AnalyticFrame],
        future: &[AnalyticFrame],
    ) -> anyhow::Result<Vec<Measurement>> {
        let before = past.last().and_then(point);
        let after = future.first().and_then(point);
        let here = point(current);

        let derivative = match (before.or(here), after.or(here)) {
            (Some((t0, v0)), Some((t1, v1))) if t1 > t0 => (v1 - v0) / (t1 - t0),
            _ => f64::NAN,
        };
        let derivative = derivative * self.settings.scale.unwrap_or(1.0);
        Ok(vec![TimeSeriesValue::new(Self::OUTPUT, derivative, current.timestamp).into()])
    }
}
