use pmu_core::time::{ticks_to_seconds, Ticks};
use pmu_core::{
    Analytic, AnalyticFrame, AnalyticOutputDescriptor, Event, Measurement, MeasurementType,
};
use serde::Deserialize;

use super::{settings, INPUT};

/// Reports every stretch where the input stays beyond a threshold as one event.
///
/// The event is stamped at the first frame beyond the threshold, lasts until
/// the first frame back inside it, and carries `peak`, `mean` and `samples`
/// parameters. Its value is the peak. A missing input ends an open excursion.
#[derive(Debug, Clone, Default)]
pub struct ThresholdExcursion {
    settings: ExcursionSettings,
    open: Option<Excursion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ExcursionSettings {
    threshold: f64,
    /// Detect values below the threshold instead of above it.
    below: bool,
}

#[derive(Debug, Clone)]
struct Excursion {
    start: Ticks,
    peak: f64,
    sum: f64,
    samples: u32,
}

impl ThresholdExcursion {
    /// Output name.
    pub const OUTPUT: &'static str = "excursion";

    fn beyond(&self, value: f64) -> bool {
        if self.settings.below {
            value < self.settings.threshold
        } else {
            value > self.settings.threshold
        }
    }

    fn close(&mut self, end: Ticks) -> Option<Measurement> {
        let excursion = self.open.take()?;
        let duration = ticks_to_seconds(end - excursion.start).max(0.0);
        let event = Event::new(Self::OUTPUT, excursion.peak, excursion.start, duration)
            .with_parameter("peak", excursion.peak)
            .with_parameter("mean", excursion.sum / f64::from(excursion.samples))
            .with_parameter("samples", f64::from(excursion.samples));
        Some(event.into())
    }
}

impl Analytic for ThresholdExcursion {
    fn input_names(&self) -> Vec<String> {
        vec![INPUT.to_string()]
    }

    fn outputs(&self) -> Vec<AnalyticOutputDescriptor> {
        vec![AnalyticOutputDescriptor::new(Self::OUTPUT, 0.0, MeasurementType::Event)]
    }

    fn configure(&mut self, value: &serde_json::Value) -> anyhow::Result<()> {
        let parsed: ExcursionSettings = settings(value)?;
        anyhow::ensure!(parsed.threshold.is_finite(), "threshold must be finite");
        self.settings = parsed;
        Ok(())
    }

    fn compute(
        &mut self,
        current: &AnalyticFrame,
        _past: &[AnalyticFrame],
        _future: &[AnalyticFrame],
    ) -> anyhow::Result<Vec<Measurement>> {
        let value = current.value(0);
        if value.is_nan() || !self.beyond(value) {
            return Ok(self.close(current.timestamp).into_iter().collect());
        }

        match self.open.as_mut() {
            Some(open) => {
                open.sum += value;
                open.samples += 1;
                let below = self.settings.below;
                if (below && value < open.peak) || (!below && value > open.peak) {
                    open.peak = value;
                }
            }
            None => {
                self.open = Some(Excursion {
                    start: current.timestamp,
                    peak: value,
                    sum: value,
                    samples: 1,
                });
            }
        }
        Ok(Vec::new())
    }

    fn complete_computation(&mut self, cutoff: Ticks) -> anyhow::Result<Vec<Measurement>> {
        Ok(self.close(cutoff).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmu_core::TICKS_PER_SECOND;

    fn frame(tenths: i64, value: f64) -> AnalyticFrame {
        let ts = tenths * TICKS_PER_SECOND / 10;
        AnalyticFrame {
            timestamp: ts,
            inputs: vec![pmu_core::TimeSeriesValue::new(INPUT, value, ts).into()],
        }
    }

    fn event(m: &Measurement) -> &Event {
        match m {
            Measurement::Event(e) => e,
            Measurement::Value(_) => panic!("expected an event"),
        }
    }

    #[test]
    fn one_event_per_excursion() {
        let mut detector = ThresholdExcursion::default();
        detector.configure(&serde_json::json!({ "threshold": 60.05 })).unwrap();

        let values = [60.0, 60.1, 60.3, 60.2, 60.0, 60.0];
        let mut out = Vec::new();
        for (i, v) in values.iter().enumerate() {
            out.extend(detector.compute(&frame(i as i64, *v), &[], &[]).unwrap());
        }
        assert_eq!(out.len(), 1);
        let e = event(&out[0]);
        assert_eq!(e.timestamp, TICKS_PER_SECOND / 10);
        assert!((e.duration - 0.3).abs() < 1e-9);
        assert_eq!(e.value, 60.3);
        assert_eq!(e.parameter_names(), vec!["peak", "mean", "samples"]);
        assert!((e.parameters[1].value - 60.2).abs() < 1e-9);
        assert_eq!(e.parameters[2].value, 3.0);
    }

    #[test]
    fn completion_closes_an_open_excursion() {
        let mut detector = ThresholdExcursion::default();
        detector
            .configure(&serde_json::json!({ "threshold": 59.9, "below": true }))
            .unwrap();
        assert!(detector.compute(&frame(0, 59.8), &[], &[]).unwrap().is_empty());
        assert!(detector.compute(&frame(5, 59.7), &[], &[]).unwrap().is_empty());

        let out = detector.complete_computation(TICKS_PER_SECOND).unwrap();
        let e = event(&out[0]);
        assert_eq!(e.duration, 1.0);
        assert_eq!(e.value, 59.7);
        assert!(detector.complete_computation(TICKS_PER_SECOND).unwrap().is_empty());
    }
}
