//! The contract every analytic plugin implements.
//!
//! An analytic consumes a fixed, ordered list of named inputs and produces
//! named outputs. The pipeline remaps upstream signal keys into the analytic's
//! input vocabulary before calling [`Analytic::compute`] and maps the produced
//! output names back onto downstream keys afterwards, so an analytic never sees
//! pipeline keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::data::{Measurement, SignalKey, TimeSeriesValue};
use crate::time::Ticks;

/// Electrical phase of a measured quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Phase A.
    A,
    /// Phase B.
    B,
    /// Phase C.
    C,
    /// Positive sequence.
    Positive,
    /// Negative sequence.
    Negative,
    /// Zero sequence.
    Zero,
    /// Not phase-specific.
    #[default]
    None,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
            Phase::Positive => "Positive",
            Phase::Negative => "Negative",
            Phase::Zero => "Zero",
            Phase::None => "None",
        };
        f.write_str(label)
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" => Ok(Phase::A),
            "B" => Ok(Phase::B),
            "C" => Ok(Phase::C),
            "Positive" => Ok(Phase::Positive),
            "Negative" => Ok(Phase::Negative),
            "Zero" => Ok(Phase::Zero),
            "None" | "" => Ok(Phase::None),
            other => Err(format!("unknown phase '{other}'")),
        }
    }
}

/// Kind of physical quantity carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeasurementType {
    /// Voltage phasor magnitude.
    VoltageMagnitude,
    /// Voltage phasor angle.
    VoltageAngle,
    /// Current phasor magnitude.
    CurrentMagnitude,
    /// Current phasor angle.
    CurrentAngle,
    /// System frequency.
    Frequency,
    /// Rate of change of frequency.
    Rocof,
    /// Active or reactive power.
    Power,
    /// Generic analog value.
    #[default]
    Analog,
    /// Digital status word.
    Digital,
    /// Duration-bearing event.
    Event,
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MeasurementType::VoltageMagnitude => "VoltageMagnitude",
            MeasurementType::VoltageAngle => "VoltageAngle",
            MeasurementType::CurrentMagnitude => "CurrentMagnitude",
            MeasurementType::CurrentAngle => "CurrentAngle",
            MeasurementType::Frequency => "Frequency",
            MeasurementType::Rocof => "Rocof",
            MeasurementType::Power => "Power",
            MeasurementType::Analog => "Analog",
            MeasurementType::Digital => "Digital",
            MeasurementType::Event => "Event",
        };
        f.write_str(label)
    }
}

impl FromStr for MeasurementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "VoltageMagnitude" => Ok(MeasurementType::VoltageMagnitude),
            "VoltageAngle" => Ok(MeasurementType::VoltageAngle),
            "CurrentMagnitude" => Ok(MeasurementType::CurrentMagnitude),
            "CurrentAngle" => Ok(MeasurementType::CurrentAngle),
            "Frequency" => Ok(MeasurementType::Frequency),
            "Rocof" => Ok(MeasurementType::Rocof),
            "Power" => Ok(MeasurementType::Power),
            "Analog" | "" => Ok(MeasurementType::Analog),
            "Digital" => Ok(MeasurementType::Digital),
            "Event" => Ok(MeasurementType::Event),
            other => Err(format!("unknown measurement type '{other}'")),
        }
    }
}

/// Statically declared output of an analytic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticOutputDescriptor {
    /// Output name the analytic writes under.
    pub name: String,
    /// Nominal output rate in frames per second. `0` follows the input rate.
    pub rate: f64,
    /// Phase of the produced quantity.
    pub phase: Phase,
    /// Kind of the produced quantity.
    pub measurement_type: MeasurementType,
}

impl AnalyticOutputDescriptor {
    /// Descriptor without a phase.
    pub fn new(name: impl Into<String>, rate: f64, measurement_type: MeasurementType) -> Self {
        Self {
            name: name.into(),
            rate,
            phase: Phase::None,
            measurement_type,
        }
    }

    /// Set the phase.
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }
}

/// A frame expressed in an analytic's own input vocabulary.
///
/// `inputs[i]` corresponds to `input_names()[i]` and is keyed by that name.
/// Inputs that were not present upstream are `NaN` values.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticFrame {
    /// Timestamp of the originating frame.
    pub timestamp: Ticks,
    /// One entry per input name, in declaration order.
    pub inputs: Vec<Measurement>,
}

impl AnalyticFrame {
    /// Frame with every named input missing.
    pub fn empty(timestamp: Ticks, input_names: &[String]) -> Self {
        Self {
            timestamp,
            inputs: input_names
                .iter()
                .map(|name| {
                    TimeSeriesValue::new(SignalKey::new(name.as_str()), f64::NAN, timestamp).into()
                })
                .collect(),
        }
    }

    /// Numeric value of input `index`, `NaN` when absent.
    pub fn value(&self, index: usize) -> f64 {
        self.inputs.get(index).map_or(f64::NAN, Measurement::value)
    }

    /// Input `index` as delivered.
    pub fn get(&self, index: usize) -> Option<&Measurement> {
        self.inputs.get(index)
    }
}

/// A pluggable per-frame transform.
///
/// Produced measurements are keyed by the declared output name
/// ([`AnalyticOutputDescriptor::name`]); the pipeline rekeys them.
pub trait Analytic: Send {
    /// Ordered input channel names.
    fn input_names(&self) -> Vec<String>;

    /// Ordered output descriptors.
    fn outputs(&self) -> Vec<AnalyticOutputDescriptor>;

    /// Apply settings from the section template.
    fn configure(&mut self, settings: &serde_json::Value) -> anyhow::Result<()>;

    /// Number of previously processed frames the analytic wants as history.
    fn prev_frames(&self) -> usize {
        0
    }

    /// Number of upcoming frames the analytic wants to look ahead.
    fn future_frames(&self) -> usize {
        0
    }

    /// Processing rate in frames per second. `0` processes every frame.
    ///
    /// Defaults to the fastest declared output rate.
    fn frames_per_second(&self) -> f64 {
        self.outputs()
            .iter()
            .map(|o| o.rate)
            .fold(0.0, f64::max)
    }

    /// Receive the negotiated rate of each input, in `input_names()` order.
    fn set_input_fps(&mut self, _rates: &[f64]) {}

    /// Process one frame. `past` is ordered oldest first; `future` nearest first.
    fn compute(
        &mut self,
        current: &AnalyticFrame,
        past: &[AnalyticFrame],
        future: &[AnalyticFrame],
    ) -> anyhow::Result<Vec<Measurement>>;

    /// Emit anything still pending at end of stream.
    fn complete_computation(&mut self, _cutoff: Ticks) -> anyhow::Result<Vec<Measurement>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_and_type_parse_their_display() {
        let phases = [
            Phase::A,
            Phase::B,
            Phase::C,
            Phase::Positive,
            Phase::Negative,
            Phase::Zero,
            Phase::None,
        ];
        for phase in phases {
            assert_eq!(phase.to_string().parse::<Phase>(), Ok(phase));
        }
        let types = [
            MeasurementType::Frequency,
            MeasurementType::VoltageAngle,
            MeasurementType::Event,
        ];
        for ty in types {
            assert_eq!(ty.to_string().parse::<MeasurementType>(), Ok(ty));
        }
        assert!("Q".parse::<Phase>().is_err());
    }

    #[test]
    fn empty_frame_reports_nan_inputs() {
        let names = vec!["va".to_string(), "ia".to_string()];
        let frame = AnalyticFrame::empty(42, &names);
        assert_eq!(frame.inputs.len(), 2);
        assert!(frame.value(0).is_nan());
        assert!(frame.value(7).is_nan());
        assert_eq!(frame.get(1).map(|m| m.key().as_str()), Some("ia"));
    }
}
