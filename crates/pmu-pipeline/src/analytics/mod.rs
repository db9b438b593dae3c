//! Built-in analytics.
//!
//! | type id               | inputs  | outputs      | window           |
//! |-----------------------|---------|--------------|------------------|
//! | `moving_average`      | `input` | `average`    | `window - 1` past |
//! | `central_difference`  | `input` | `derivative` | 1 past, 1 future |
//! | `threshold_excursion` | `input` | `excursion`  | none             |

mod central_difference;
mod moving_average;
mod threshold_excursion;

pub use central_difference::CentralDifference;
pub use moving_average::MovingAverage;
pub use threshold_excursion::ThresholdExcursion;

use pmu_core::AnalyticRegistry;

/// Name of the single input every built-in analytic reads.
pub const INPUT: &str = "input";

/// Register every built-in analytic under its type id.
pub fn register_builtins(registry: &mut AnalyticRegistry) {
    registry.register("moving_average", || Box::new(MovingAverage::default()));
    registry.register("central_difference", || Box::new(CentralDifference::default()));
    registry.register("threshold_excursion", || Box::new(ThresholdExcursion::default()));
}

/// A registry holding only the built-in analytics.
pub fn builtin_registry() -> AnalyticRegistry {
    let mut registry = AnalyticRegistry::new();
    register_builtins(&mut registry);
    registry
}

/// Decode analytic settings, treating `null` as "all defaults".
pub(crate) fn settings<T>(value: &serde_json::Value) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value.clone())?)
}
