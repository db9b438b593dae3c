//! Type-id keyed factories for analytic plugins.

use crate::analytic::Analytic;
use crate::error::PmuError;
use std::collections::HashMap;

type AnalyticFactory = Box<dyn Fn() -> Box<dyn Analytic> + Send + Sync>;

/// Maps stable analytic type ids to factories.
///
/// Templates name an analytic by type id; the registry instantiates it and
/// applies the template's settings.
pub struct AnalyticRegistry {
    factories: HashMap<String, AnalyticFactory>,
}

impl Default for AnalyticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticRegistry {
    /// Registry without factories.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) the factory for `type_id`.
    pub fn register<F>(&mut self, type_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Analytic> + Send + Sync + 'static,
    {
        self.factories.insert(type_id.into(), Box::new(factory));
    }

    /// `true` when `type_id` is registered.
    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }

    /// Registered type ids, sorted.
    pub fn type_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Instantiate `type_id` and configure it with `settings`.
    pub fn create(
        &self,
        type_id: &str,
        settings: &serde_json::Value,
    ) -> Result<Box<dyn Analytic>, anyhow::Error> {
        let factory = self
            .factories
            .get(type_id)
            .ok_or_else(|| PmuError::AnalyticNotFound(type_id.to_string()))?;
        let mut analytic = factory();
        analytic.configure(settings)?;
        Ok(analytic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::{AnalyticFrame, AnalyticOutputDescriptor};
    use crate::data::Measurement;

    struct Fixed {
        gain: f64,
    }

    impl Analytic for Fixed {
        fn input_names(&self) -> Vec<String> {
            vec!["x".into()]
        }

        fn outputs(&self) -> Vec<AnalyticOutputDescriptor> {
            Vec::new()
        }

        fn configure(&mut self, settings: &serde_json::Value) -> anyhow::Result<()> {
            self.gain = settings
                .get("gain")
                .and_then(serde_json::Value::as_f64)
                .ok_or_else(|| anyhow::anyhow!("gain is required"))?;
            Ok(())
        }

        fn compute(
            &mut self,
            _current: &AnalyticFrame,
            _past: &[AnalyticFrame],
            _future: &[AnalyticFrame],
        ) -> anyhow::Result<Vec<Measurement>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn create_configures_the_instance() {
        let mut registry = AnalyticRegistry::new();
        registry.register("fixed", || Box::new(Fixed { gain: 0.0 }));

        assert!(registry.contains("fixed"));
        assert_eq!(registry.type_ids(), vec!["fixed".to_string()]);
        assert!(registry.create("fixed", &serde_json::json!({ "gain": 2.0 })).is_ok());

        let err = registry
            .create("fixed", &serde_json::json!({}))
            .err()
            .map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("gain is required"));
    }

    #[test]
    fn unknown_type_is_reported() {
        let registry = AnalyticRegistry::new();
        let err = registry.create("missing", &serde_json::Value::Null).err();
        assert!(err.is_some_and(|e| e.to_string().contains("'missing' is not registered")));
    }
}
