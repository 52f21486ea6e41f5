//! Component registry for creating pipeline components from configuration.

use std::collections::HashMap;
use std::rc::Rc;

use serde::de::DeserializeOwned;

use crate::broker::FeatureBroker;
use crate::component::Component;
use crate::config::ComponentParams;
use crate::error::{BeansError, BeansResult};

/// A factory for creating instances of a specific component type.
pub trait ComponentFactory {
    /// Type name used in configuration files (e.g. `"spike_detector"`)
    fn component_type(&self) -> &'static str;

    /// Features an instance built from `params` resolves from the broker
    fn required_features(&self, params: &ComponentParams) -> BeansResult<Vec<String>> {
        let _ = params;
        Ok(Vec::new())
    }

    /// Creates a new component instance from its parameters.
    fn create(
        &self,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>>;

    /// Get parameter schema for this component type
    fn parameter_schema(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

/// A registry for component factories.
#[derive(Default)]
pub struct ComponentRegistry {
    factories: HashMap<String, Rc<dyn ComponentFactory>>,
}

impl ComponentRegistry {
    /// Creates a new, empty component registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component factory under its own type name.
    pub fn register<F>(&mut self, factory: F)
    where
        F: ComponentFactory + 'static,
    {
        self.factories
            .insert(factory.component_type().to_string(), Rc::new(factory));
    }

    pub fn get(&self, component_type: &str) -> Option<Rc<dyn ComponentFactory>> {
        self.factories.get(component_type).cloned()
    }

    /// Creates a new component instance.
    pub fn create(
        &self,
        component_type: &str,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        self.factories
            .get(component_type)
            .ok_or_else(|| BeansError::invalid(format!("Component type not registered: {}", component_type)))?
            .create(broker, params)
    }

    /// Get all registered component types, sorted
    pub fn component_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Get parameter schema for a component type
    pub fn parameter_schema(&self, component_type: &str) -> Option<serde_json::Value> {
        self.factories
            .get(component_type)
            .map(|f| f.parameter_schema())
    }
}

/// Deserialize a component's parameter map into its typed parameter struct.
pub fn parse_params<P: DeserializeOwned>(params: &ComponentParams) -> BeansResult<P> {
    let value = serde_json::Value::Object(params.clone().into_iter().collect());
    Ok(serde_json::from_value(value)?)
}

/// JSON schema of a parameter struct, for [`ComponentFactory::parameter_schema`].
pub fn schema_of<P: schemars::JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(P)).unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, schemars::JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct GainParams {
        #[serde(default = "default_gain")]
        gain: f64,
    }

    fn default_gain() -> f64 {
        1.0
    }

    struct Gain(f64);

    impl Component for Gain {
        provides_interfaces!();
    }

    struct GainFactory;

    impl ComponentFactory for GainFactory {
        fn component_type(&self) -> &'static str {
            "gain"
        }

        fn create(
            &self,
            _broker: &Rc<FeatureBroker>,
            params: &ComponentParams,
        ) -> BeansResult<Rc<dyn Component>> {
            let params: GainParams = parse_params(params)?;
            Ok(Rc::new(Gain(params.gain)))
        }

        fn parameter_schema(&self) -> serde_json::Value {
            schema_of::<GainParams>()
        }
    }

    #[test]
    fn test_component_registry() {
        let registry = ComponentRegistry::new();
        assert_eq!(registry.component_types().len(), 0);
    }

    #[test]
    fn test_create_with_params() {
        let mut registry = ComponentRegistry::new();
        registry.register(GainFactory);
        let broker = Rc::new(FeatureBroker::new());

        let mut params = ComponentParams::new();
        params.insert("gain".to_string(), json!(2.5));
        let component = registry.create("gain", &broker, &params).unwrap();
        let gain = component.as_any().downcast_ref::<Gain>().unwrap();
        assert_eq!(gain.0, 2.5);

        let defaulted = registry.create("gain", &broker, &ComponentParams::new()).unwrap();
        assert_eq!(defaulted.as_any().downcast_ref::<Gain>().unwrap().0, 1.0);
    }

    #[test]
    fn test_unknown_param_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register(GainFactory);
        let broker = Rc::new(FeatureBroker::new());

        let mut params = ComponentParams::new();
        params.insert("gian".to_string(), json!(2.5));
        assert!(registry.create("gain", &broker, &params).is_err());
        assert!(registry.create("offset", &broker, &params).is_err());
    }

    #[test]
    fn test_parameter_schema() {
        let mut registry = ComponentRegistry::new();
        registry.register(GainFactory);
        let schema = registry.parameter_schema("gain").unwrap();
        assert!(schema["properties"]["gain"].is_object());
    }
}
