//! Pipeline wiring configuration and assembly

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::broker::FeatureBroker;
use crate::error::{BeansError, BeansResult};
use crate::registry::ComponentRegistry;

/// Component parameters as a flexible key-value map
pub type ComponentParams = HashMap<String, serde_json::Value>;

/// Complete wiring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Configuration format version
    pub version: String,
    /// Pipeline metadata
    #[serde(default)]
    pub metadata: PipelineMetadata,
    /// Components to construct, each providing one feature
    pub components: Vec<ComponentConfig>,
}

/// Pipeline metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetadata {
    /// Pipeline name
    #[serde(default)]
    pub name: String,
    /// Pipeline description
    pub description: Option<String>,
    /// Author information
    pub author: Option<String>,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Individual component configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Feature name this component is provided under
    pub feature: String,
    /// Component type identifier
    #[serde(rename = "type")]
    pub component_type: String,
    /// Component parameters
    #[serde(default)]
    pub params: ComponentParams,
    /// Construct once and provide the instance (true), or construct a fresh
    /// instance on every resolution (false)
    #[serde(default = "default_shared")]
    pub shared: bool,
    /// Optional component description
    pub description: Option<String>,
}

fn default_shared() -> bool {
    true
}

impl PipelineConfig {
    /// Create a new, empty wiring configuration
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            version: "1.0".to_string(),
            metadata: PipelineMetadata {
                name: name.into(),
                description,
                ..Default::default()
            },
            components: vec![],
        }
    }

    /// Add a component to the pipeline
    pub fn add_component(&mut self, component: ComponentConfig) -> BeansResult<()> {
        if self.get_component(&component.feature).is_some() {
            return Err(BeansError::invalid(format!(
                "Feature '{}' is already configured",
                component.feature
            )));
        }
        self.components.push(component);
        Ok(())
    }

    /// Get a component by the feature it provides
    pub fn get_component(&self, feature: &str) -> Option<&ComponentConfig> {
        self.components.iter().find(|c| c.feature == feature)
    }

    /// Validate the configuration against a registry.
    ///
    /// `provided` lists features already available in the broker (typically
    /// data sources provided by code).
    pub fn validate(&self, registry: &ComponentRegistry, provided: &[String]) -> BeansResult<()> {
        self.dependency_order(registry, provided).map(|_| ())
    }

    /// Configured features in dependency order (providers before consumers).
    ///
    /// Fails on an empty pipeline, duplicate features, unknown component types,
    /// unsatisfied requirements and cyclic wiring.
    pub fn dependency_order(
        &self,
        registry: &ComponentRegistry,
        provided: &[String],
    ) -> BeansResult<Vec<String>> {
        if self.components.is_empty() {
            return Err(BeansError::invalid("Pipeline must contain at least one component"));
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let mut node_map = HashMap::new();
        for component in &self.components {
            if node_map.contains_key(component.feature.as_str()) {
                return Err(BeansError::invalid(format!(
                    "Feature '{}' is configured more than once",
                    component.feature
                )));
            }
            if provided.contains(&component.feature) {
                return Err(BeansError::DuplicateFeature {
                    feature: component.feature.clone(),
                });
            }
            let idx = graph.add_node(component.feature.as_str());
            node_map.insert(component.feature.as_str(), idx);
        }

        for component in &self.components {
            let factory = registry.get(&component.component_type).ok_or_else(|| {
                BeansError::invalid(format!(
                    "Component type not registered: {}",
                    component.component_type
                ))
            })?;

            for required in factory.required_features(&component.params)? {
                match node_map.get(required.as_str()) {
                    Some(&from) => {
                        graph.add_edge(from, node_map[component.feature.as_str()], ());
                    }
                    None if provided.contains(&required) => {}
                    None => {
                        return Err(BeansError::invalid(format!(
                            "Feature '{}' requires '{}', which is neither configured nor provided",
                            component.feature, required
                        )));
                    }
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|idx| graph[idx].to_string()).collect()),
            Err(cycle) => Err(BeansError::CyclicWiring {
                feature: graph[cycle.node_id()].to_string(),
            }),
        }
    }

    /// Load wiring configuration from JSON
    pub fn from_json(json: &str) -> BeansResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load wiring configuration from YAML
    pub fn from_yaml(yaml: &str) -> BeansResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load wiring configuration from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> BeansResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            other => Err(BeansError::invalid(format!(
                "Unsupported configuration format: {:?}",
                other
            ))),
        }
    }

    /// Save wiring configuration to JSON
    pub fn to_json(&self) -> BeansResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl ComponentConfig {
    /// Create a new shared component configuration
    pub fn new(feature: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            component_type: component_type.into(),
            params: ComponentParams::new(),
            shared: true,
            description: None,
        }
    }

    /// Set a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Construct a fresh instance on every resolution
    pub fn per_resolution(mut self) -> Self {
        self.shared = false;
        self
    }
}

/// Provide every configured component in `broker`.
///
/// Shared components are constructed here, in dependency order; the others are
/// registered as factories and constructed on each resolution.
pub fn assemble(
    config: &PipelineConfig,
    registry: &ComponentRegistry,
    broker: &Rc<FeatureBroker>,
) -> BeansResult<()> {
    let order = config.dependency_order(registry, &broker.features())?;
    info!(
        pipeline = %config.metadata.name,
        components = order.len(),
        "Assembling pipeline"
    );

    for feature in &order {
        let Some(component) = config.get_component(feature) else {
            continue;
        };
        let factory = registry.get(&component.component_type).ok_or_else(|| {
            BeansError::invalid(format!(
                "Component type not registered: {}",
                component.component_type
            ))
        })?;

        if component.shared {
            let instance = factory.create(broker, &component.params)?;
            broker.provide(feature.clone(), instance)?;
        } else {
            let weak_broker = Rc::downgrade(broker);
            let params = component.params.clone();
            let name = feature.clone();
            broker.provide_dyn_factory(feature.clone(), move || {
                let broker = weak_broker.upgrade().ok_or_else(|| BeansError::BrokerDropped {
                    feature: name.clone(),
                })?;
                factory.create(&broker, &params)
            })?;
        }
        debug!(
            feature = %feature,
            component_type = %component.component_type,
            shared = component.shared,
            "Component provided"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::registry::ComponentFactory;
    use std::io::Write;

    struct Stub;

    impl Component for Stub {
        provides_interfaces!();
    }

    /// Requires whatever features it is built with.
    struct StubFactory {
        name: &'static str,
        requires: &'static [&'static str],
    }

    impl ComponentFactory for StubFactory {
        fn component_type(&self) -> &'static str {
            self.name
        }

        fn required_features(&self, _params: &ComponentParams) -> BeansResult<Vec<String>> {
            Ok(self.requires.iter().map(|r| r.to_string()).collect())
        }

        fn create(
            &self,
            _broker: &Rc<FeatureBroker>,
            _params: &ComponentParams,
        ) -> BeansResult<Rc<dyn Component>> {
            Ok(Rc::new(Stub))
        }
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register(StubFactory { name: "source", requires: &[] });
        registry.register(StubFactory { name: "detector", requires: &["SignalSource"] });
        registry.register(StubFactory { name: "labeler", requires: &["SpikeMarkerSource"] });
        registry.register(StubFactory { name: "looping", requires: &["LabelSource"] });
        registry
    }

    #[test]
    fn test_pipeline_config_creation() {
        let config = PipelineConfig::new("test_pipeline", Some("Test pipeline".to_string()));
        assert_eq!(config.metadata.name, "test_pipeline");
        assert_eq!(config.components.len(), 0);
    }

    #[test]
    fn test_component_addition() {
        let mut config = PipelineConfig::new("test", None);
        assert!(config.add_component(ComponentConfig::new("SignalSource", "source")).is_ok());
        assert!(config.add_component(ComponentConfig::new("SignalSource", "source")).is_err());
    }

    #[test]
    fn test_dependency_order() {
        let mut config = PipelineConfig::new("test", None);
        config.add_component(ComponentConfig::new("LabelSource", "labeler")).unwrap();
        config.add_component(ComponentConfig::new("SpikeMarkerSource", "detector")).unwrap();
        config.add_component(ComponentConfig::new("SignalSource", "source")).unwrap();

        let order = config.dependency_order(&registry(), &[]).unwrap();
        let pos = |f: &str| order.iter().position(|o| o == f).unwrap();
        assert!(pos("SignalSource") < pos("SpikeMarkerSource"));
        assert!(pos("SpikeMarkerSource") < pos("LabelSource"));
    }

    #[test]
    fn test_missing_requirement() {
        let mut config = PipelineConfig::new("test", None);
        config.add_component(ComponentConfig::new("SpikeMarkerSource", "detector")).unwrap();

        assert!(config.validate(&registry(), &[]).is_err());
        assert!(config.validate(&registry(), &["SignalSource".to_string()]).is_ok());
    }

    #[test]
    fn test_circular_wiring_detection() {
        let mut config = PipelineConfig::new("test", None);
        // labeler needs SpikeMarkerSource, looping needs LabelSource
        config.add_component(ComponentConfig::new("SpikeMarkerSource", "looping")).unwrap();
        config.add_component(ComponentConfig::new("LabelSource", "labeler")).unwrap();

        let err = config.validate(&registry(), &[]).unwrap_err();
        assert!(matches!(err, BeansError::CyclicWiring { .. }));
    }

    #[test]
    fn test_unknown_type_and_empty_pipeline() {
        let config = PipelineConfig::new("empty", None);
        assert!(config.validate(&registry(), &[]).is_err());

        let mut config = PipelineConfig::new("test", None);
        config.add_component(ComponentConfig::new("X", "nonexistent")).unwrap();
        assert!(config.validate(&registry(), &[]).is_err());
    }

    #[test]
    fn test_assemble_shared_and_per_resolution() {
        let mut config = PipelineConfig::new("test", None);
        config.add_component(ComponentConfig::new("SignalSource", "source")).unwrap();
        config
            .add_component(ComponentConfig::new("SpikeMarkerSource", "detector").per_resolution())
            .unwrap();

        let broker = Rc::new(FeatureBroker::new());
        assemble(&config, &registry(), &broker).unwrap();

        let a = broker.resolve("SignalSource").unwrap();
        let b = broker.resolve("SignalSource").unwrap();
        assert!(Rc::ptr_eq(&a, &b));

        let c = broker.resolve("SpikeMarkerSource").unwrap();
        let d = broker.resolve("SpikeMarkerSource").unwrap();
        assert!(!Rc::ptr_eq(&c, &d));
    }

    #[test]
    fn test_from_json_and_yaml() {
        let json = r#"
        {
            "version": "1.0",
            "metadata": { "name": "sorting" },
            "components": [
                { "feature": "SpikeMarkerSource", "type": "detector", "params": { "contact": 1 } },
                { "feature": "LabelSource", "type": "labeler", "shared": false }
            ]
        }
        "#;
        let config = PipelineConfig::from_json(json).unwrap();
        assert_eq!(config.components.len(), 2);
        assert!(config.components[0].shared);
        assert!(!config.components[1].shared);

        let yaml = "
version: '1.0'
components:
  - feature: SpikeMarkerSource
    type: detector
";
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.components[0].component_type, "detector");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "version: '1.0'\ncomponents:\n  - feature: SignalSource\n    type: source").unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.components[0].feature, "SignalSource");

        let roundtrip = PipelineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(roundtrip.components[0].feature, "SignalSource");
    }
}
