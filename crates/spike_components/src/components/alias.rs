//! Provides an already configured feature under a second name.

use std::rc::Rc;

use schemars::JsonSchema;
use serde::Deserialize;
use spike_beans::{
    parse_params, schema_of, BeansResult, Component, ComponentFactory, ComponentParams,
    FeatureBroker,
};
use tracing::debug;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AliasParams {
    /// Feature to re-provide
    pub target: String,
}

/// Resolves `target` and hands out that same component. With a shared target,
/// both names refer to one instance.
#[derive(Default)]
pub struct AliasFactory;

impl AliasFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentFactory for AliasFactory {
    fn component_type(&self) -> &'static str {
        "alias"
    }

    fn required_features(&self, params: &ComponentParams) -> BeansResult<Vec<String>> {
        let params: AliasParams = parse_params(params)?;
        Ok(vec![params.target])
    }

    fn create(
        &self,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        let params: AliasParams = parse_params(params)?;
        debug!(feature = %params.target, "Resolving alias");
        broker.resolve(&params.target)
    }

    fn parameter_schema(&self) -> serde_json::Value {
        schema_of::<AliasParams>()
    }
}
