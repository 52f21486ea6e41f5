//! Per-spike waveform features.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use schemars::JsonSchema;
use serde::Deserialize;
use spike_beans::{
    parse_params, schema_of, BeansError, BeansResult, Component, ComponentFactory,
    ComponentParams, Dependency, FeatureBroker, Node, Predicate,
};
use spike_types::{FeatureMatrix, Waveforms};
use tracing::{debug, info};

use crate::capability::{features, FeatureSource, SpikeSource};

/// A feature computed from each channel of a spike waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Peak-to-peak amplitude
    P2P,
    /// Maximum
    Peak,
    /// Minimum
    Valley,
}

impl FeatureKind {
    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::P2P => "P2P",
            FeatureKind::Peak => "Peak",
            FeatureKind::Valley => "Valley",
        }
    }

    fn compute(self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        match self {
            FeatureKind::P2P => max - min,
            FeatureKind::Peak => max,
            FeatureKind::Valley => min,
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureKind {
    type Err = BeansError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P2P" => Ok(FeatureKind::P2P),
            "Peak" => Ok(FeatureKind::Peak),
            "Valley" => Ok(FeatureKind::Valley),
            other => Err(BeansError::invalid(format!("Unknown feature '{}'", other))),
        }
    }
}

/// Compute every feature on every channel. Columns are named `Ch{c}:{feature}`.
pub fn compute_features(spikes: &Waveforms, kinds: &[FeatureKind]) -> FeatureMatrix {
    let n_channels = spikes.data.first().map(Vec::len).unwrap_or(0);

    let names = kinds
        .iter()
        .flat_map(|kind| (0..n_channels).map(move |c| format!("Ch{}:{}", c, kind)))
        .collect();
    let data = spikes
        .data
        .iter()
        .map(|spike| {
            kinds
                .iter()
                .flat_map(|kind| spike.iter().map(move |channel| kind.compute(channel)))
                .collect()
        })
        .collect();

    FeatureMatrix { names, data }
}

/// Rescale each column to `[0, 1]`. Constant columns become 0.
pub fn normalize(matrix: &mut FeatureMatrix) {
    for column in 0..matrix.n_features() {
        let values = matrix.data.iter().map(|row| row[column]);
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        for row in matrix.data.iter_mut() {
            row[column] = if range > 0.0 { (row[column] - min) / range } else { 0.0 };
        }
    }
}

/// Provides a feature matrix computed from the `SpikeSource` feature.
pub struct FeatureExtractor {
    this: Weak<Self>,
    broker: Weak<FeatureBroker>,
    node: Node,
    spikes_src: Dependency<dyn SpikeSource>,
    kinds: RefCell<Vec<FeatureKind>>,
    normalize: Cell<bool>,
    features: RefCell<Option<Rc<FeatureMatrix>>>,
}

impl FeatureExtractor {
    pub fn new(broker: &Rc<FeatureBroker>, normalize: bool) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            broker: Rc::downgrade(broker),
            node: Node::new(),
            spikes_src: Dependency::new(
                features::SPIKE_SOURCE,
                Predicate::has_attributes(&["spikes"]),
            ),
            kinds: RefCell::new(Vec::new()),
            normalize: Cell::new(normalize),
            features: RefCell::new(None),
        })
    }

    /// Add a feature by name (`"P2P"`, `"Peak"` or `"Valley"`).
    ///
    /// Takes effect at the next [`Component::update`].
    pub fn add_feature(&self, name: &str) -> BeansResult<()> {
        let kind: FeatureKind = name.parse()?;
        self.kinds.borrow_mut().push(kind);
        Ok(())
    }

    pub fn feature_kinds(&self) -> Vec<FeatureKind> {
        self.kinds.borrow().clone()
    }

    pub fn set_normalize(&self, normalize: bool) {
        self.normalize.set(normalize);
    }

    fn calculate(&self) -> BeansResult<FeatureMatrix> {
        let kinds = self.kinds.borrow().clone();
        if kinds.is_empty() {
            return Err(BeansError::recomputation(self.type_name(), "no features selected"));
        }

        let spikes = self
            .spikes_src
            .get_from(&self.broker, self.this.clone())?
            .spikes()?;
        let mut matrix = compute_features(&spikes, &kinds);
        if self.normalize.get() {
            normalize(&mut matrix);
        }
        debug!(
            spikes = matrix.n_spikes(),
            features = matrix.n_features(),
            "Features calculated"
        );
        Ok(matrix)
    }
}

impl FeatureSource for FeatureExtractor {
    fn features(&self) -> BeansResult<Rc<FeatureMatrix>> {
        if let Some(features) = self.features.borrow().as_ref() {
            return Ok(Rc::clone(features));
        }

        let features = Rc::new(self.calculate()?);
        *self.features.borrow_mut() = Some(Rc::clone(&features));
        Ok(features)
    }
}

impl Component for FeatureExtractor {
    fn node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn recompute(&self) -> BeansResult<()> {
        self.features.borrow_mut().take();
        Ok(())
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["features", "normalize"]
    }

    fn methods(&self) -> &'static [&'static str] {
        &["add_feature"]
    }

    provides_interfaces!(dyn FeatureSource);
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FeatureExtractorParams {
    /// Feature names, in column order
    #[serde(default)]
    pub features: Vec<String>,
    /// Rescale every column to [0, 1]
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

fn default_normalize() -> bool {
    true
}

#[derive(Default)]
pub struct FeatureExtractorFactory;

impl FeatureExtractorFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentFactory for FeatureExtractorFactory {
    fn component_type(&self) -> &'static str {
        "feature_extractor"
    }

    fn required_features(&self, _params: &ComponentParams) -> BeansResult<Vec<String>> {
        Ok(vec![features::SPIKE_SOURCE.to_string()])
    }

    fn create(
        &self,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        let params: FeatureExtractorParams = parse_params(params)?;
        let extractor = FeatureExtractor::new(broker, params.normalize);
        for name in &params.features {
            extractor.add_feature(name)?;
        }
        info!(features = ?params.features, "Creating feature extractor");
        Ok(extractor)
    }

    fn parameter_schema(&self) -> serde_json::Value {
        schema_of::<FeatureExtractorParams>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waveforms() -> Waveforms {
        Waveforms {
            time_ms: vec![0.0, 1.0, 2.0],
            data: vec![
                vec![vec![0.0, 4.0, -1.0], vec![1.0, 1.0, 1.0]],
                vec![vec![0.0, 2.0, -2.0], vec![1.0, 1.0, 1.0]],
            ],
            valid: vec![true, true],
        }
    }

    #[test]
    fn test_compute_features() {
        let matrix = compute_features(&waveforms(), &[FeatureKind::P2P, FeatureKind::Valley]);
        assert_eq!(
            matrix.names,
            vec!["Ch0:P2P", "Ch1:P2P", "Ch0:Valley", "Ch1:Valley"]
        );
        assert_eq!(matrix.data[0], vec![5.0, 0.0, -1.0, 1.0]);
        assert_eq!(matrix.data[1], vec![4.0, 0.0, -2.0, 1.0]);
    }

    #[test]
    fn test_normalize() {
        let mut matrix = compute_features(&waveforms(), &[FeatureKind::P2P]);
        normalize(&mut matrix);
        assert_eq!(matrix.data, vec![vec![1.0, 0.0], vec![0.0, 0.0]]);
    }

    #[test]
    fn test_feature_names() {
        assert_eq!("Peak".parse::<FeatureKind>().unwrap(), FeatureKind::Peak);
        let err = "PCA".parse::<FeatureKind>().unwrap_err();
        assert!(matches!(err, BeansError::InvalidConfiguration { .. }));

        let broker = Rc::new(FeatureBroker::new());
        let extractor = FeatureExtractor::new(&broker, true);
        assert!(extractor.add_feature("Width").is_err());
        extractor.add_feature("P2P").unwrap();
        assert_eq!(extractor.feature_kinds(), vec![FeatureKind::P2P]);
    }

    #[test]
    fn test_no_features_is_an_error() {
        let broker = Rc::new(FeatureBroker::new());
        let extractor = FeatureExtractor::new(&broker, true);
        let err = extractor.features().unwrap_err();
        assert!(matches!(err, BeansError::Recomputation { .. }));
    }
}
