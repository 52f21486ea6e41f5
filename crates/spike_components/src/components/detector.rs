//! Threshold spike detection with optional peak alignment.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use schemars::JsonSchema;
use serde::Deserialize;
use spike_beans::{
    parse_params, schema_of, BeansError, BeansResult, Component, ComponentFactory,
    ComponentParams, Dependency, FeatureBroker, Node, Predicate,
};
use spike_types::{Edge, ExportMetadata, Signal, SpikeTimes};
use tracing::{debug, info};

use crate::capability::{features, SignalSource, SpikeMarkerSource};

/// Default spike window in milliseconds
pub const DEFAULT_SP_WIN: (f64, f64) = (-0.2, 0.8);

/// Noise estimate scale: `median(|x|) / 0.6745` estimates the noise SD
const MAD_SCALE: f64 = 0.6745;

/// Detection parameters. Changes take effect at the next [`Component::update`].
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DetectorSettings {
    /// Fixed threshold; `None` estimates one from the noise level
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Channel used for detection
    #[serde(default)]
    pub contact: usize,
    #[serde(default)]
    pub edge: Edge,
    /// Window searched for the peak, in milliseconds relative to the crossing
    #[serde(default = "default_sp_win")]
    pub sp_win: (f64, f64),
    /// Move each spike to the extremum inside `sp_win`
    #[serde(default = "default_align")]
    pub align: bool,
}

fn default_sp_win() -> (f64, f64) {
    DEFAULT_SP_WIN
}

fn default_align() -> bool {
    true
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold: None,
            contact: 0,
            edge: Edge::default(),
            sp_win: DEFAULT_SP_WIN,
            align: true,
        }
    }
}

/// `4 * median(|x|) / 0.6745`, negated for negative edges.
pub fn auto_threshold(data: &[f64], edge: Edge) -> f64 {
    let mut abs: Vec<f64> = data.iter().map(|x| x.abs()).collect();
    abs.sort_by(f64::total_cmp);
    let median = match abs.len() {
        0 => 0.0,
        n if n % 2 == 1 => abs[n / 2],
        n => (abs[n / 2 - 1] + abs[n / 2]) / 2.0,
    };
    let threshold = 4.0 * median / MAD_SCALE;
    if edge.is_positive() {
        threshold
    } else {
        -threshold
    }
}

/// Sample indices where `data` crosses `threshold` in the direction of `edge`.
pub fn threshold_crossings(data: &[f64], threshold: f64, edge: Edge) -> Vec<usize> {
    data.windows(2)
        .enumerate()
        .filter(|(_, w)| {
            if edge.is_positive() {
                w[0] <= threshold && w[1] > threshold
            } else {
                w[0] >= threshold && w[1] < threshold
            }
        })
        .map(|(i, _)| i + 1)
        .collect()
}

/// Move each index to the extremum of `data` within `window` samples of it.
/// Spikes that collapse onto the same peak are reported once.
pub fn align_to_extremum(data: &[f64], indices: &[usize], window: (isize, isize), edge: Edge) -> Vec<usize> {
    let n = data.len() as isize;
    let mut aligned: Vec<usize> = indices
        .iter()
        .map(|&i| {
            let lo = (i as isize + window.0).max(0);
            let hi = (i as isize + window.1).min(n);
            if lo >= hi {
                return i;
            }
            let (lo, hi) = (lo as usize, hi as usize);
            let candidates = data[lo..hi].iter().enumerate();
            let best = if edge.is_positive() {
                candidates.max_by(|a, b| a.1.total_cmp(b.1))
            } else {
                candidates.min_by(|a, b| a.1.total_cmp(b.1))
            };
            best.map(|(offset, _)| lo + offset).unwrap_or(i)
        })
        .collect();
    aligned.dedup();
    aligned
}

/// Detects spikes on one contact of the `SignalSource` feature.
pub struct SpikeDetector {
    this: Weak<Self>,
    broker: Weak<FeatureBroker>,
    node: Node,
    signal_src: Dependency<dyn SignalSource>,
    settings: RefCell<DetectorSettings>,
    estimated: Cell<Option<f64>>,
    spike_times: RefCell<Option<Rc<SpikeTimes>>>,
}

impl SpikeDetector {
    pub fn new(broker: &Rc<FeatureBroker>, settings: DetectorSettings) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            broker: Rc::downgrade(broker),
            node: Node::new(),
            signal_src: Dependency::new(
                features::SIGNAL_SOURCE,
                Predicate::has_attributes(&["signal"]),
            ),
            settings: RefCell::new(settings),
            estimated: Cell::new(None),
            spike_times: RefCell::new(None),
        })
    }

    pub fn settings(&self) -> DetectorSettings {
        self.settings.borrow().clone()
    }

    /// Threshold of the last detection if it was estimated, otherwise the fixed one.
    pub fn threshold(&self) -> Option<f64> {
        self.estimated.get().or(self.settings.borrow().threshold)
    }

    /// Set a fixed threshold (`None` to estimate it). Discards the last estimate.
    pub fn set_threshold(&self, threshold: Option<f64>) {
        self.settings.borrow_mut().threshold = threshold;
        self.estimated.set(None);
    }

    pub fn set_contact(&self, contact: usize) {
        self.settings.borrow_mut().contact = contact;
    }

    pub fn set_edge(&self, edge: Edge) {
        self.settings.borrow_mut().edge = edge;
    }

    pub fn set_sp_win(&self, sp_win: (f64, f64)) {
        self.settings.borrow_mut().sp_win = sp_win;
    }

    pub fn set_align(&self, align: bool) {
        self.settings.borrow_mut().align = align;
    }

    fn signal(&self) -> BeansResult<Rc<Signal>> {
        self.signal_src
            .get_from(&self.broker, self.this.clone())?
            .signal()
    }

    fn detect(&self) -> BeansResult<SpikeTimes> {
        let signal = self.signal()?;
        let settings = self.settings.borrow().clone();
        let data = signal
            .contact(settings.contact)
            .map_err(|e| BeansError::recomputation(self.type_name(), e))?;

        let threshold = match settings.threshold {
            Some(threshold) => threshold,
            None => {
                let estimated = auto_threshold(data, settings.edge);
                self.estimated.set(Some(estimated));
                estimated
            }
        };

        let mut indices = threshold_crossings(data, threshold, settings.edge);
        if settings.align {
            let window = (
                signal.ms_to_samples(settings.sp_win.0),
                signal.ms_to_samples(settings.sp_win.1),
            );
            indices = align_to_extremum(data, &indices, window, settings.edge);
        }

        debug!(
            contact = settings.contact,
            threshold,
            spikes = indices.len(),
            "Spikes detected"
        );
        Ok(SpikeTimes {
            times_ms: indices.into_iter().map(|i| signal.samples_to_ms(i)).collect(),
            threshold: Some(threshold),
            metadata: None,
        })
    }
}

impl SpikeMarkerSource for SpikeDetector {
    fn events(&self) -> BeansResult<Rc<SpikeTimes>> {
        if let Some(spt) = self.spike_times.borrow().as_ref() {
            return Ok(Rc::clone(spt));
        }

        let spt = Rc::new(self.detect()?);
        *self.spike_times.borrow_mut() = Some(Rc::clone(&spt));
        Ok(spt)
    }

    fn metadata(&self) -> BeansResult<Option<ExportMetadata>> {
        let spt = self.events()?;
        let settings = self.settings.borrow();
        Ok(spt.threshold.map(|threshold| ExportMetadata {
            contact: settings.contact,
            threshold,
            edge: settings.edge,
            sp_win: settings.sp_win,
        }))
    }
}

impl Component for SpikeDetector {
    fn node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn recompute(&self) -> BeansResult<()> {
        self.spike_times.borrow_mut().take();
        Ok(())
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["events", "threshold", "contact", "edge", "sp_win", "align"]
    }

    fn methods(&self) -> &'static [&'static str] {
        &["set_threshold"]
    }

    provides_interfaces!(dyn SpikeMarkerSource);
}

#[derive(Default)]
pub struct SpikeDetectorFactory;

impl SpikeDetectorFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentFactory for SpikeDetectorFactory {
    fn component_type(&self) -> &'static str {
        "spike_detector"
    }

    fn required_features(&self, _params: &ComponentParams) -> BeansResult<Vec<String>> {
        Ok(vec![features::SIGNAL_SOURCE.to_string()])
    }

    fn create(
        &self,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        let settings: DetectorSettings = parse_params(params)?;
        info!(?settings, "Creating spike detector");
        Ok(SpikeDetector::new(broker, settings))
    }

    fn parameter_schema(&self) -> serde_json::Value {
        schema_of::<DetectorSettings>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_auto_threshold() {
        let data = [1.0, -1.0, 2.0, -2.0, 3.0];
        let expected = 4.0 * 2.0 / MAD_SCALE;
        assert!((auto_threshold(&data, Edge::Max) - expected).abs() < 1e-12);
        assert!((auto_threshold(&data, Edge::Falling) + expected).abs() < 1e-12);
        assert_eq!(auto_threshold(&[], Edge::Max), 0.0);
    }

    #[test]
    fn test_threshold_crossings() {
        let data = [0.0, 2.0, 3.0, 0.0, -2.0, 0.0, 2.0];
        assert_eq!(threshold_crossings(&data, 1.0, Edge::Rising), vec![1, 6]);
        assert_eq!(threshold_crossings(&data, -1.0, Edge::Min), vec![4]);
    }

    #[test]
    fn test_alignment_moves_to_peak_and_merges() {
        let data = [0.0, 2.0, 5.0, 3.0, 0.0, 0.0];
        assert_eq!(align_to_extremum(&data, &[1, 2], (0, 3), Edge::Max), vec![2]);
        assert_eq!(align_to_extremum(&data, &[5], (0, 3), Edge::Max), vec![5]);
    }

    #[test]
    fn test_settings_defaults_from_params() {
        let settings: DetectorSettings = parse_params(&ComponentParams::new()).unwrap();
        assert_eq!(settings, DetectorSettings::default());

        let mut params = ComponentParams::new();
        params.insert("edge".into(), serde_json::json!("min"));
        params.insert("threshold".into(), serde_json::json!(-3.5));
        let settings: DetectorSettings = parse_params(&params).unwrap();
        assert_eq!(settings.edge, Edge::Min);
        assert_eq!(settings.threshold, Some(-3.5));
    }

    proptest! {
        #[test]
        fn prop_crossings_are_ordered_upward_crossings(
            data in proptest::collection::vec(-10.0f64..10.0, 0..200),
            threshold in -5.0f64..5.0,
        ) {
            let crossings = threshold_crossings(&data, threshold, Edge::Rising);
            prop_assert!(crossings.windows(2).all(|w| w[0] < w[1]));
            for i in crossings {
                prop_assert!(data[i - 1] <= threshold && data[i] > threshold);
            }
        }
    }
}
