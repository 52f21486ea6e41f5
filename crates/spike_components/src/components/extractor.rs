//! Cuts spike waveforms out of the recording.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use schemars::JsonSchema;
use serde::Deserialize;
use spike_beans::{
    parse_params, schema_of, BeansError, BeansResult, Component, ComponentFactory, ComponentParams,
    Dependency, FeatureBroker, Node, Predicate,
};
use spike_types::{DataError, Signal, SpikeTimes, Waveforms};
use tracing::debug;

use crate::capability::{features, SignalSource, SpikeMarkerSource, SpikeSource};
use crate::components::detector::DEFAULT_SP_WIN;

/// Cut one window per spike from every channel of `signal`.
///
/// Windows that leave the recording are zero padded and flagged invalid.
/// Fails on channels of different lengths.
pub fn extract_spikes(
    signal: &Signal,
    spt: &SpikeTimes,
    sp_win: (f64, f64),
) -> Result<Waveforms, DataError> {
    signal.validate()?;
    let start = signal.ms_to_samples(sp_win.0);
    let stop = signal.ms_to_samples(sp_win.1);
    let width = (stop - start).max(0) as usize;
    let n_samples = signal.n_samples() as isize;

    let time_ms = (start..stop)
        .map(|i| i as f64 * 1000.0 / signal.sample_rate)
        .collect();

    let mut data = Vec::with_capacity(spt.len());
    let mut valid = Vec::with_capacity(spt.len());
    for &t in &spt.times_ms {
        let onset = signal.ms_to_samples(t) + start;
        valid.push(onset >= 0 && onset + width as isize <= n_samples);

        let spike = signal
            .data
            .iter()
            .map(|channel| {
                (0..width as isize)
                    .map(|k| {
                        let idx = onset + k;
                        if idx >= 0 && idx < n_samples {
                            channel[idx as usize]
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();
        data.push(spike);
    }

    Ok(Waveforms { time_ms, data, valid })
}

/// Provides the waveforms of every detected spike.
pub struct SpikeExtractor {
    this: Weak<Self>,
    broker: Weak<FeatureBroker>,
    node: Node,
    signal_src: Dependency<dyn SignalSource>,
    marker_src: Dependency<dyn SpikeMarkerSource>,
    sp_win: Cell<(f64, f64)>,
    spikes: RefCell<Option<Rc<Waveforms>>>,
}

impl SpikeExtractor {
    pub fn new(broker: &Rc<FeatureBroker>, sp_win: (f64, f64)) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            broker: Rc::downgrade(broker),
            node: Node::new(),
            signal_src: Dependency::new(
                features::SIGNAL_SOURCE,
                Predicate::has_attributes(&["signal"]),
            ),
            marker_src: Dependency::new(
                features::SPIKE_MARKER_SOURCE,
                Predicate::has_attributes(&["events"]),
            ),
            sp_win: Cell::new(sp_win),
            spikes: RefCell::new(None),
        })
    }

    pub fn sp_win(&self) -> (f64, f64) {
        self.sp_win.get()
    }

    /// Takes effect at the next [`Component::update`].
    pub fn set_sp_win(&self, sp_win: (f64, f64)) {
        self.sp_win.set(sp_win);
    }

    fn extract(&self) -> BeansResult<Waveforms> {
        // Spike times first: the marker source registers on the signal
        // source before this extractor does.
        let spt = self
            .marker_src
            .get_from(&self.broker, self.this.clone())?
            .events()?;
        let signal = self
            .signal_src
            .get_from(&self.broker, self.this.clone())?
            .signal()?;

        let spikes = extract_spikes(&signal, &spt, self.sp_win.get())
            .map_err(|e| BeansError::recomputation(self.type_name(), e))?;
        debug!(
            spikes = spikes.n_spikes(),
            invalid = spikes.valid.iter().filter(|v| !**v).count(),
            "Spike waveforms extracted"
        );
        Ok(spikes)
    }
}

impl SpikeSource for SpikeExtractor {
    fn spikes(&self) -> BeansResult<Rc<Waveforms>> {
        if let Some(spikes) = self.spikes.borrow().as_ref() {
            return Ok(Rc::clone(spikes));
        }

        let spikes = Rc::new(self.extract()?);
        *self.spikes.borrow_mut() = Some(Rc::clone(&spikes));
        Ok(spikes)
    }
}

impl Component for SpikeExtractor {
    fn node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn recompute(&self) -> BeansResult<()> {
        self.spikes.borrow_mut().take();
        Ok(())
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["spikes", "sp_win"]
    }

    provides_interfaces!(dyn SpikeSource);
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SpikeExtractorParams {
    /// Waveform window in milliseconds relative to the spike time
    #[serde(default = "default_sp_win")]
    pub sp_win: (f64, f64),
}

fn default_sp_win() -> (f64, f64) {
    DEFAULT_SP_WIN
}

#[derive(Default)]
pub struct SpikeExtractorFactory;

impl SpikeExtractorFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentFactory for SpikeExtractorFactory {
    fn component_type(&self) -> &'static str {
        "spike_extractor"
    }

    fn required_features(&self, _params: &ComponentParams) -> BeansResult<Vec<String>> {
        Ok(vec![
            features::SIGNAL_SOURCE.to_string(),
            features::SPIKE_MARKER_SOURCE.to_string(),
        ])
    }

    fn create(
        &self,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        let params: SpikeExtractorParams = parse_params(params)?;
        Ok(SpikeExtractor::new(broker, params.sp_win))
    }

    fn parameter_schema(&self) -> serde_json::Value {
        schema_of::<SpikeExtractorParams>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_spikes() {
        let signal = Signal::new(
            vec![
                (0..10).map(f64::from).collect(),
                (10..20).map(f64::from).collect(),
            ],
            1000.0,
        );
        let spt = SpikeTimes::new(vec![3.0, 0.0, 9.0]);
        let spikes = extract_spikes(&signal, &spt, (-1.0, 2.0)).unwrap();

        assert_eq!(spikes.time_ms, vec![-1.0, 0.0, 1.0]);
        assert_eq!(spikes.n_spikes(), 3);
        assert_eq!(spikes.data[0], vec![vec![2.0, 3.0, 4.0], vec![12.0, 13.0, 14.0]]);
        // Leaves the recording on the left and on the right
        assert_eq!(spikes.data[1][0], vec![0.0, 0.0, 1.0]);
        assert_eq!(spikes.data[2][1], vec![18.0, 19.0, 0.0]);
        assert_eq!(spikes.valid, vec![true, false, false]);
    }

    #[test]
    fn test_no_spikes() {
        let signal = Signal::new(vec![vec![0.0; 10]], 1000.0);
        let spikes = extract_spikes(&signal, &SpikeTimes::default(), DEFAULT_SP_WIN).unwrap();
        assert_eq!(spikes.n_spikes(), 0);
        assert!(spikes.valid.is_empty());
    }

    #[test]
    fn test_ragged_signal_is_an_error() {
        let signal = Signal::new(vec![vec![0.0; 100], vec![0.0; 10]], 1000.0);
        let err = extract_spikes(&signal, &SpikeTimes::new(vec![50.0]), (-0.2, 0.8)).unwrap_err();
        assert_eq!(err, DataError::LengthMismatch { expected: 100, found: 10 });
    }
}
