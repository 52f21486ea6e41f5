//! Stimulus artefact removal wrapped around another recording source.

use std::cell::RefCell;
use std::rc::Rc;

use schemars::JsonSchema;
use serde::Deserialize;
use spike_beans::{
    parse_params, schema_of, BeansError, BeansResult, Component, ComponentFactory, ComponentParams,
    FeatureBroker, Node,
};
use spike_types::{DataError, Signal, SpikeTimes};
use tracing::{debug, info};

use crate::capability::{EventsStore, RecordingSource, SignalSource};

/// Cell name of the stimulus train.
pub const STIM_CELL: &str = "stim";

/// Wraps a recording source and subtracts the mean stimulus-locked waveform
/// from its signal. Everything else, the observer node included, is the
/// wrapped source's.
pub struct NoMeanSource<S: RecordingSource + ?Sized + 'static> {
    inner: Rc<S>,
    window: (f64, f64),
    stim_cell: String,
    /// Raw signal the cleaned one was computed from, and the cleaned signal
    cleaned: RefCell<Option<(Rc<Signal>, Rc<Signal>)>>,
}

impl<S: RecordingSource + ?Sized + 'static> NoMeanSource<S> {
    /// `window` is in milliseconds relative to each stimulus.
    pub fn new(inner: Rc<S>, window: (f64, f64)) -> Rc<Self> {
        Self::with_stim_cell(inner, window, STIM_CELL)
    }

    pub fn with_stim_cell(inner: Rc<S>, window: (f64, f64), stim_cell: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            inner,
            window,
            stim_cell: stim_cell.into(),
            cleaned: RefCell::new(None),
        })
    }

    pub fn inner(&self) -> &Rc<S> {
        &self.inner
    }

    pub fn window(&self) -> (f64, f64) {
        self.window
    }
}

/// Subtract the average of every full stimulus window from each of those windows.
pub fn subtract_mean(
    signal: &Signal,
    stim: &SpikeTimes,
    window: (f64, f64),
) -> Result<Signal, DataError> {
    signal.validate()?;
    let start = signal.ms_to_samples(window.0);
    let width = (signal.ms_to_samples(window.1) - start).max(0) as usize;
    let n_samples = signal.n_samples() as isize;

    let onsets: Vec<usize> = stim
        .times_ms
        .iter()
        .map(|&t| signal.ms_to_samples(t) + start)
        .filter(|&onset| onset >= 0 && onset + width as isize <= n_samples)
        .map(|onset| onset as usize)
        .collect();

    let mut cleaned = signal.clone();
    if onsets.is_empty() || width == 0 {
        return Ok(cleaned);
    }

    for channel in cleaned.data.iter_mut() {
        let mut mean = vec![0.0; width];
        for &onset in &onsets {
            for (m, x) in mean.iter_mut().zip(&channel[onset..onset + width]) {
                *m += x;
            }
        }
        for m in mean.iter_mut() {
            *m /= onsets.len() as f64;
        }
        for &onset in &onsets {
            for (x, m) in channel[onset..onset + width].iter_mut().zip(&mean) {
                *x -= m;
            }
        }
    }
    Ok(cleaned)
}

impl<S: RecordingSource + ?Sized + 'static> SignalSource for NoMeanSource<S> {
    fn signal(&self) -> BeansResult<Rc<Signal>> {
        let raw = self.inner.signal()?;
        if let Some((source, cleaned)) = self.cleaned.borrow().as_ref() {
            if Rc::ptr_eq(source, &raw) {
                return Ok(Rc::clone(cleaned));
            }
        }

        let stim = self.inner.events(&self.stim_cell)?;
        debug!(stimuli = stim.len(), window = ?self.window, "Subtracting mean stimulus response");
        let cleaned = subtract_mean(&raw, &stim, self.window)
            .map_err(|e| BeansError::recomputation(self.type_name(), e))?;
        let cleaned = Rc::new(cleaned);
        *self.cleaned.borrow_mut() = Some((raw, Rc::clone(&cleaned)));
        Ok(cleaned)
    }
}

impl<S: RecordingSource + ?Sized + 'static> EventsStore for NoMeanSource<S> {
    fn events(&self, cell: &str) -> BeansResult<Rc<SpikeTimes>> {
        self.inner.events(cell)
    }

    fn write_events(&self, cell: &str, spt: SpikeTimes, overwrite: bool) -> BeansResult<()> {
        self.inner.write_events(cell, spt, overwrite)
    }
}

impl<S: RecordingSource + ?Sized + 'static> Component for NoMeanSource<S> {
    fn node(&self) -> Option<&Node> {
        self.inner.node()
    }

    fn recompute(&self) -> BeansResult<()> {
        self.cleaned.borrow_mut().take();
        self.inner.recompute()
    }

    fn attributes(&self) -> &'static [&'static str] {
        self.inner.attributes()
    }

    fn methods(&self) -> &'static [&'static str] {
        self.inner.methods()
    }

    provides_interfaces!(dyn SignalSource, dyn EventsStore, dyn RecordingSource);
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoMeanSourceParams {
    /// Feature providing the raw recording
    pub source: String,
    /// Window around each stimulus, in milliseconds
    pub window: (f64, f64),
    #[serde(default = "default_stim_cell")]
    pub stim_cell: String,
}

fn default_stim_cell() -> String {
    STIM_CELL.to_string()
}

#[derive(Default)]
pub struct NoMeanSourceFactory;

impl NoMeanSourceFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentFactory for NoMeanSourceFactory {
    fn component_type(&self) -> &'static str {
        "no_mean_source"
    }

    fn required_features(&self, params: &ComponentParams) -> BeansResult<Vec<String>> {
        let params: NoMeanSourceParams = parse_params(params)?;
        Ok(vec![params.source])
    }

    fn create(
        &self,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        let params: NoMeanSourceParams = parse_params(params)?;
        let inner = broker.resolve_as::<dyn RecordingSource>(&params.source)?;
        info!(source = %params.source, window = ?params.window, "Creating no-mean source");
        Ok(NoMeanSource::with_stim_cell(inner, params.window, params.stim_cell))
    }

    fn parameter_schema(&self) -> serde_json::Value {
        schema_of::<NoMeanSourceParams>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::source::GenericSource;
    use crate::io::MemoryFilter;

    fn recording() -> Signal {
        // Stimulus artefact [5, 5] at samples 2 and 6, on top of a constant 1.0
        let mut data = vec![1.0; 10];
        for i in [2, 3, 6, 7] {
            data[i] += 5.0;
        }
        Signal::new(vec![data], 1000.0)
    }

    #[test]
    fn test_subtract_mean_removes_artefact() {
        let stim = SpikeTimes::new(vec![2.0, 6.0]);
        let cleaned = subtract_mean(&recording(), &stim, (0.0, 2.0)).unwrap();
        assert_eq!(
            cleaned.data[0],
            vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_ragged_signal_is_an_error() {
        let signal = Signal::new(vec![vec![0.0; 100], vec![0.0; 10]], 1000.0);
        let stim = SpikeTimes::new(vec![50.0]);
        assert!(matches!(
            subtract_mean(&signal, &stim, (0.0, 2.0)),
            Err(DataError::LengthMismatch { expected: 100, found: 10 })
        ));
    }

    #[test]
    fn test_partial_windows_are_skipped() {
        // The second window would run past the end of the recording
        let stim = SpikeTimes::new(vec![2.0, 9.0]);
        let cleaned = subtract_mean(&recording(), &stim, (0.0, 2.0)).unwrap();
        assert_eq!(cleaned.data[0][2], 0.0);
        assert_eq!(cleaned.data[0][9], 1.0);
    }

    #[test]
    fn test_forwards_to_wrapped_source() {
        let filter = MemoryFilter::new()
            .with_signal("session", recording())
            .with_events("session/stim", SpikeTimes::new(vec![2.0, 6.0]));
        let raw = GenericSource::new("session", Box::new(filter));
        let source = NoMeanSource::new(raw.clone(), (0.0, 2.0));

        let cleaned = source.signal().unwrap();
        assert_eq!(cleaned.data[0][3], 0.0);
        assert!(Rc::ptr_eq(&cleaned, &source.signal().unwrap()));
        assert_eq!(source.events("stim").unwrap().len(), 2);
        assert!(std::ptr::eq(source.node().unwrap(), raw.node().unwrap()));
        assert_eq!(source.attributes(), raw.attributes());

        // A refreshed raw signal produces a new cleaned signal
        raw.update().unwrap();
        assert!(!Rc::ptr_eq(&cleaned, &source.signal().unwrap()));
    }
}
