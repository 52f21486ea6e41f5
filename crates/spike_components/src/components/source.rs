//! Recording source backed by an [`IoFilter`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use schemars::JsonSchema;
use serde::Deserialize;
use spike_beans::{
    parse_params, schema_of, BeansError, BeansResult, Component, ComponentFactory, ComponentParams,
    FeatureBroker, Node,
};
use spike_types::{Signal, SpikeTimes};
use tracing::{debug, info};

use crate::capability::{EventsStore, RecordingSource, SignalSource};
use crate::io::{IoFilter, MemoryFilter};

/// A dataset read through an I/O filter.
///
/// The signal and every requested spike train are read once and memoised until
/// the next [`Component::update`].
pub struct GenericSource {
    node: Node,
    dataset: String,
    overwrite: bool,
    filter: Box<dyn IoFilter>,
    signal: RefCell<Option<Rc<Signal>>>,
    events: RefCell<HashMap<String, Rc<SpikeTimes>>>,
}

impl GenericSource {
    pub fn new(dataset: impl Into<String>, filter: Box<dyn IoFilter>) -> Rc<Self> {
        Self::build(dataset.into(), filter, false)
    }

    /// A source that replaces existing spike trains on write
    pub fn overwriting(dataset: impl Into<String>, filter: Box<dyn IoFilter>) -> Rc<Self> {
        Self::build(dataset.into(), filter, true)
    }

    fn build(dataset: String, filter: Box<dyn IoFilter>, overwrite: bool) -> Rc<Self> {
        Rc::new(Self {
            node: Node::new(),
            dataset,
            overwrite,
            filter,
            signal: RefCell::new(None),
            events: RefCell::new(HashMap::new()),
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    fn node_path(&self, cell: &str) -> String {
        format!("{}/{}", self.dataset, cell)
    }

    /// Store a new signal and propagate the change.
    pub fn write_signal(&self, signal: &Signal) -> BeansResult<()> {
        self.filter.write_signal(&self.dataset, signal)?;
        self.update()
    }
}

impl SignalSource for GenericSource {
    fn signal(&self) -> BeansResult<Rc<Signal>> {
        if let Some(signal) = self.signal.borrow().as_ref() {
            return Ok(Rc::clone(signal));
        }

        let signal = self.filter.read_signal(&self.dataset)?;
        signal
            .validate()
            .map_err(|e| BeansError::recomputation(self.type_name(), e))?;
        let signal = Rc::new(signal);
        debug!(
            dataset = %self.dataset,
            channels = signal.n_channels(),
            samples = signal.n_samples(),
            "Signal loaded"
        );
        *self.signal.borrow_mut() = Some(Rc::clone(&signal));
        Ok(signal)
    }
}

impl EventsStore for GenericSource {
    fn events(&self, cell: &str) -> BeansResult<Rc<SpikeTimes>> {
        if let Some(spt) = self.events.borrow().get(cell) {
            return Ok(Rc::clone(spt));
        }

        let spt = Rc::new(self.filter.read_events(&self.node_path(cell))?);
        self.events
            .borrow_mut()
            .insert(cell.to_string(), Rc::clone(&spt));
        Ok(spt)
    }

    fn write_events(&self, cell: &str, spt: SpikeTimes, overwrite: bool) -> BeansResult<()> {
        self.filter
            .write_events(&self.node_path(cell), &spt, overwrite || self.overwrite)?;
        self.events.borrow_mut().remove(cell);
        Ok(())
    }
}

impl Component for GenericSource {
    fn node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn recompute(&self) -> BeansResult<()> {
        self.signal.borrow_mut().take();
        self.events.borrow_mut().clear();
        Ok(())
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["signal", "events", "dataset"]
    }

    fn methods(&self) -> &'static [&'static str] {
        &["write_signal", "write_events"]
    }

    provides_interfaces!(dyn SignalSource, dyn EventsStore, dyn RecordingSource);
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MemorySourceParams {
    /// Dataset path inside the store
    pub dataset: String,
    /// Replace existing spike trains on write
    #[serde(default)]
    pub overwrite: bool,
}

/// Builds [`GenericSource`]s over a shared [`MemoryFilter`].
pub struct MemorySourceFactory {
    filter: MemoryFilter,
}

impl MemorySourceFactory {
    pub fn new(filter: MemoryFilter) -> Self {
        Self { filter }
    }
}

impl ComponentFactory for MemorySourceFactory {
    fn component_type(&self) -> &'static str {
        "memory_source"
    }

    fn create(
        &self,
        _broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        let params: MemorySourceParams = parse_params(params)?;
        info!(dataset = %params.dataset, "Creating memory source");
        let filter = Box::new(self.filter.clone());
        let source = if params.overwrite {
            GenericSource::overwriting(params.dataset, filter)
        } else {
            GenericSource::new(params.dataset, filter)
        };
        Ok(source)
    }

    fn parameter_schema(&self) -> serde_json::Value {
        schema_of::<MemorySourceParams>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> MemoryFilter {
        MemoryFilter::new()
            .with_signal("session", Signal::new(vec![vec![1.0, 2.0, 3.0]], 1000.0))
            .with_events("session/stim", SpikeTimes::new(vec![1.0]))
    }

    #[test]
    fn test_signal_is_memoised_until_update() {
        let filter = filter();
        let source = GenericSource::new("session", Box::new(filter.clone()));

        let a = source.signal().unwrap();
        let b = source.signal().unwrap();
        assert!(Rc::ptr_eq(&a, &b));

        source.update().unwrap();
        let c = source.signal().unwrap();
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(*a, *c);
    }

    #[test]
    fn test_ragged_signal_rejected_on_load() {
        let filter = MemoryFilter::new()
            .with_signal("session", Signal::new(vec![vec![0.0; 100], vec![0.0; 10]], 1000.0));
        let source = GenericSource::new("session", Box::new(filter));

        let err = source.signal().unwrap_err();
        assert!(matches!(err, BeansError::Recomputation { .. }));
        assert!(err.to_string().contains("Length mismatch"));
    }

    #[test]
    fn test_events_cached_per_cell() {
        let filter = filter().with_events("session/cell1", SpikeTimes::new(vec![5.0, 6.0]));
        let source = GenericSource::new("session", Box::new(filter));

        assert_eq!(source.events("stim").unwrap().times_ms, vec![1.0]);
        assert_eq!(source.events("cell1").unwrap().len(), 2);
        assert!(source.events("cell2").is_err());
    }

    #[test]
    fn test_write_events_refreshes_cell() {
        let filter = filter();
        let source = GenericSource::new("session", Box::new(filter.clone()));

        assert_eq!(source.events("stim").unwrap().len(), 1);
        assert!(source
            .write_events("stim", SpikeTimes::new(vec![1.0, 2.0]), false)
            .is_err());
        source
            .write_events("stim", SpikeTimes::new(vec![1.0, 2.0]), true)
            .unwrap();
        assert_eq!(source.events("stim").unwrap().len(), 2);

        let overwriting = GenericSource::overwriting("session", Box::new(filter));
        overwriting
            .write_events("stim", SpikeTimes::new(vec![]), false)
            .unwrap();
        assert!(overwriting.events("stim").unwrap().is_empty());
    }

    #[test]
    fn test_write_signal_invalidates_cache() {
        let source = GenericSource::new("session", Box::new(filter()));
        assert_eq!(source.signal().unwrap().n_samples(), 3);

        source
            .write_signal(&Signal::new(vec![vec![0.0; 5]], 1000.0))
            .unwrap();
        assert_eq!(source.signal().unwrap().n_samples(), 5);
    }

    #[test]
    fn test_factory_params() {
        let factory = MemorySourceFactory::new(filter());
        let broker = Rc::new(FeatureBroker::new());

        let mut params = ComponentParams::new();
        params.insert("dataset".into(), serde_json::json!("session"));
        let component = factory.create(&broker, &params).unwrap();
        assert!(component.as_any().is::<GenericSource>());

        params.insert("datset".into(), serde_json::json!("session"));
        assert!(factory.create(&broker, &params).is_err());
    }
}
