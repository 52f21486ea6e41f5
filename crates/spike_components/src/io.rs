//! Storage back ends for recording sources.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::rc::Rc;

use spike_beans::BeansResult;
use spike_types::{Signal, SpikeTimes};
use tracing::debug;

/// Reads and writes signals and spike trains addressed by node path
/// (`"dataset"` for a signal, `"dataset/cell"` for a spike train).
pub trait IoFilter {
    fn read_signal(&self, dataset: &str) -> BeansResult<Signal>;

    fn write_signal(&self, dataset: &str, signal: &Signal) -> BeansResult<()>;

    fn read_events(&self, node: &str) -> BeansResult<SpikeTimes>;

    /// Fails if `node` exists and `overwrite` is false.
    fn write_events(&self, node: &str, spt: &SpikeTimes, overwrite: bool) -> BeansResult<()>;
}

#[derive(Debug, Default)]
struct MemoryStore {
    signals: HashMap<String, Signal>,
    events: BTreeMap<String, SpikeTimes>,
}

/// In-memory [`IoFilter`]. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    store: Rc<RefCell<MemoryStore>>,
}

impl MemoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style signal insertion
    pub fn with_signal(self, dataset: impl Into<String>, signal: Signal) -> Self {
        self.store.borrow_mut().signals.insert(dataset.into(), signal);
        self
    }

    /// Builder-style spike train insertion
    pub fn with_events(self, node: impl Into<String>, spt: SpikeTimes) -> Self {
        self.store.borrow_mut().events.insert(node.into(), spt);
        self
    }

    /// Stored spike train paths, sorted
    pub fn event_nodes(&self) -> Vec<String> {
        self.store.borrow().events.keys().cloned().collect()
    }

    pub fn contains_events(&self, node: &str) -> bool {
        self.store.borrow().events.contains_key(node)
    }
}

fn not_found(what: &str, node: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("No {} stored at '{}'", what, node))
}

impl IoFilter for MemoryFilter {
    fn read_signal(&self, dataset: &str) -> BeansResult<Signal> {
        let store = self.store.borrow();
        let signal = store
            .signals
            .get(dataset)
            .cloned()
            .ok_or_else(|| not_found("signal", dataset))?;
        Ok(signal)
    }

    fn write_signal(&self, dataset: &str, signal: &Signal) -> BeansResult<()> {
        self.store
            .borrow_mut()
            .signals
            .insert(dataset.to_string(), signal.clone());
        debug!(dataset, "Signal written");
        Ok(())
    }

    fn read_events(&self, node: &str) -> BeansResult<SpikeTimes> {
        let store = self.store.borrow();
        let spt = store
            .events
            .get(node)
            .cloned()
            .ok_or_else(|| not_found("events", node))?;
        Ok(spt)
    }

    fn write_events(&self, node: &str, spt: &SpikeTimes, overwrite: bool) -> BeansResult<()> {
        let mut store = self.store.borrow_mut();
        if !overwrite && store.events.contains_key(node) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("Events at '{}' already exist", node),
            )
            .into());
        }
        store.events.insert(node.to_string(), spt.clone());
        debug!(node, spikes = spt.len(), "Events written");
        Ok(())
    }
}
