//! Role contracts between pipeline components.
//!
//! A consumer asks the broker for a feature by name and receives it as one of
//! these traits. Every concrete component lists the roles it plays with
//! [`provides_interfaces!`](spike_beans::provides_interfaces).

use std::rc::Rc;

use spike_beans::{BeansResult, Component};
use spike_types::{ExportMetadata, FeatureMatrix, Label, Signal, SpikeTimes, Waveforms};

/// Feature names agreed on by producers and consumers.
pub mod features {
    pub const SIGNAL_SOURCE: &str = "SignalSource";
    pub const SPIKE_MARKER_SOURCE: &str = "SpikeMarkerSource";
    pub const SPIKE_SOURCE: &str = "SpikeSource";
    pub const FEATURE_SOURCE: &str = "FeatureSource";
    pub const LABEL_SOURCE: &str = "LabelSource";
    pub const EVENTS_OUTPUT: &str = "EventsOutput";
}

/// Provides a continuous recording.
pub trait SignalSource: Component {
    fn signal(&self) -> BeansResult<Rc<Signal>>;
}

/// Named spike trains that can be read back and written.
pub trait EventsStore: Component {
    /// Spike train stored under `cell` (e.g. `"stim"`, `"cell1"`).
    fn events(&self, cell: &str) -> BeansResult<Rc<SpikeTimes>>;

    fn write_events(&self, cell: &str, spt: SpikeTimes, overwrite: bool) -> BeansResult<()>;
}

/// A source that is both a recording and an events store.
pub trait RecordingSource: SignalSource + EventsStore {}

impl<T: SignalSource + EventsStore> RecordingSource for T {}

/// Provides detected spike times.
pub trait SpikeMarkerSource: Component {
    fn events(&self) -> BeansResult<Rc<SpikeTimes>>;

    /// Detection settings to store with exported cells, if any.
    fn metadata(&self) -> BeansResult<Option<ExportMetadata>> {
        Ok(None)
    }
}

/// Provides spike waveforms.
pub trait SpikeSource: Component {
    fn spikes(&self) -> BeansResult<Rc<Waveforms>>;
}

/// Provides per-spike features.
pub trait FeatureSource: Component {
    fn features(&self) -> BeansResult<Rc<FeatureMatrix>>;
}

/// Provides one cluster label per spike.
pub trait LabelSource: Component {
    fn labels(&self) -> BeansResult<Rc<Vec<Label>>>;
}
