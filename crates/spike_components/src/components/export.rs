//! Writes sorted cells back to an events store.

use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use schemars::JsonSchema;
use serde::Deserialize;
use spike_beans::{
    parse_params, schema_of, BeansError, BeansResult, Component, ComponentFactory,
    ComponentParams, Dependency, FeatureBroker, Node, Predicate,
};
use spike_types::{split_cells, Label, TRASH_LABEL};
use tracing::info;

use crate::capability::{features, EventsStore, LabelSource, SpikeMarkerSource};

/// Splits the detected spike train by cluster label and stores one train per
/// cell as `cell{N}` in the `EventsOutput` feature.
pub struct ExportCells {
    this: Weak<Self>,
    broker: Weak<FeatureBroker>,
    node: Node,
    labels_src: Dependency<dyn LabelSource>,
    marker_src: Dependency<dyn SpikeMarkerSource>,
    output: Dependency<dyn EventsStore>,
    with_metadata: bool,
}

impl ExportCells {
    pub fn new(broker: &Rc<FeatureBroker>) -> Rc<Self> {
        Self::build(broker, Predicate::has_attributes(&["events"]), false)
    }

    /// Also records the detector settings with every exported cell. The spike
    /// marker source must advertise them.
    pub fn with_metadata(broker: &Rc<FeatureBroker>) -> Rc<Self> {
        Self::build(
            broker,
            Predicate::has_attributes(&["events", "threshold", "contact", "edge", "sp_win"]),
            true,
        )
    }

    fn build(broker: &Rc<FeatureBroker>, marker: Predicate, with_metadata: bool) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            broker: Rc::downgrade(broker),
            node: Node::new(),
            labels_src: Dependency::new(
                features::LABEL_SOURCE,
                Predicate::has_attributes(&["labels"]),
            ),
            marker_src: Dependency::new(features::SPIKE_MARKER_SOURCE, marker),
            output: Dependency::new(
                features::EVENTS_OUTPUT,
                Predicate::has_attributes(&["events"]),
            ),
            with_metadata,
        })
    }

    /// Export every cell, or only those in `mapping` (cluster label to exported
    /// cell id). Returns the cell names written.
    pub fn export(&self, mapping: Option<&BTreeMap<Label, Label>>, overwrite: bool) -> BeansResult<Vec<String>> {
        let labels = self
            .labels_src
            .get_from(&self.broker, self.this.clone())?
            .labels()?;
        let marker = self.marker_src.get_from(&self.broker, self.this.clone())?;
        let spt = marker.events()?;
        let output = self.output.get_from(&self.broker, self.this.clone())?;

        let mut cells = split_cells(&spt, &labels)
            .map_err(|e| BeansError::recomputation(self.type_name(), e))?;
        let metadata = if self.with_metadata {
            marker.metadata()?
        } else {
            None
        };

        let exports: Vec<(Label, Label)> = match mapping {
            Some(mapping) => mapping.iter().map(|(&c, &id)| (c, id)).collect(),
            None => cells.keys().map(|&c| (c, c)).collect(),
        };

        let mut written = Vec::with_capacity(exports.len());
        for (cluster, cell_id) in exports {
            let mut cell = cells.remove(&cluster).ok_or_else(|| {
                BeansError::invalid(format!("Cluster {} does not exist", cluster))
            })?;
            if cell_id != TRASH_LABEL {
                cell.metadata = metadata.clone();
            }
            let name = format!("cell{}", cell_id);
            output.write_events(&name, cell, overwrite)?;
            written.push(name);
        }

        info!(cells = written.len(), "Cells exported");
        Ok(written)
    }
}

impl Component for ExportCells {
    fn node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn methods(&self) -> &'static [&'static str] {
        &["export"]
    }

    provides_interfaces!();
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExportCellsParams {
    /// Store the detector settings with each cell
    #[serde(default)]
    pub with_metadata: bool,
}

#[derive(Default)]
pub struct ExportCellsFactory;

impl ExportCellsFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentFactory for ExportCellsFactory {
    fn component_type(&self) -> &'static str {
        "export_cells"
    }

    fn required_features(&self, _params: &ComponentParams) -> BeansResult<Vec<String>> {
        Ok(vec![
            features::LABEL_SOURCE.to_string(),
            features::SPIKE_MARKER_SOURCE.to_string(),
            features::EVENTS_OUTPUT.to_string(),
        ])
    }

    fn create(
        &self,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        let params: ExportCellsParams = parse_params(params)?;
        let export = if params.with_metadata {
            ExportCells::with_metadata(broker)
        } else {
            ExportCells::new(broker)
        };
        Ok(export)
    }

    fn parameter_schema(&self) -> serde_json::Value {
        schema_of::<ExportCellsParams>()
    }
}
