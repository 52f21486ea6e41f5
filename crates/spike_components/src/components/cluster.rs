//! Clustering of the feature matrix into cells, with manual curation.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use schemars::JsonSchema;
use serde::Deserialize;
use spike_beans::{
    parse_params, schema_of, BeansError, BeansResult, Component, ComponentFactory,
    ComponentParams, Dependency, FeatureBroker, Node, Predicate,
};
use spike_types::{unique_labels, DataError, FeatureMatrix, Label, TRASH_LABEL};
use tracing::{debug, info};

use crate::capability::{features, FeatureSource, LabelSource};

/// Highest label handed out when a cell is split.
const MAX_LABEL: Label = 99;

/// A clustering algorithm.
pub trait ClusterMethod {
    fn name(&self) -> &str;

    /// Zero-based cluster index of every row of `features`.
    fn cluster(&self, features: &FeatureMatrix) -> BeansResult<Vec<usize>>;
}

/// Deterministic k-means: farthest-point seeding, then Lloyd iterations.
///
/// Clusters are numbered in order of first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    pub k: usize,
    pub iterations: usize,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self { k, iterations: 100 }
    }
}

fn distance2(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(row: &[f64], centers: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, center) in centers.iter().enumerate() {
        let d = distance2(row, center);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

impl ClusterMethod for KMeans {
    fn name(&self) -> &str {
        "k-means"
    }

    fn cluster(&self, features: &FeatureMatrix) -> BeansResult<Vec<usize>> {
        if self.k == 0 {
            return Err(BeansError::invalid("k-means needs at least one cluster"));
        }
        let rows = &features.data;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let k = self.k.min(rows.len());
        let mut centers = vec![rows[0].clone()];
        while centers.len() < k {
            let farthest = rows
                .iter()
                .map(|row| {
                    centers
                        .iter()
                        .map(|c| distance2(row, c))
                        .fold(f64::INFINITY, f64::min)
                })
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, d)| if d > best.1 { (i, d) } else { best })
                .0;
            centers.push(rows[farthest].clone());
        }

        let mut assignment: Vec<usize> = rows.iter().map(|row| nearest(row, &centers)).collect();
        for _ in 0..self.iterations {
            for (c, center) in centers.iter_mut().enumerate() {
                let members: Vec<&Vec<f64>> = rows
                    .iter()
                    .zip(&assignment)
                    .filter(|(_, a)| **a == c)
                    .map(|(row, _)| row)
                    .collect();
                if members.is_empty() {
                    continue;
                }
                for (j, value) in center.iter_mut().enumerate() {
                    *value = members.iter().map(|row| row[j]).sum::<f64>() / members.len() as f64;
                }
            }

            let next: Vec<usize> = rows.iter().map(|row| nearest(row, &centers)).collect();
            if next == assignment {
                break;
            }
            assignment = next;
        }

        let mut order: BTreeMap<usize, usize> = BTreeMap::new();
        Ok(assignment
            .into_iter()
            .map(|a| {
                let next = order.len();
                *order.entry(a).or_insert(next)
            })
            .collect())
    }
}

fn data_error(component: &str) -> impl Fn(DataError) -> BeansError + '_ {
    move |e| BeansError::recomputation(component, e)
}

/// Assigns a cell label to every spike of the `FeatureSource` feature.
///
/// Labels start at 1; [`TRASH_LABEL`] collects discarded spikes. Every curation
/// operation edits the labels in place and notifies dependents.
pub struct ClusterAnalyzer {
    this: Weak<Self>,
    broker: Weak<FeatureBroker>,
    node: Node,
    feature_src: Dependency<dyn FeatureSource>,
    method: RefCell<Box<dyn ClusterMethod>>,
    use_features: RefCell<Option<Vec<String>>>,
    labels: RefCell<Option<Rc<Vec<Label>>>>,
}

impl ClusterAnalyzer {
    pub fn new(broker: &Rc<FeatureBroker>, method: Box<dyn ClusterMethod>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            broker: Rc::downgrade(broker),
            node: Node::new(),
            feature_src: Dependency::new(
                features::FEATURE_SOURCE,
                Predicate::has_attributes(&["features"]),
            ),
            method: RefCell::new(method),
            use_features: RefCell::new(None),
            labels: RefCell::new(None),
        })
    }

    pub fn trash_label(&self) -> Label {
        TRASH_LABEL
    }

    pub fn set_method(&self, method: Box<dyn ClusterMethod>) {
        *self.method.borrow_mut() = method;
    }

    /// Restrict clustering to the named feature columns (`None` for all).
    /// Takes effect at the next [`Component::update`].
    pub fn set_use_features(&self, names: Option<Vec<String>>) {
        *self.use_features.borrow_mut() = names;
    }

    pub fn use_features(&self) -> Option<Vec<String>> {
        self.use_features.borrow().clone()
    }

    fn selected_features(&self) -> BeansResult<Rc<FeatureMatrix>> {
        let features = self
            .feature_src
            .get_from(&self.broker, self.this.clone())?
            .features()?;
        match self.use_features.borrow().as_deref() {
            None => Ok(features),
            Some(names) => features
                .select_columns(names)
                .map(Rc::new)
                .map_err(data_error(self.type_name())),
        }
    }

    fn cluster_all(&self) -> BeansResult<Vec<Label>> {
        let features = self.selected_features()?;
        let method = self.method.borrow();
        let clusters = method.cluster(&features)?;
        debug!(
            method = method.name(),
            spikes = clusters.len(),
            "Spikes clustered"
        );
        clusters.into_iter().map(|c| label_for(c + 1)).collect()
    }

    fn edit_labels<F>(&self, edit: F) -> BeansResult<()>
    where
        F: FnOnce(&mut Vec<Label>) -> BeansResult<()>,
    {
        let mut labels = self.labels()?;
        edit(Rc::make_mut(&mut labels))?;
        *self.labels.borrow_mut() = Some(labels);
        self.notify_observers()
    }

    /// Renumber the cells `1..=n` in ascending order of their current label.
    pub fn relabel(&self) -> BeansResult<()> {
        self.edit_labels(|labels| {
            let cells: Vec<Label> = unique_labels(labels)
                .into_iter()
                .filter(|&l| l != TRASH_LABEL)
                .collect();
            for label in labels.iter_mut().filter(|l| **l != TRASH_LABEL) {
                if let Some(i) = cells.iter().position(|c| *c == *label) {
                    *label = label_for(i + 1)?;
                }
            }
            Ok(())
        })
    }

    /// Split one cell by clustering its spikes again.
    ///
    /// New cells take the smallest labels not in use. `method` overrides the
    /// analyzer's own method for this call.
    pub fn recluster(&self, label: Label, method: Option<&dyn ClusterMethod>) -> BeansResult<()> {
        let features = self.selected_features()?;
        let own_method = self.method.borrow();
        let method = method.unwrap_or(&**own_method);

        self.edit_labels(|labels| {
            let mask: Vec<bool> = labels.iter().map(|&l| l == label).collect();
            if !mask.contains(&true) {
                return Ok(());
            }
            let subset = features
                .select_rows(&mask)
                .map_err(data_error(self.type_name()))?;
            let clusters = method.cluster(&subset)?;

            let used: BTreeSet<Label> = labels.iter().copied().collect();
            let mut free = (1..=MAX_LABEL).filter(|l| !used.contains(l));
            let mut assigned = BTreeMap::new();
            for cluster in clusters.iter().copied().collect::<BTreeSet<_>>() {
                let new_label = free
                    .next()
                    .ok_or_else(|| BeansError::invalid("No free cell labels left"))?;
                assigned.insert(cluster, new_label);
            }

            let mut clusters = clusters.iter();
            for (label, selected) in labels.iter_mut().zip(&mask) {
                if *selected {
                    if let Some(cluster) = clusters.next() {
                        *label = assigned[cluster];
                    }
                }
            }
            debug!(label, cells = assigned.len(), "Cell reclustered");
            Ok(())
        })
    }

    /// Move the given cells to the trash.
    pub fn delete_cells(&self, cells: &[Label]) -> BeansResult<()> {
        self.edit_labels(|labels| {
            for label in labels.iter_mut().filter(|l| cells.contains(&**l)) {
                *label = TRASH_LABEL;
            }
            Ok(())
        })
    }

    /// Move every spike to the trash.
    pub fn delete_all_cells(&self) -> BeansResult<()> {
        self.edit_labels(|labels| {
            labels.fill(TRASH_LABEL);
            Ok(())
        })
    }

    /// Move individual spikes to the trash.
    pub fn delete_spikes(&self, indices: &[usize]) -> BeansResult<()> {
        self.edit_labels(|labels| {
            let len = labels.len();
            if let Some(&index) = indices.iter().find(|&&i| i >= len) {
                return Err(data_error(self.type_name())(DataError::IndexOutOfRange {
                    index,
                    len,
                }));
            }
            for &i in indices {
                labels[i] = TRASH_LABEL;
            }
            Ok(())
        })
    }

    /// Merge cells into the first one given.
    pub fn merge_cells(&self, cells: &[Label]) -> BeansResult<()> {
        let Some(&target) = cells.first() else {
            return Ok(());
        };
        self.edit_labels(|labels| {
            for label in labels.iter_mut().filter(|l| cells.contains(&**l)) {
                *label = target;
            }
            Ok(())
        })
    }
}

fn label_for(index: usize) -> BeansResult<Label> {
    Label::try_from(index).map_err(|_| BeansError::invalid(format!("Too many clusters: {}", index)))
}

impl LabelSource for ClusterAnalyzer {
    fn labels(&self) -> BeansResult<Rc<Vec<Label>>> {
        if let Some(labels) = self.labels.borrow().as_ref() {
            return Ok(Rc::clone(labels));
        }

        let labels = Rc::new(self.cluster_all()?);
        *self.labels.borrow_mut() = Some(Rc::clone(&labels));
        Ok(labels)
    }
}

impl Component for ClusterAnalyzer {
    fn node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn recompute(&self) -> BeansResult<()> {
        self.labels.borrow_mut().take();
        Ok(())
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["labels", "use_features", "trash_label"]
    }

    fn methods(&self) -> &'static [&'static str] {
        &["relabel", "recluster", "delete_cells", "delete_spikes", "merge_cells"]
    }

    provides_interfaces!(dyn LabelSource);
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClusterAnalyzerParams {
    /// Number of k-means clusters
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Feature columns to cluster on; all when omitted
    #[serde(default)]
    pub use_features: Option<Vec<String>>,
}

fn default_k() -> usize {
    2
}

fn default_iterations() -> usize {
    100
}

#[derive(Default)]
pub struct ClusterAnalyzerFactory;

impl ClusterAnalyzerFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ComponentFactory for ClusterAnalyzerFactory {
    fn component_type(&self) -> &'static str {
        "cluster_analyzer"
    }

    fn required_features(&self, _params: &ComponentParams) -> BeansResult<Vec<String>> {
        Ok(vec![features::FEATURE_SOURCE.to_string()])
    }

    fn create(
        &self,
        broker: &Rc<FeatureBroker>,
        params: &ComponentParams,
    ) -> BeansResult<Rc<dyn Component>> {
        let params: ClusterAnalyzerParams = parse_params(params)?;
        info!(k = params.k, "Creating cluster analyzer");
        let analyzer = ClusterAnalyzer::new(
            broker,
            Box::new(KMeans {
                k: params.k,
                iterations: params.iterations,
            }),
        );
        analyzer.set_use_features(params.use_features);
        Ok(analyzer)
    }

    fn parameter_schema(&self) -> serde_json::Value {
        schema_of::<ClusterAnalyzerParams>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn matrix(rows: &[[f64; 2]]) -> FeatureMatrix {
        FeatureMatrix {
            names: vec!["x".into(), "y".into()],
            data: rows.iter().map(|r| r.to_vec()).collect(),
        }
    }

    #[test]
    fn test_kmeans_separates_groups() {
        let features = matrix(&[[0.0, 0.0], [10.0, 10.0], [0.1, 0.0], [9.9, 10.0], [0.0, 0.2]]);
        let clusters = KMeans::new(2).cluster(&features).unwrap();
        assert_eq!(clusters, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_kmeans_edge_cases() {
        assert!(KMeans::new(3).cluster(&matrix(&[])).unwrap().is_empty());
        assert_eq!(KMeans::new(5).cluster(&matrix(&[[1.0, 1.0], [2.0, 2.0]])).unwrap(), vec![0, 1]);
        assert!(KMeans::new(0).cluster(&matrix(&[[1.0, 1.0]])).is_err());
    }

    #[test]
    fn test_label_for() {
        assert_eq!(label_for(3).unwrap(), 3);
        assert!(label_for(usize::MAX).is_err());
    }

    proptest! {
        #[test]
        fn prop_kmeans_numbers_clusters_by_first_appearance(
            rows in proptest::collection::vec((-50.0f64..50.0, -50.0f64..50.0), 0..40),
            k in 1usize..6,
        ) {
            let features = FeatureMatrix {
                names: vec!["x".into(), "y".into()],
                data: rows.iter().map(|&(x, y)| vec![x, y]).collect(),
            };
            let clusters = KMeans::new(k).cluster(&features).unwrap();
            prop_assert_eq!(clusters.len(), rows.len());

            let mut next = 0;
            for c in clusters {
                prop_assert!(c < k);
                prop_assert!(c <= next);
                if c == next {
                    next += 1;
                }
            }
        }
    }
}
