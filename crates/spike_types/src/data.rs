use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Cluster label. `TRASH_LABEL` marks discarded spikes.
pub type Label = u16;

/// Label of the trash cluster.
pub const TRASH_LABEL: Label = 0;

/// A multi-channel recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Samples indexed as `data[channel][sample]`.
    pub data: Vec<Vec<f64>>,
    /// Sampling frequency in Hz.
    pub sample_rate: f64,
}

impl Signal {
    pub fn new(data: Vec<Vec<f64>>, sample_rate: f64) -> Self {
        Self { data, sample_rate }
    }

    /// Build a signal, rejecting channels of different lengths.
    pub fn try_new(data: Vec<Vec<f64>>, sample_rate: f64) -> Result<Self, DataError> {
        let signal = Self::new(data, sample_rate);
        signal.validate()?;
        Ok(signal)
    }

    /// Every channel must hold as many samples as the first one.
    pub fn validate(&self) -> Result<(), DataError> {
        let expected = self.n_samples();
        match self.data.iter().find(|channel| channel.len() != expected) {
            Some(channel) => Err(DataError::LengthMismatch {
                expected,
                found: channel.len(),
            }),
            None => Ok(()),
        }
    }

    pub fn n_channels(&self) -> usize {
        self.data.len()
    }

    pub fn n_samples(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    /// Samples of a single contact
    pub fn contact(&self, contact: usize) -> Result<&[f64], DataError> {
        self.data
            .get(contact)
            .map(Vec::as_slice)
            .ok_or(DataError::ContactOutOfRange {
                contact,
                channels: self.n_channels(),
            })
    }

    /// Milliseconds to the nearest sample offset.
    pub fn ms_to_samples(&self, ms: f64) -> isize {
        (ms * self.sample_rate / 1000.0).round() as isize
    }

    /// Sample index to milliseconds.
    pub fn samples_to_ms(&self, index: usize) -> f64 {
        index as f64 * 1000.0 / self.sample_rate
    }
}

/// Spike detection edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Upward crossing, aligned to the local maximum
    #[default]
    Max,
    /// Downward crossing, aligned to the local minimum
    Min,
    Rising,
    Falling,
}

impl Edge {
    /// Whether spikes are positive deflections
    pub fn is_positive(self) -> bool {
        matches!(self, Edge::Max | Edge::Rising)
    }
}

/// Detector settings recorded alongside exported cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub contact: usize,
    pub threshold: f64,
    pub edge: Edge,
    /// Spike window in milliseconds relative to the spike time.
    pub sp_win: (f64, f64),
}

/// Spike times of one train, in milliseconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpikeTimes {
    pub times_ms: Vec<f64>,
    /// Threshold used for detection, when produced by a detector.
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub metadata: Option<ExportMetadata>,
}

impl SpikeTimes {
    pub fn new(times_ms: Vec<f64>) -> Self {
        Self {
            times_ms,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.times_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_ms.is_empty()
    }
}

/// Spike waveforms cut from a signal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Waveforms {
    /// Time axis of one waveform, in milliseconds relative to the spike.
    pub time_ms: Vec<f64>,
    /// Samples indexed as `data[spike][channel][sample]`.
    pub data: Vec<Vec<Vec<f64>>>,
    /// `false` for spikes whose window left the recording (zero padded).
    pub valid: Vec<bool>,
}

impl Waveforms {
    pub fn n_spikes(&self) -> usize {
        self.data.len()
    }
}

/// Feature matrix: one row per spike, one column per named feature.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub data: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn n_spikes(&self) -> usize {
        self.data.len()
    }

    pub fn n_features(&self) -> usize {
        self.names.len()
    }

    /// Keep only the named columns, in the given order.
    pub fn select_columns(&self, names: &[String]) -> Result<FeatureMatrix, DataError> {
        let columns = names
            .iter()
            .map(|name| {
                self.names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| DataError::UnknownFeatureName(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FeatureMatrix {
            names: names.to_vec(),
            data: self
                .data
                .iter()
                .map(|row| columns.iter().map(|&c| row[c]).collect())
                .collect(),
        })
    }

    /// Keep only the rows where `mask` is true.
    pub fn select_rows(&self, mask: &[bool]) -> Result<FeatureMatrix, DataError> {
        if mask.len() != self.n_spikes() {
            return Err(DataError::LengthMismatch {
                expected: self.n_spikes(),
                found: mask.len(),
            });
        }
        Ok(FeatureMatrix {
            names: self.names.clone(),
            data: self
                .data
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(row, _)| row.clone())
                .collect(),
        })
    }
}

/// Distinct labels in ascending order.
pub fn unique_labels(labels: &[Label]) -> Vec<Label> {
    let mut unique = labels.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
}

/// Split a spike train into one train per label.
pub fn split_cells(
    spt: &SpikeTimes,
    labels: &[Label],
) -> Result<BTreeMap<Label, SpikeTimes>, DataError> {
    if spt.len() != labels.len() {
        return Err(DataError::LengthMismatch {
            expected: spt.len(),
            found: labels.len(),
        });
    }

    let mut cells: BTreeMap<Label, SpikeTimes> = BTreeMap::new();
    for (&time, &label) in spt.times_ms.iter().zip(labels) {
        cells.entry(label).or_default().times_ms.push(time);
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_conversions() {
        let signal = Signal::new(vec![vec![0.0; 100], vec![1.0; 100]], 10_000.0);
        assert_eq!(signal.n_channels(), 2);
        assert_eq!(signal.n_samples(), 100);
        assert_eq!(signal.ms_to_samples(0.5), 5);
        assert_eq!(signal.ms_to_samples(-0.2), -2);
        assert_eq!(signal.samples_to_ms(5), 0.5);
        assert!(signal.contact(2).is_err());
    }

    #[test]
    fn test_ragged_channels_rejected() {
        let err = Signal::try_new(vec![vec![0.0; 100], vec![0.0; 10]], 1000.0).unwrap_err();
        assert_eq!(err, DataError::LengthMismatch { expected: 100, found: 10 });

        assert!(Signal::try_new(vec![vec![0.0; 10]; 3], 1000.0).is_ok());
        assert!(Signal::new(Vec::new(), 1000.0).validate().is_ok());
    }

    #[test]
    fn test_split_cells() {
        let spt = SpikeTimes::new(vec![1.0, 2.0, 3.0, 4.0]);
        let cells = split_cells(&spt, &[1, 2, 1, 0]).unwrap();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[&1].times_ms, vec![1.0, 3.0]);
        assert_eq!(cells[&0].times_ms, vec![4.0]);

        assert!(split_cells(&spt, &[1, 2]).is_err());
    }

    #[test]
    fn test_select_columns() {
        let features = FeatureMatrix {
            names: vec!["Ch0:P2P".into(), "Ch1:P2P".into()],
            data: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        };
        let selected = features.select_columns(&["Ch1:P2P".to_string()]).unwrap();
        assert_eq!(selected.data, vec![vec![2.0], vec![4.0]]);

        let err = features.select_columns(&["Ch9:P2P".to_string()]).unwrap_err();
        assert_eq!(err, DataError::UnknownFeatureName("Ch9:P2P".into()));
    }

    #[test]
    fn test_select_rows() {
        let features = FeatureMatrix {
            names: vec!["x".into()],
            data: vec![vec![1.0], vec![2.0], vec![3.0]],
        };
        let selected = features.select_rows(&[true, false, true]).unwrap();
        assert_eq!(selected.data, vec![vec![1.0], vec![3.0]]);
        assert!(features.select_rows(&[true]).is_err());
    }

    #[test]
    fn test_edge_serde() {
        let edge: Edge = serde_json::from_str("\"falling\"").unwrap();
        assert_eq!(edge, Edge::Falling);
        assert!(!edge.is_positive());
        assert_eq!(unique_labels(&[3, 1, 3, 0]), vec![0, 1, 3]);
    }
}
