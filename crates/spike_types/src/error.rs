use serde::{Deserialize, Serialize};

/// Errors raised when data records are combined inconsistently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum DataError {
    /// A contact index beyond the number of recorded channels.
    #[error("Contact {contact} out of range ({channels} channels)")]
    ContactOutOfRange { contact: usize, channels: usize },
    /// Two records that must line up have different lengths.
    #[error("Length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    /// A feature column that does not exist.
    #[error("Feature {0} does not exist")]
    UnknownFeatureName(String),
    /// A row index beyond the number of spikes.
    #[error("Spike index {index} out of range ({len} spikes)")]
    IndexOutOfRange { index: usize, len: usize },
}
