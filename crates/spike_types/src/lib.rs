//! Shared data types for the spike sorting pipeline
//!
//! This crate contains the records exchanged between pipeline components:
//! recorded signals, spike times, spike waveforms, feature matrices and
//! cluster labels.

pub mod data;
pub mod error;

// Re-export commonly used types
pub use data::*;
pub use error::*;
