//! Feature broker and lazy-recomputation graph for spike sorting pipelines
//!
//! This crate wires pipeline components (signal sources, detectors, feature
//! extractors, cluster analyzers, exporters) together without any of them
//! naming each other's concrete types. Components declare what they need by
//! feature name, the broker hands out whatever was provided under that name,
//! and the observer graph pushes invalidation downstream when something upstream
//! changes.

#[macro_use]
pub mod macros;
pub mod broker;
pub mod component;
pub mod config;
pub mod dependency;
pub mod error;
pub mod predicate;
pub mod registry;


// Re-export commonly used types
pub use broker::*;
pub use component::*;
pub use config::*;
pub use dependency::*;
pub use error::*;
pub use predicate::*;
pub use registry::*;
