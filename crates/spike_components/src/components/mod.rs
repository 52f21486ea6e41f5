//! Built-in pipeline components

pub mod alias;
pub mod cluster;
pub mod detector;
pub mod export;
pub mod extractor;
pub mod feature_extractor;
pub mod no_mean;
pub mod source;

// Re-export component implementations
pub use alias::*;
pub use cluster::*;
pub use detector::*;
pub use export::*;
pub use extractor::*;
pub use feature_extractor::*;
pub use no_mean::*;
pub use source::*;

use spike_beans::ComponentRegistry;

use crate::io::MemoryFilter;

/// Register all built-in components with the registry. Memory sources read
/// from `filter`.
pub fn register_builtin_components(registry: &mut ComponentRegistry, filter: MemoryFilter) {
    registry.register(MemorySourceFactory::new(filter));
    registry.register(NoMeanSourceFactory::new());
    registry.register(SpikeDetectorFactory::new());
    registry.register(SpikeExtractorFactory::new());
    registry.register(FeatureExtractorFactory::new());
    registry.register(ClusterAnalyzerFactory::new());
    registry.register(ExportCellsFactory::new());
    registry.register(AliasFactory::new());
}
