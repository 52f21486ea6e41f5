//! Basic pipeline example: wire a spike sorting pipeline from configuration,
//! sort a synthetic recording, curate the result and export it.

use std::rc::Rc;

use serde_json::json;
use spike_beans::{assemble, Component, ComponentConfig, ComponentRegistry, FeatureBroker, PipelineConfig};
use spike_components::{
    features, register_builtin_components, ClusterAnalyzer, ExportCells, IoFilter, LabelSource,
    MemoryFilter, SpikeDetector, SpikeMarkerSource,
};
use spike_types::{unique_labels, Signal};
use tracing_subscriber::EnvFilter;

const FS: f64 = 10_000.0;

/// One second of low-level noise with two units firing on two channels.
fn synthetic_recording() -> Signal {
    let n = FS as usize;
    let noise = |i: usize| ((i * 7919) % 101) as f64 / 100.0 - 0.5;
    let mut data = vec![
        (0..n).map(noise).collect::<Vec<_>>(),
        (0..n).map(|i| noise(i + 37)).collect::<Vec<_>>(),
    ];

    // (first spike, period, amplitude on each channel)
    let units = [(500, 1200, [12.0, 4.0]), (900, 1700, [6.0, 9.0])];
    for (start, period, amplitudes) in units {
        for at in (start..n - 10).step_by(period) {
            for (channel, amplitude) in data.iter_mut().zip(amplitudes) {
                for (k, shape) in [0.5, 1.0, 0.6, -0.3, -0.1].iter().enumerate() {
                    channel[at + k] += amplitude * shape;
                }
            }
        }
    }
    Signal::new(data, FS)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Basic Pipeline Example");
    println!("======================");

    // 1. Data lives in an in-memory store shared with the sources
    let filter = MemoryFilter::new().with_signal("session", synthetic_recording());
    let mut registry = ComponentRegistry::new();
    register_builtin_components(&mut registry, filter.clone());

    // 2. Describe the wiring
    let mut config = PipelineConfig::new("basic_sorting", Some("Two synthetic units".to_string()));
    config.add_component(
        ComponentConfig::new(features::SIGNAL_SOURCE, "memory_source")
            .with_param("dataset", json!("session")),
    )?;
    config.add_component(
        ComponentConfig::new(features::EVENTS_OUTPUT, "alias")
            .with_param("target", json!(features::SIGNAL_SOURCE)),
    )?;
    config.add_component(
        ComponentConfig::new(features::SPIKE_MARKER_SOURCE, "spike_detector")
            .with_param("threshold", json!(3.0)),
    )?;
    config.add_component(ComponentConfig::new(features::SPIKE_SOURCE, "spike_extractor"))?;
    config.add_component(
        ComponentConfig::new(features::FEATURE_SOURCE, "feature_extractor")
            .with_param("features", json!(["P2P", "Valley"])),
    )?;
    config.add_component(
        ComponentConfig::new(features::LABEL_SOURCE, "cluster_analyzer").with_param("k", json!(2)),
    )?;
    config.add_component(ComponentConfig::new("Export", "export_cells").with_param("with_metadata", json!(true)))?;
    println!("{}", config.to_json()?);

    // 3. Assemble and pull
    let broker = Rc::new(FeatureBroker::new());
    assemble(&config, &registry, &broker)?;

    let detector = broker.resolve(features::SPIKE_MARKER_SOURCE)?;
    let detector = detector
        .as_any()
        .downcast_ref::<SpikeDetector>()
        .ok_or_else(|| anyhow::anyhow!("SpikeMarkerSource is not a SpikeDetector"))?;
    println!("Detected {} spikes", detector.events()?.len());

    let cluster = broker.resolve(features::LABEL_SOURCE)?;
    let cluster = cluster
        .as_any()
        .downcast_ref::<ClusterAnalyzer>()
        .ok_or_else(|| anyhow::anyhow!("LabelSource is not a ClusterAnalyzer"))?;
    println!("Cells: {:?}", unique_labels(&cluster.labels()?));

    // 4. A stricter threshold propagates through every stage
    detector.set_threshold(Some(5.0));
    detector.update()?;
    println!(
        "After raising the threshold: {} spikes, cells {:?}",
        detector.events()?.len(),
        unique_labels(&cluster.labels()?)
    );

    // 5. Curate and export
    cluster.relabel()?;
    let export = broker.resolve("Export")?;
    let export = export
        .as_any()
        .downcast_ref::<ExportCells>()
        .ok_or_else(|| anyhow::anyhow!("Export is not an ExportCells"))?;
    for cell in export.export(None, true)? {
        let spt = filter.read_events(&format!("session/{}", cell))?;
        println!("{}: {} spikes", cell, spt.len());
    }

    println!("\nExample completed successfully!");
    Ok(())
}
