use std::path::PathBuf;

use anyhow::{Context, Result};
use boreal_core::simulate::SimulationSpec;
use clap::Args;

#[derive(Args)]
pub struct InfoArgs {
    /// Simulation spec (TOML); defaults used when omitted
    pub spec: Option<PathBuf>,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let spec = load_spec(args.spec.as_deref())?;

    let duration = spec.frames as f64 * spec.sampling_interval;
    let samples = spec.scans * spec.integrations * spec.frames * spec.channels;
    let data_mb = (samples * std::mem::size_of::<f64>()) as f64 / (1024.0 * 1024.0);

    println!("Scans:         {}", spec.scans);
    println!("Integrations:  {} per scan", spec.integrations);
    println!("Channels:      {}", spec.channels);
    println!("Frames:        {} per integration", spec.frames);
    println!("Sampling:      {:.3} s/frame", spec.sampling_interval);
    println!("Duration:      {:.1} s per integration", duration);
    if spec.chopper_period > 0 {
        println!(
            "Chopper:       {} frames/cycle, amplitude {:.2}",
            spec.chopper_period, spec.chopper_amplitude
        );
    }
    println!("Data size:     {:.1} MB", data_mb);

    Ok(())
}

pub fn load_spec(path: Option<&std::path::Path>) -> Result<SimulationSpec> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read spec {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("Invalid spec {}", path.display()))
        }
        None => Ok(SimulationSpec::default()),
    }
}
