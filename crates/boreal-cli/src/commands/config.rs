use std::path::PathBuf;

use anyhow::{Context, Result};
use boreal_core::options::ReductionConfig;
use boreal_core::simulate::SimulationSpec;
use clap::Args;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Emit a default simulation spec instead of a reduction config
    #[arg(long)]
    pub simulation: bool,
}

/// Print or save a full default configuration as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let toml_str = if args.simulation {
        toml::to_string_pretty(&SimulationSpec::default())?
    } else {
        toml::to_string_pretty(&ReductionConfig::default())?
    };

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
