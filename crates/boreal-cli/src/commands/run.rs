use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use boreal_core::context::ReductionContext;
use boreal_core::options::ReductionConfig;
use boreal_core::pipeline;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use crate::summary;

use super::info::load_spec;

#[derive(Args)]
pub struct RunArgs {
    /// Simulation spec (TOML); defaults used when omitted
    pub spec: Option<PathBuf>,

    /// Reduction config (TOML); defaults used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override worker thread count (0 = auto)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Write per-integration summaries as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let spec = load_spec(args.spec.as_deref())?;

    let mut config: ReductionConfig = match args.config {
        Some(ref path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => ReductionConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.threads = threads;
    }

    let ctx = ReductionContext::new(config.threads);
    let mut scans = spec.build();

    summary::print_run_summary(&config, &spec, ctx.threads());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    pb.set_message(format!(
        "Reducing {} scan(s), {} round(s)",
        scans.len(),
        config.rounds
    ));
    pb.enable_steady_tick(Duration::from_millis(100));

    let summaries = pipeline::reduce_all_with(&mut scans, &config, &ctx, None, |s| {
        pb.set_message(format!(
            "Scan {} / integration {}: rms {:.4}",
            s.scan, s.integration, s.residual_rms
        ));
    })?;

    pb.finish_and_clear();
    summary::print_results(&summaries);

    if let Some(ref path) = args.json {
        let json = serde_json::to_string_pretty(&summaries)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\nSummaries written to {}", path.display());
    }

    Ok(())
}
