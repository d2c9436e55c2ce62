//! Named reduction tasks and their dispatcher.
//!
//! The pipeline scheduler drives integrations through an ordered list of
//! task names. Names the dispatcher does not recognize are reported back
//! as [`TaskOutcome::NotHandled`] so the scheduler can react (it skips
//! them with a warning).

pub mod dejump;
pub mod despike;
pub mod drifts;
pub mod offsets;
pub mod weighting;

use tracing::debug;

use crate::context::ReductionContext;
use crate::decorrelate;
use crate::error::Result;
use crate::estimator::Estimator;
use crate::integration::Integration;
use crate::options::ReductionConfig;
use crate::phase;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Handled,
    NotHandled,
}

/// Run one named task against one integration. Retired integrations are
/// left untouched.
pub fn run_task(
    integration: &mut Integration,
    name: &str,
    config: &ReductionConfig,
    ctx: &ReductionContext,
) -> Result<TaskOutcome> {
    if integration.retired {
        return Ok(TaskOutcome::Handled);
    }
    debug!(
        scan = integration.scan_index,
        integration = integration.index,
        task = name,
        "running task"
    );

    match name {
        "offsets" => {
            offsets::remove_offsets(integration, config.estimator("offsets"), ctx)?;
            integration.comment("O");
        }
        "drifts" => {
            let seconds = config.options.get_f64("drifts").unwrap_or(30.0);
            let n = drifts::remove_drifts(integration, seconds, config.estimator("drifts"), ctx)?;
            integration.comment(&format!("D({n})"));
        }
        "weighting" => {
            let flagged = weighting::update_channel_weights(integration, config, ctx)?;
            integration.comment(if flagged > 0 { "w" } else { "W" });
        }
        "weighting.frames" => {
            weighting::update_frame_weights(integration, config, ctx)?;
            integration.comment("tW");
        }
        "despike" => {
            let level = config.options.get_f64("despike.level").unwrap_or(10.0);
            let spikes = despike::despike_absolute(integration, level, config, ctx)?;
            integration.comment(&format!("dN({spikes})"));
        }
        "dejump" => {
            let seconds = config.options.get_f64("dejump.resolution").unwrap_or(1.0);
            let level = config.options.get_f64("dejump.level").unwrap_or(8.0);
            let jumps = dejump::dejump(integration, seconds, level, ctx)?;
            integration.comment(&format!("J({jumps})"));
        }
        _ => {
            if let Some(modality) = name.strip_prefix("correlated.") {
                if !integration.modalities.contains_key(modality) {
                    return Ok(TaskOutcome::NotHandled);
                }
                let estimator = correlated_estimator(integration, name, modality, config);
                decorrelate::update_modality(integration, modality, estimator, ctx)?;
                if integration.phases.is_some()
                    && config
                        .options
                        .get_bool(&format!("{name}.phases"))
                        .unwrap_or(false)
                {
                    phase::update_phases(integration, modality, estimator, ctx)?;
                }
                integration.comment(&format!("C[{modality}]"));
            } else {
                return Ok(TaskOutcome::NotHandled);
            }
        }
    }
    Ok(TaskOutcome::Handled)
}

fn correlated_estimator(
    integration: &Integration,
    task: &str,
    modality: &str,
    config: &ReductionConfig,
) -> Estimator {
    let modality_default = integration
        .modalities
        .get(modality)
        .map(|m| m.robust)
        .unwrap_or(false);
    let robust = config
        .options
        .get_bool(&format!("{task}.robust"))
        .unwrap_or(config.robust || modality_default);
    if robust {
        Estimator::Robust
    } else {
        Estimator::MaximumLikelihood
    }
}
