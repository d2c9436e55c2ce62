use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, warn};

use crate::context::ReductionContext;
use crate::error::{BorealError, Result};
use crate::integration::Integration;
use crate::options::ReductionConfig;
use crate::scan::Scan;
use crate::tasks::{self, TaskOutcome};

use super::InFlightRegistry;

/// What one integration looked like when its pipeline finished with it.
#[derive(Clone, Debug, Serialize)]
pub struct IntegrationSummary {
    pub scan: usize,
    pub scan_id: String,
    pub integration: usize,
    pub valid_channels: usize,
    pub valid_frames: usize,
    pub residual_rms: f64,
    pub generation: usize,
    pub retired: bool,
    pub comments: String,
}

impl IntegrationSummary {
    fn of(scan_id: &str, integration: &Integration) -> Self {
        Self {
            scan: integration.scan_index,
            scan_id: scan_id.to_string(),
            integration: integration.index,
            valid_channels: integration.valid_channel_count(),
            valid_frames: integration.valid_frame_count(),
            residual_rms: integration.residual_rms(),
            generation: integration.generation(),
            retired: integration.retired,
            comments: integration.comments.clone(),
        }
    }
}

/// The astronomical source estimate shared by all pipelines.
///
/// `add` accumulates one integration's residuals into the map, `process`
/// finalizes a scan's contribution, and `sync` subtracts the current
/// model back out of an integration's timestream.
pub trait SourceModel: Sync {
    fn add(&self, integration: &Integration, weight: f64) -> Result<()>;
    fn process(&self, scan: &Scan) -> Result<()>;
    fn sync(&self, integration: &mut Integration) -> Result<()>;
}

/// Reduce every scan through the configured task list.
///
/// Scans are split into contiguous partitions, one pipeline thread each;
/// within a pipeline, scans and integrations run strictly in order. The
/// returned summaries are always in canonical (scan, integration) order
/// regardless of pipeline interleaving. On failure the first error (in
/// pipeline order) is returned, but every integration still completes its
/// token so no summary consumer is left waiting.
pub fn reduce_all(
    scans: &mut [Scan],
    config: &ReductionConfig,
    ctx: &ReductionContext,
    source: Option<&dyn SourceModel>,
) -> Result<Vec<IntegrationSummary>> {
    reduce_all_with(scans, config, ctx, source, |_| {})
}

/// [`reduce_all`] with an observer called for each summary as the
/// coordinator consumes it, in canonical order, while the pipelines are
/// still running. Lets a caller report progress live instead of after
/// the whole reduction has finished.
pub fn reduce_all_with(
    scans: &mut [Scan],
    config: &ReductionConfig,
    ctx: &ReductionContext,
    source: Option<&dyn SourceModel>,
    mut observe: impl FnMut(&IntegrationSummary),
) -> Result<Vec<IntegrationSummary>> {
    if scans.is_empty() {
        return Ok(Vec::new());
    }
    let pipelines = if config.pipelines == 0 {
        ctx.threads().min(scans.len())
    } else {
        config.pipelines.min(scans.len())
    }
    .max(1);
    let chunk = scans.len().div_ceil(pipelines);

    info!(
        scans = scans.len(),
        pipelines,
        rounds = config.rounds,
        tasks = ?config.tasks,
        "starting reduction"
    );

    let registry = InFlightRegistry::new();
    let mut order = Vec::new();
    for scan in scans.iter() {
        for integration in &scan.integrations {
            registry.check_in(scan.index, integration.index);
            order.push((scan.index, integration.index));
        }
    }

    let first_error: Mutex<Vec<(usize, BorealError)>> = Mutex::new(Vec::new());
    let mut summaries = Vec::with_capacity(order.len());

    // The calling thread doubles as the coordinator: it walks the keys in
    // canonical order while the pipelines run, blocking on each token
    // until its pipeline completes it.
    std::thread::scope(|s| {
        for (p, partition) in scans.chunks_mut(chunk).enumerate() {
            let registry = &registry;
            let first_error = &first_error;
            s.spawn(move || {
                if let Err(e) = run_pipeline(partition, config, ctx, source, registry) {
                    first_error.lock().unwrap().push((p, e));
                }
            });
        }

        for &(scan, integration) in &order {
            if let Some(summary) = registry.take(scan, integration) {
                observe(&summary);
                summaries.push(summary);
            }
        }
    });

    let mut failures = first_error.into_inner().unwrap();
    failures.sort_by_key(|(p, _)| *p);
    match failures.into_iter().next() {
        Some((_, e)) => Err(e),
        None => Ok(summaries),
    }
}

/// One pipeline: its share of the scans, in order. Completes a token for
/// every integration in the partition even when a task fails partway.
fn run_pipeline(
    partition: &mut [Scan],
    config: &ReductionConfig,
    ctx: &ReductionContext,
    source: Option<&dyn SourceModel>,
    registry: &InFlightRegistry,
) -> Result<()> {
    let mut outcome = Ok(());

    for scan in partition.iter_mut() {
        if outcome.is_err() || ctx.is_interrupted() {
            // Still release this scan's tokens.
            for integration in &scan.integrations {
                registry.complete(IntegrationSummary::of(&scan.id, integration));
            }
            continue;
        }

        scan.validate(config.min_frames, config.min_channels);

        let result = reduce_scan(scan, config, ctx, source);

        for integration in &scan.integrations {
            registry.complete(IntegrationSummary::of(&scan.id, integration));
        }
        if let Err(e) = result {
            warn!(scan = %scan.id, error = %e, "scan reduction failed");
            outcome = Err(e);
        }
    }

    outcome
}

fn reduce_scan(
    scan: &mut Scan,
    config: &ReductionConfig,
    ctx: &ReductionContext,
    source: Option<&dyn SourceModel>,
) -> Result<()> {
    for round in 0..config.rounds.max(1) {
        for integration in &mut scan.integrations {
            for task in &config.tasks {
                if ctx.is_interrupted() {
                    return Ok(());
                }
                match tasks::run_task(integration, task, config, ctx)? {
                    TaskOutcome::Handled => {}
                    TaskOutcome::NotHandled => {
                        warn!(scan = %scan.id, task = %task, round, "task not handled, skipping");
                    }
                }
            }
        }

        if config.extract_source {
            if let Some(model) = source {
                for integration in &scan.integrations {
                    if !integration.retired {
                        model.add(integration, scan.weight)?;
                    }
                }
                model.process(scan)?;
                for integration in &mut scan.integrations {
                    if !integration.retired {
                        model.sync(integration)?;
                    }
                }
            }
        }
    }
    Ok(())
}
