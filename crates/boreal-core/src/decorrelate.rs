//! Correlated-mode decorrelation over raw frames.
//!
//! One pass per mode: snapshot gains, estimate the incremental
//! common-mode value per resolution block (in parallel, blocks are
//! independent), subtract `gain × Δ` from every member channel's samples,
//! account the consumed degrees of freedom in the mode's dependents
//! ledger, then optionally re-solve the gains, resynchronize the
//! timestream against them, renormalize, and strip the slow drift off
//! the solved signal.
//!
//! The invariant maintained across passes is `data = raw − gain·C` with
//! both factors current: the block pass keeps it for a fixed gain vector,
//! and the gain resync restores it after the gains move. Without the
//! resync, repeated passes would fit against a residual computed with
//! stale gains and walk away from the solution instead of converging.

use tracing::{debug, warn};

use crate::channel::Channel;
use crate::context::ReductionContext;
use crate::dependents::Dependents;
use crate::error::{BorealError, Result};
use crate::estimator::{self, Estimator, WeightedPoint};
use crate::flags;
use crate::fork;
use crate::frame::Frame;
use crate::integration::Integration;
use crate::mode::{Modality, Mode, ModeKind, ResponseKind};
use crate::signal::Signal;

const RESYNC_BLOCK: usize = 512;

/// Run one decorrelation pass for every mode of the named modality.
pub fn update_modality(
    integration: &mut Integration,
    name: &str,
    estimator: Estimator,
    ctx: &ReductionContext,
) -> Result<()> {
    let mut modality = integration
        .modalities
        .remove(name)
        .ok_or_else(|| BorealError::UnknownModality(name.to_string()))?;

    let result = run_modality(integration, &mut modality, estimator, ctx);
    integration.modalities.insert(name.to_string(), modality);
    result
}

fn run_modality(
    integration: &mut Integration,
    modality: &mut Modality,
    estimator: Estimator,
    ctx: &ReductionContext,
) -> Result<()> {
    let resolution = block_resolution(integration, modality.resolution_secs);
    for idx in 0..modality.modes.len() {
        update_mode(integration, modality, idx, resolution, estimator, ctx)?;
    }
    Ok(())
}

fn block_resolution(integration: &Integration, seconds: f64) -> usize {
    if seconds <= 0.0 {
        1
    } else {
        integration.frames_per(seconds)
    }
}

/// Per-channel constants of one decorrelation step, snapshotted from the
/// current gains and weights before any block runs.
struct GainSnapshot {
    /// gain
    g: Vec<f64>,
    /// weight × gain
    wg: Vec<f64>,
    /// weight × gain²
    wg2: Vec<f64>,
    /// dependents scaling per channel: directFiltering × (1 − τ/T).
    filtering: Vec<f64>,
}

fn snapshot(
    mode: &Mode,
    gains: Vec<f64>,
    channels: &[Channel],
    lookup: &[Option<usize>],
    filter_time_scale: f64,
    duration: f64,
) -> GainSnapshot {
    let n = mode.size();
    let mut wg = vec![0.0; n];
    let mut wg2 = vec![0.0; n];
    let mut filtering = vec![0.0; n];

    for (k, &fx) in mode.channels.iter().enumerate() {
        let Some(i) = lookup.get(fx).and_then(|slot| *slot) else {
            continue;
        };
        let ch = &channels[i];
        if !ch.is_valid() {
            continue;
        }
        let g = gains[k];
        wg[k] = ch.weight * g;
        wg2[k] = ch.weight * g * g;
        let passed = if duration > 0.0 && filter_time_scale > 0.0 {
            (1.0 - filter_time_scale / duration).max(0.0)
        } else {
            1.0
        };
        filtering[k] = ch.direct_filtering * passed;
    }

    GainSnapshot {
        g: gains,
        wg,
        wg2,
        filtering,
    }
}

/// One block's exclusive view: the frames it covers and its slot in the
/// signal.
struct BlockJob<'a> {
    frames: &'a mut [Option<Frame>],
    value: &'a mut f64,
    weight: &'a mut f64,
}

fn update_mode(
    integration: &mut Integration,
    modality: &mut Modality,
    idx: usize,
    resolution: usize,
    estimator: Estimator,
    ctx: &ReductionContext,
) -> Result<()> {
    let nt = integration.frames.len();
    if nt == 0 {
        return Ok(());
    }
    let duration = integration.duration();
    let filter_time_scale = integration.filter_time_scale;
    let lookup = integration.channel_lookup();
    let gains = modality.mode_gains(idx, &integration.channels, &lookup);
    let mode_name = modality.modes[idx].name.clone();
    let mode_channels = modality.modes[idx].channels.clone();
    let response = match &modality.modes[idx].kind {
        ModeKind::Response { kind } => Some(*kind),
        _ => None,
    };

    let snap = snapshot(
        &modality.modes[idx],
        gains,
        &integration.channels,
        &lookup,
        filter_time_scale,
        duration,
    );

    let mut parms = integration.take_dependents(&mode_name);

    let n_blocks = nt.div_ceil(resolution);
    {
        let Integration {
            ref mut frames,
            ref mut signals,
            ref mut channels,
            ref chopper,
            ..
        } = *integration;

        let signal = signals
            .entry(mode_name.clone())
            .or_insert_with(|| Signal::new(&mode_name, resolution, n_blocks));
        if signal.resolution != resolution || signal.len() != n_blocks {
            warn!(
                mode = %mode_name,
                old = signal.resolution,
                new = resolution,
                "signal resolution changed, restarting signal"
            );
            *signal = Signal::new(&mode_name, resolution, n_blocks);
        }
        // Work against the full modeled series; drifts are held out again
        // at the end of the pass.
        signal.add_drifts();

        // Bracket the whole per-block pass with this mode's ledger.
        parms.clear(frames, channels, 0, nt);

        let jobs: Vec<BlockJob> = frames
            .chunks_mut(resolution)
            .zip(signal.value.iter_mut())
            .zip(signal.weight.iter_mut())
            .map(|((frames, value), weight)| BlockJob {
                frames,
                value,
                weight,
            })
            .collect();

        let snap = &snap;
        let parms_ref = &parms;
        let mode_channels = &mode_channels;
        let driver = chopper.as_deref();

        fork::distribute(ctx, jobs, |_, job| {
            update_block(job, mode_channels, snap, estimator, response, driver, parms_ref, ctx)
        })?;

        parms.apply(frames, channels, 0, nt);
        signal.generation += 1;
    }
    integration.store_dependents(parms);

    // Gain re-solve, frame-based. Phase-gain modes are solved against
    // phase bins instead (see crate::phase).
    let mode = &modality.modes[idx];
    let solvable = modality.solve_gains
        && !mode.fixed_gains
        && !mode.phase_gains
        && matches!(mode.kind, ModeKind::Correlated | ModeKind::Plain);
    if solvable {
        let solved = {
            let signal = &integration.signals[&mode_name];
            solve_gains(integration, signal, &mode_channels, &snap, estimator, ctx)?
        };

        // Resynchronize the timestream with the solved gains, bracketed
        // by the gain fits' own ledger.
        let mut parms = integration.take_dependents(&format!("{mode_name}:gains"));
        {
            let Integration {
                ref mut frames,
                ref mut channels,
                ref signals,
                ..
            } = *integration;
            let signal = &signals[&mode_name];
            parms.clear(frames, channels, 0, nt);
            resync_gains(ctx, frames, &mode_channels, &snap, &solved, signal, &parms)?;
            parms.apply(frames, channels, 0, nt);
        }
        integration.store_dependents(parms);

        let mut gains: Vec<f64> = solved.iter().map(|p| p.value).collect();
        if let Some(scale) = renormalize(&mut gains, &snap) {
            // The signal absorbs the scale so gain·C is unchanged and the
            // residual stays consistent.
            if let Some(signal) = integration.signals.get_mut(&mode_name) {
                signal.scale(scale);
            }
            debug!(mode = %mode_name, scale, "renormalized gains");
        }
        let flagged = modality.modes[idx].set_gains(
            &mut integration.channels,
            &lookup,
            &gains,
            modality.gain_range,
            modality.gain_flag,
        )?;
        if flagged > 0 {
            debug!(mode = %mode_name, flagged, "flagged out-of-range gains");
        }
    }

    if modality.drifts_secs > 0.0 {
        let drift_blocks = integration.frames_per(modality.drifts_secs).div_ceil(resolution);
        if let Some(signal) = integration.signals.get_mut(&mode_name) {
            if drift_blocks < signal.len() {
                signal.remove_drifts(drift_blocks);
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn update_block(
    job: BlockJob,
    mode_channels: &[usize],
    snap: &GainSnapshot,
    estimator: Estimator,
    response: Option<ResponseKind>,
    driver: Option<&[f64]>,
    parms: &crate::dependents::Dependents,
    ctx: &ReductionContext,
) -> Result<()> {
    // Σ w·g² over valid samples, the normalization of both Δ's formal
    // weight and of the dependents shares.
    let mut sum_wg2 = 0.0;

    let increment = if let Some(kind) = response {
        response_increment(&job, kind, driver, mode_channels, snap, &mut sum_wg2)
    } else {
        match estimator {
            Estimator::MaximumLikelihood => ml_block(&job, mode_channels, snap, &mut sum_wg2),
            Estimator::Robust => robust_block(&job, mode_channels, snap, &mut sum_wg2),
        }
    };

    // Zero accumulated weight: the block contributes no update at all.
    let Some(increment) = increment else {
        return Ok(());
    };
    let delta = increment.value;

    let mut channel_share = ctx.recycler().acquire(mode_channels.len());
    channel_share.iter_mut().for_each(|v| *v = 0.0);

    for frame in job.frames.iter_mut().flatten() {
        let modeling = frame.is_modeling();
        let fw = frame.relative_weight;
        for (k, &fx) in mode_channels.iter().enumerate() {
            if snap.g[k] == 0.0 {
                continue;
            }
            if !frame.is_sample_valid(fx) {
                continue;
            }
            frame.data[fx] -= snap.g[k] * delta;

            if modeling && snap.wg2[k] > 0.0 && sum_wg2 > 0.0 {
                let dp = fw * snap.filtering[k] * snap.wg2[k] / sum_wg2;
                parms.add_async_frame(frame.index, dp);
                channel_share[k] += dp;
            }
        }
    }

    for (k, &fx) in mode_channels.iter().enumerate() {
        if channel_share[k] > 0.0 {
            parms.add_async_channel(fx, channel_share[k]);
        }
    }
    ctx.recycler().release(channel_share);

    *job.value += delta;
    *job.weight = increment.weight;
    Ok(())
}

fn ml_block(
    job: &BlockJob,
    mode_channels: &[usize],
    snap: &GainSnapshot,
    sum_wg2: &mut f64,
) -> Option<WeightedPoint> {
    let mut num = 0.0;
    let mut den = 0.0;
    for frame in job.frames.iter().flatten() {
        if !frame.is_modeling() {
            continue;
        }
        let fw = frame.relative_weight;
        for (k, &fx) in mode_channels.iter().enumerate() {
            if snap.wg2[k] <= 0.0 || !frame.is_sample_valid(fx) {
                continue;
            }
            num += fw * snap.wg[k] * frame.data[fx];
            den += fw * snap.wg2[k];
        }
    }
    *sum_wg2 = den;
    estimator::ml_increment(num, den)
}

fn robust_block(
    job: &BlockJob,
    mode_channels: &[usize],
    snap: &GainSnapshot,
    sum_wg2: &mut f64,
) -> Option<WeightedPoint> {
    let mut points: Vec<WeightedPoint> = Vec::with_capacity(job.frames.len() * mode_channels.len());
    let mut den = 0.0;
    for frame in job.frames.iter().flatten() {
        if !frame.is_modeling() {
            continue;
        }
        let fw = frame.relative_weight;
        for (k, &fx) in mode_channels.iter().enumerate() {
            // Zero gain is skipped outright, never pushed with zero
            // weight, so the median bookkeeping stays clean.
            if snap.g[k] == 0.0 || snap.wg2[k] <= 0.0 || !frame.is_sample_valid(fx) {
                continue;
            }
            points.push(WeightedPoint::new(
                frame.data[fx] / snap.g[k],
                fw * snap.wg2[k],
            ));
            den += fw * snap.wg2[k];
        }
    }
    *sum_wg2 = den;
    estimator::robust_increment(&mut points)
}

/// Response modes track an external driver series rather than solving:
/// the block's target value is the weighted mean of the driver, and Δ is
/// whatever closes the gap to the current signal value.
fn response_increment(
    job: &BlockJob,
    _kind: ResponseKind,
    driver: Option<&[f64]>,
    mode_channels: &[usize],
    snap: &GainSnapshot,
    sum_wg2: &mut f64,
) -> Option<WeightedPoint> {
    let driver = driver?;
    let mut num = 0.0;
    let mut den = 0.0;
    let mut wg2 = 0.0;
    for frame in job.frames.iter().flatten() {
        if !frame.is_modeling() {
            continue;
        }
        let fw = frame.relative_weight;
        num += fw * driver[frame.index];
        den += fw;
        for (k, &fx) in mode_channels.iter().enumerate() {
            if snap.wg2[k] > 0.0 && frame.is_sample_valid(fx) {
                wg2 += fw * snap.wg2[k];
            }
        }
    }
    *sum_wg2 = wg2;
    if den <= 0.0 {
        return None;
    }
    let target = num / den;
    Some(WeightedPoint::new(target - *job.value, wg2))
}

/// Derive per-channel gain increments against the solved signal:
/// `Δg = Σ(fw·C·x) / Σ(fw·C²)` per channel, ML or robust.
///
/// Each returned point carries the solved gain and the fit's accumulated
/// weight; channels that sat out the fit (flagged, or zero current gain)
/// keep their old gain with weight 0 so the resync leaves them alone.
fn solve_gains(
    integration: &Integration,
    signal: &Signal,
    mode_channels: &[usize],
    snap: &GainSnapshot,
    estimator: Estimator,
    ctx: &ReductionContext,
) -> Result<Vec<WeightedPoint>> {
    let mut gains: Vec<WeightedPoint> = snap
        .g
        .iter()
        .map(|&g| WeightedPoint::new(g, 0.0))
        .collect();
    let frames = &integration.frames;

    fork::chunks_mut(ctx, &mut gains, 1, |k, slot| {
        if snap.wg2[k] <= 0.0 {
            return Ok(());
        }
        let fx = mode_channels[k];
        let old = slot[0].value;

        let increment = match estimator {
            Estimator::MaximumLikelihood => {
                let mut num = 0.0;
                let mut den = 0.0;
                for frame in frames.iter().flatten() {
                    if !frame.is_modeling() || !frame.is_sample_valid(fx) {
                        continue;
                    }
                    let c = signal.value_at(frame.index);
                    let fw = frame.relative_weight;
                    num += fw * c * frame.data[fx];
                    den += fw * c * c;
                }
                estimator::ml_increment(num, den)
            }
            Estimator::Robust => {
                let mut points = Vec::new();
                for frame in frames.iter().flatten() {
                    if !frame.is_modeling() || !frame.is_sample_valid(fx) {
                        continue;
                    }
                    let c = signal.value_at(frame.index);
                    if c == 0.0 {
                        continue;
                    }
                    let fw = frame.relative_weight;
                    points.push(WeightedPoint::new(frame.data[fx] / c, fw * c * c));
                }
                estimator::robust_increment(&mut points)
            }
        };

        if let Some(increment) = increment {
            slot[0] = WeightedPoint::new(old + increment.value, increment.weight);
        }
        Ok(())
    })?;

    Ok(gains)
}

/// Subtract `(g_solved − g_old)·C(t)` from every member channel's valid
/// samples so the residual reflects the gains about to be installed, and
/// account each gain fit's consumed degree of freedom, spread over the
/// frames as `fw·C²` shares.
fn resync_gains(
    ctx: &ReductionContext,
    frames: &mut [Option<Frame>],
    mode_channels: &[usize],
    snap: &GainSnapshot,
    solved: &[WeightedPoint],
    signal: &Signal,
    parms: &Dependents,
) -> Result<()> {
    fork::chunks_mut(ctx, frames, RESYNC_BLOCK, |_, chunk| {
        let mut share = vec![0.0; mode_channels.len()];
        for frame in chunk.iter_mut().flatten() {
            let c = signal.value_at(frame.index);
            let modeling = frame.is_modeling();
            let fw = frame.relative_weight;
            for (k, &fx) in mode_channels.iter().enumerate() {
                let fit = solved[k];
                if fit.weight <= 0.0 || !frame.is_sample_valid(fx) {
                    continue;
                }
                frame.data[fx] -= (fit.value - snap.g[k]) * c;
                if modeling {
                    let dp = snap.filtering[k] * fw * c * c / fit.weight;
                    parms.add_async_frame(frame.index, dp);
                    share[k] += dp;
                }
            }
        }
        for (k, &fx) in mode_channels.iter().enumerate() {
            if share[k] > 0.0 {
                parms.add_async_channel(fx, share[k]);
            }
        }
        Ok(())
    })
}

/// Rescale the gain vector so the mode floats around unit gain: divide by
/// the robust mean of `log1p(|g|)` mapped back through `expm1`. Returns
/// the applied scale, or `None` when the gains are too degenerate to
/// renormalize.
fn renormalize(gains: &mut [f64], snap: &GainSnapshot) -> Option<f64> {
    let mut points: Vec<WeightedPoint> = gains
        .iter()
        .enumerate()
        .filter(|(k, _)| snap.wg2[*k] > 0.0)
        .map(|(k, g)| WeightedPoint::new(g.abs().ln_1p(), snap.wg2[k]))
        .collect();
    let mean = estimator::robust_increment(&mut points)?;
    let scale = mean.value.exp_m1();
    if !(scale > 0.0) || !scale.is_finite() {
        return None;
    }
    for g in gains.iter_mut() {
        *g /= scale;
    }
    Some(scale)
}
