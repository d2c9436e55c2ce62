//! Noise weight derivation from residuals, corrected for the degrees of
//! freedom the fits have consumed.

use tracing::debug;

use crate::context::ReductionContext;
use crate::error::Result;
use crate::estimator::{self, WeightedPoint};
use crate::flags;
use crate::fork;
use crate::integration::Integration;
use crate::options::ReductionConfig;

/// Re-derive every channel's noise weight as `dof / variance`, where
/// `dof = 1 − dependents/points`. Channels with degenerate statistics get
/// the DOF flag; channels whose weight strays too far from the array
/// median get the NOISY flag. Returns how many channels ended up flagged.
pub fn update_channel_weights(
    integration: &mut Integration,
    config: &ReductionConfig,
    ctx: &ReductionContext,
) -> Result<usize> {
    let noise_range = config
        .options
        .get_f64("weighting.noiserange")
        .unwrap_or(30.0)
        .max(1.0);

    let Integration {
        ref frames,
        ref mut channels,
        ..
    } = *integration;

    fork::chunks_mut(ctx, channels, 1, |_, slice| {
        let ch = &mut slice[0];
        if ch.flags.is_flagged(flags::channel::HARDWARE) {
            return Ok(());
        }
        let fx = ch.fixed_index;

        let mut sum = 0.0;
        let mut sum_w = 0.0;
        let mut points = 0usize;
        for frame in frames.iter().flatten() {
            if !frame.is_modeling() || !frame.is_sample_valid(fx) {
                continue;
            }
            let x = frame.data[fx];
            sum += frame.relative_weight * x * x;
            sum_w += frame.relative_weight;
            points += 1;
        }

        if points == 0 || sum_w <= 0.0 {
            ch.flags.flag(flags::channel::DOF);
            ch.weight = 0.0;
            return Ok(());
        }

        ch.variance = sum / sum_w;
        ch.dof = (1.0 - ch.dependents / points as f64).max(0.0);

        if ch.variance > 0.0 && ch.dof > 0.0 {
            ch.weight = ch.dof / ch.variance;
            ch.flags.unflag(flags::channel::DOF);
        } else {
            ch.weight = 0.0;
            ch.flags.flag(flags::channel::DOF);
        }
        Ok(())
    })?;

    // Flag channels whose weight is an outlier against the robust median.
    let mut points: Vec<WeightedPoint> = channels
        .iter()
        .filter(|ch| ch.is_valid() && ch.weight > 0.0)
        .map(|ch| WeightedPoint::new(ch.weight, 1.0))
        .collect();
    let mut flagged = 0;
    if let Some(median) = estimator::robust_increment(&mut points) {
        let lo = median.value / noise_range;
        let hi = median.value * noise_range;
        for ch in channels.iter_mut() {
            if ch.flags.is_flagged(flags::channel::HARDWARE) {
                continue;
            }
            if ch.weight > 0.0 && (ch.weight < lo || ch.weight > hi) {
                ch.flags.flag(flags::channel::NOISY);
            } else {
                ch.flags.unflag(flags::channel::NOISY);
            }
        }
        flagged = channels
            .iter()
            .filter(|ch| ch.flags.is_flagged(flags::channel::NOISY))
            .count();
        if flagged > 0 {
            debug!(flagged, "noisy channels flagged");
        }
    }

    Ok(flagged)
}

const FRAME_BLOCK: usize = 512;

/// Re-derive every frame's relative weight from its cross-channel
/// residual power, normalized so the valid-frame mean is 1. Frames
/// outside the configured range get the WEIGHT flag.
pub fn update_frame_weights(
    integration: &mut Integration,
    config: &ReductionConfig,
    ctx: &ReductionContext,
) -> Result<()> {
    let nt = integration.frames.len();
    if nt == 0 {
        return Ok(());
    }
    let range = config
        .options
        .get_f64("weighting.frames.noiserange")
        .unwrap_or(10.0)
        .max(1.0);

    let Integration {
        ref mut frames,
        ref channels,
        ..
    } = *integration;

    // Raw weight: valid points over weighted residual power.
    fork::chunks_mut(ctx, frames, FRAME_BLOCK, |_, chunk| {
        for frame in chunk.iter_mut().flatten() {
            let mut power = 0.0;
            let mut points = 0usize;
            for ch in channels {
                let fx = ch.fixed_index;
                if !ch.is_valid() || ch.weight <= 0.0 || !frame.is_sample_valid(fx) {
                    continue;
                }
                let x = frame.data[fx];
                power += ch.weight * x * x;
                points += 1;
            }
            frame.relative_weight = if power > 0.0 && points > 0 {
                points as f64 / power
            } else {
                0.0
            };
        }
        Ok(())
    })?;

    // Normalize to unit mean over valid frames.
    let frames_ref: &[_] = frames;
    let (sum, count) = fork::map_indexed(
        ctx,
        nt,
        || (0.0f64, 0usize),
        |acc, t| {
            if let Some(frame) = &frames_ref[t] {
                if frame.relative_weight > 0.0 {
                    acc.0 += frame.relative_weight;
                    acc.1 += 1;
                }
            }
            Ok(())
        },
        |a, b| (a.0 + b.0, a.1 + b.1),
    )?;
    if count == 0 || sum <= 0.0 {
        return Ok(());
    }
    let mean = sum / count as f64;

    fork::chunks_mut(ctx, frames, FRAME_BLOCK, |_, chunk| {
        for frame in chunk.iter_mut().flatten() {
            frame.relative_weight /= mean;
            let rw = frame.relative_weight;
            if rw > 0.0 && (rw * range < 1.0 || rw > range) {
                frame.flags.flag(flags::frame::WEIGHT);
            } else {
                frame.flags.unflag(flags::frame::WEIGHT);
            }
        }
        Ok(())
    })?;

    Ok(())
}
