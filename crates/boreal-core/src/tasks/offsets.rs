//! Per-channel DC offset removal, under a dependents bracket: each
//! channel's offset fit consumes one degree of freedom, spread over the
//! frames in proportion to their relative weight.

use crate::context::ReductionContext;
use crate::error::Result;
use crate::estimator::{self, Estimator, WeightedPoint};
use crate::fork;
use crate::integration::Integration;

const SUBTRACT_BLOCK: usize = 512;

pub fn remove_offsets(
    integration: &mut Integration,
    estimator: Estimator,
    ctx: &ReductionContext,
) -> Result<()> {
    let nt = integration.frames.len();
    if nt == 0 {
        return Ok(());
    }
    let layout = integration.layout_size;
    let mut parms = integration.take_dependents("offsets");

    let Integration {
        ref mut frames,
        ref mut channels,
        ..
    } = *integration;

    parms.clear(frames, channels, 0, nt);

    // Estimate one offset per live channel.
    let estimates: Vec<WeightedPoint> = {
        let frames: &[_] = frames;
        let channels: &[_] = channels;
        match estimator {
            Estimator::MaximumLikelihood => {
                // Parallel over frames: per-worker (Σ w·x, Σ w) vectors,
                // merged by addition.
                let (num, den) = fork::map_indexed(
                    ctx,
                    nt,
                    || (vec![0.0; layout], vec![0.0; layout]),
                    |acc, t| {
                        let Some(frame) = &frames[t] else { return Ok(()) };
                        if !frame.is_modeling() {
                            return Ok(());
                        }
                        let fw = frame.relative_weight;
                        for ch in channels {
                            let fx = ch.fixed_index;
                            if ch.is_valid() && frame.is_sample_valid(fx) {
                                acc.0[fx] += fw * frame.data[fx];
                                acc.1[fx] += fw;
                            }
                        }
                        Ok(())
                    },
                    |mut a, b| {
                        for (x, y) in a.0.iter_mut().zip(b.0) {
                            *x += y;
                        }
                        for (x, y) in a.1.iter_mut().zip(b.1) {
                            *x += y;
                        }
                        a
                    },
                )?;
                channels
                    .iter()
                    .map(|ch| {
                        let fx = ch.fixed_index;
                        estimator::ml_increment(num[fx], den[fx]).unwrap_or_default()
                    })
                    .collect()
            }
            Estimator::Robust => {
                // Parallel over channels instead; each worker scans the
                // whole timestream for its channels' medians.
                let mut slots = vec![WeightedPoint::default(); channels.len()];
                fork::chunks_mut(ctx, &mut slots, 1, |k, slot| {
                    let ch = &channels[k];
                    if !ch.is_valid() {
                        return Ok(());
                    }
                    let fx = ch.fixed_index;
                    let mut points = Vec::with_capacity(nt);
                    let mut total = 0.0;
                    for frame in frames.iter().flatten() {
                        if !frame.is_modeling() || !frame.is_sample_valid(fx) {
                            continue;
                        }
                        points.push(WeightedPoint::new(frame.data[fx], frame.relative_weight));
                        total += frame.relative_weight;
                    }
                    if let Some(mut p) = estimator::robust_increment(&mut points) {
                        p.weight = total;
                        slot[0] = p;
                    }
                    Ok(())
                })?;
                slots
            }
        }
    };

    // Subtract, accounting dependents: dp per sample is fw / Σfw, so each
    // channel's fit costs one unit on the frame side and one on the
    // channel side.
    {
        let channels: &[_] = channels;
        let estimates = &estimates;
        let parms_ref = &parms;
        fork::chunks_mut(ctx, frames, SUBTRACT_BLOCK, |_, chunk| {
            let mut share = vec![0.0; channels.len()];
            for frame in chunk.iter_mut().flatten() {
                let modeling = frame.is_modeling();
                let fw = frame.relative_weight;
                for (k, ch) in channels.iter().enumerate() {
                    let est = estimates[k];
                    if est.weight <= 0.0 {
                        continue;
                    }
                    let fx = ch.fixed_index;
                    frame.data[fx] -= est.value;
                    if modeling && ch.is_valid() && frame.is_sample_valid(fx) {
                        let dp = fw / est.weight;
                        parms_ref.add_async_frame(frame.index, dp);
                        share[k] += dp;
                    }
                }
            }
            for (k, ch) in channels.iter().enumerate() {
                if share[k] > 0.0 {
                    parms_ref.add_async_channel(ch.fixed_index, share[k]);
                }
            }
            Ok(())
        })?;
    }

    parms.apply(frames, channels, 0, nt);
    integration.store_dependents(parms);
    Ok(())
}
