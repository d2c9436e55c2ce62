//! Per-channel baseline (drift) removal in fixed-size frame blocks.
//!
//! Each block of each channel loses its weighted mean, a one-degree
//!-of-freedom fit accounted per block in the "drifts" ledger. The block
//! size is the configured timescale rounded up to a power of two frames;
//! the surviving filter timescale is recorded on the integration so later
//! correlated fits scale their dependents accordingly.

use crate::context::ReductionContext;
use crate::error::Result;
use crate::estimator::{self, Estimator, WeightedPoint};
use crate::fork;
use crate::integration::Integration;

/// Returns the block size used, in frames.
pub fn remove_drifts(
    integration: &mut Integration,
    seconds: f64,
    estimator: Estimator,
    ctx: &ReductionContext,
) -> Result<usize> {
    let nt = integration.frames.len();
    if nt == 0 {
        return Ok(0);
    }
    let drift_n = integration
        .frames_per(seconds)
        .next_power_of_two()
        .min(nt.next_power_of_two());

    let mut parms = integration.take_dependents("drifts");

    let Integration {
        ref mut frames,
        ref mut channels,
        ..
    } = *integration;

    parms.clear(frames, channels, 0, nt);

    {
        let channels: &[_] = channels;
        let parms_ref = &parms;
        fork::chunks_mut(ctx, frames, drift_n, |_, chunk| {
            for ch in channels {
                if !ch.is_valid() {
                    continue;
                }
                let fx = ch.fixed_index;

                let level = match estimator {
                    Estimator::MaximumLikelihood => {
                        let mut num = 0.0;
                        let mut den = 0.0;
                        for frame in chunk.iter().flatten() {
                            if !frame.is_modeling() || !frame.is_sample_valid(fx) {
                                continue;
                            }
                            num += frame.relative_weight * frame.data[fx];
                            den += frame.relative_weight;
                        }
                        estimator::ml_increment(num, den)
                    }
                    Estimator::Robust => {
                        let mut points = Vec::with_capacity(chunk.len());
                        let mut total = 0.0;
                        for frame in chunk.iter().flatten() {
                            if !frame.is_modeling() || !frame.is_sample_valid(fx) {
                                continue;
                            }
                            points.push(WeightedPoint::new(
                                frame.data[fx],
                                frame.relative_weight,
                            ));
                            total += frame.relative_weight;
                        }
                        estimator::robust_increment(&mut points).map(|mut p| {
                            p.weight = total;
                            p
                        })
                    }
                };

                let Some(level) = level else { continue };
                if level.weight <= 0.0 {
                    continue;
                }

                let mut share = 0.0;
                for frame in chunk.iter_mut().flatten() {
                    frame.data[fx] -= level.value;
                    if frame.is_modeling() && frame.is_sample_valid(fx) {
                        let dp = frame.relative_weight / level.weight;
                        parms_ref.add_async_frame(frame.index, dp);
                        share += dp;
                    }
                }
                parms_ref.add_async_channel(fx, share);
            }
            Ok(())
        })?;
    }

    parms.apply(frames, channels, 0, nt);
    integration.store_dependents(parms);

    integration.filter_time_scale = drift_n as f64 * integration.sampling_interval;
    Ok(drift_n)
}
