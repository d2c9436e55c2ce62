//! Absolute-deviation spike rejection.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::context::ReductionContext;
use crate::error::Result;
use crate::flags;
use crate::fork;
use crate::integration::Integration;
use crate::options::ReductionConfig;

const BLOCK: usize = 512;

/// Flag samples whose residual significance `|x|·sqrt(w_ch·fw)` exceeds
/// `level`. Channels where the flagged fraction exceeds
/// `despike.flagfraction` pick up the SPIKY channel flag. Returns the
/// number of newly flagged samples.
pub fn despike_absolute(
    integration: &mut Integration,
    level: f64,
    config: &ReductionConfig,
    ctx: &ReductionContext,
) -> Result<usize> {
    let flag_fraction = config
        .options
        .get_f64("despike.flagfraction")
        .unwrap_or(0.1);

    let Integration {
        ref mut frames,
        ref mut channels,
        ..
    } = *integration;

    let spikes = AtomicUsize::new(0);
    {
        let channels: &[_] = channels;
        let spikes = &spikes;
        fork::chunks_mut(ctx, frames, BLOCK, |_, chunk| {
            for frame in chunk.iter_mut().flatten() {
                if !frame.is_modeling() {
                    continue;
                }
                let fw = frame.relative_weight;
                for ch in channels {
                    let fx = ch.fixed_index;
                    if !ch.is_valid() || !frame.is_sample_valid(fx) {
                        continue;
                    }
                    let s = frame.data[fx].abs() * (ch.weight * fw).sqrt();
                    if s > level {
                        frame.sample_flags[fx] |= flags::sample::SPIKE;
                        spikes.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Ok(())
        })?;
    }
    let spikes = spikes.load(Ordering::Relaxed);

    // Channels dominated by spikes are not worth keeping in the model.
    let nt = frames.iter().flatten().filter(|f| f.is_modeling()).count();
    if nt > 0 {
        let mut spiky = 0;
        for ch in channels.iter_mut() {
            if ch.flags.is_flagged(flags::channel::HARDWARE) {
                continue;
            }
            let fx = ch.fixed_index;
            let flagged = frames
                .iter()
                .flatten()
                .filter(|f| f.sample_flags[fx] & flags::sample::SPIKE != 0)
                .count();
            if flagged as f64 > flag_fraction * nt as f64 {
                ch.flags.flag(flags::channel::SPIKY);
                spiky += 1;
            } else {
                ch.flags.unflag(flags::channel::SPIKY);
            }
        }
        if spiky > 0 {
            debug!(spiky, "spiky channels flagged");
        }
    }

    Ok(spikes)
}
