//! Baseline jump detection on block-averaged residuals.
//!
//! A jump shows up as a block mean that is significant against the
//! channel's noise weight. Affected samples get the JUMP flag so they
//! drop out of later fits without losing the rest of the channel.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::ReductionContext;
use crate::error::Result;
use crate::flags;
use crate::fork;
use crate::integration::Integration;

/// Returns the number of flagged jump blocks.
pub fn dejump(
    integration: &mut Integration,
    seconds: f64,
    level: f64,
    ctx: &ReductionContext,
) -> Result<usize> {
    let nt = integration.frames.len();
    if nt == 0 {
        return Ok(0);
    }
    let block = integration.frames_per(seconds).max(2).min(nt);

    let Integration {
        ref mut frames,
        ref channels,
        ..
    } = *integration;

    let jumps = AtomicUsize::new(0);
    {
        let jumps = &jumps;
        fork::chunks_mut(ctx, frames, block, |_, chunk| {
            for ch in channels {
                if !ch.is_valid() || ch.weight <= 0.0 {
                    continue;
                }
                let fx = ch.fixed_index;

                let mut sum = 0.0;
                let mut sum_w = 0.0;
                for frame in chunk.iter().flatten() {
                    if !frame.is_modeling() || !frame.is_sample_valid(fx) {
                        continue;
                    }
                    sum += frame.relative_weight * frame.data[fx];
                    sum_w += frame.relative_weight;
                }
                if sum_w <= 0.0 {
                    continue;
                }
                let mean = sum / sum_w;

                // Significance of the block mean against the channel noise.
                let s = mean.abs() * (ch.weight * sum_w).sqrt();
                if s > level {
                    for frame in chunk.iter_mut().flatten() {
                        frame.sample_flags[fx] |= flags::sample::JUMP;
                    }
                    jumps.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(())
        })?;
    }

    Ok(jumps.load(Ordering::Relaxed))
}
