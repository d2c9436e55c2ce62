use serde::{Deserialize, Serialize};

use crate::flags::{self, Flags};

/// One time sample across all channels.
///
/// `data` and `sample_flags` are indexed by the channel's *fixed* index,
/// so their length is the instrument layout size and stays constant even
/// as the active channel subset shrinks.
///
/// A missing sample (a gap in the timestream) is represented as a hole —
/// `None` in the integration's frame list — never as a Frame full of
/// garbage. Every algorithm skips holes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    pub index: usize,
    pub data: Vec<f64>,
    pub sample_flags: Vec<u8>,
    pub flags: Flags,
    /// Time-dependent noise weight, floating around 1.
    pub relative_weight: f64,
    /// Accumulated fractional degrees of freedom consumed by fits.
    pub dependents: f64,
}

impl Frame {
    pub fn new(index: usize, layout_size: usize) -> Self {
        Self {
            index,
            data: vec![0.0; layout_size],
            sample_flags: vec![0; layout_size],
            flags: Flags::default(),
            relative_weight: 1.0,
            dependents: 0.0,
        }
    }

    /// Whether this frame may contribute to model fits.
    pub fn is_modeling(&self) -> bool {
        self.flags.is_unflagged(flags::frame::MODELING) && self.relative_weight > 0.0
    }

    /// Whether the sample for fixed channel `fx` is usable.
    pub fn is_sample_valid(&self, fx: usize) -> bool {
        self.sample_flags[fx] == 0
    }
}
