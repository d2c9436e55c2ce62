use serde::{Deserialize, Serialize};

/// A bit-flag word carried by channels and frames.
///
/// A value of 0 means fully valid. Flag patterns are defined in the
/// [`channel`], [`frame`] and [`sample`] blocks below.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags(u32);

impl Flags {
    pub fn flag(&mut self, pattern: u32) {
        self.0 |= pattern;
    }

    pub fn unflag(&mut self, pattern: u32) {
        self.0 &= !pattern;
    }

    /// Any-bit test against `pattern`.
    pub fn is_flagged(&self, pattern: u32) -> bool {
        self.0 & pattern != 0
    }

    pub fn is_unflagged(&self, pattern: u32) -> bool {
        !self.is_flagged(pattern)
    }

    pub fn is_clear(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Channel flag patterns.
pub mod channel {
    // Hardware block: set by the instrument description, never cleared
    // during reduction.
    pub const DEAD: u32 = 1 << 0;
    pub const BLIND: u32 = 1 << 1;
    pub const HARDWARE: u32 = DEAD | BLIND;

    // Software block: set and cleared as the reduction progresses.
    pub const DISCARDED: u32 = 1 << 2;
    pub const GAIN: u32 = 1 << 3;
    pub const NOISY: u32 = 1 << 4;
    pub const SPIKY: u32 = 1 << 5;
    pub const DOF: u32 = 1 << 6;
    pub const SOFTWARE: u32 = DISCARDED | GAIN | NOISY | SPIKY | DOF;
}

/// Frame flag patterns.
pub mod frame {
    // Structural block.
    pub const CHOP_TRANSIT: u32 = 1 << 0;

    // Quality block.
    pub const WEIGHT: u32 = 1 << 1;
    pub const SPIKY: u32 = 1 << 2;
    pub const JUMP: u32 = 1 << 3;

    /// Frames carrying any of these are excluded from model fits.
    pub const MODELING: u32 = WEIGHT | SPIKY | JUMP;
}

/// Per-sample flag bytes, addressable as `[frame][channel]`.
///
/// Independent of channel-level and frame-level flags; a nonzero byte
/// excludes that one sample from estimation.
pub mod sample {
    pub const SPIKE: u8 = 1 << 0;
    pub const SKIP: u8 = 1 << 1;
    pub const PHASE_INVALID: u8 = 1 << 2;
    pub const JUMP: u8 = 1 << 3;
}
