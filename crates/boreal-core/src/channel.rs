use serde::{Deserialize, Serialize};

use crate::flags::{self, Flags};

/// One detector of the array.
///
/// `fixed_index` is the channel's immutable identity within the instrument
/// layout; `index` is its mutable position within the current active
/// subset and is rewritten whenever the subset is slimmed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    pub fixed_index: usize,
    pub index: usize,
    /// Responsivity relative to the array average.
    pub gain: f64,
    /// Point-source coupling, an alternative gain storage used by coupled
    /// modes (see [`crate::mode::GainSource`]).
    pub coupling: f64,
    /// Inverse noise power.
    pub weight: f64,
    /// Noise power.
    pub variance: f64,
    /// Effective degrees of freedom remaining, in [0, 1].
    pub dof: f64,
    /// Accumulated fractional degrees of freedom consumed by fits.
    pub dependents: f64,
    /// Fraction of the channel's signal passed by direct (time-domain)
    /// filtering, used when scaling dependents of correlated fits.
    pub direct_filtering: f64,
    /// Nonzero when this channel drives the chop/modulation phase; such a
    /// channel is excluded from phase-binned correlated fits.
    pub source_phase: u8,
    pub flags: Flags,
}

impl Channel {
    pub fn new(fixed_index: usize) -> Self {
        Self {
            fixed_index,
            index: fixed_index,
            gain: 1.0,
            coupling: 1.0,
            weight: 1.0,
            variance: 1.0,
            dof: 1.0,
            dependents: 0.0,
            direct_filtering: 1.0,
            source_phase: 0,
            flags: Flags::default(),
        }
    }

    /// A channel takes part in model fits only while completely unflagged.
    pub fn is_valid(&self) -> bool {
        self.flags.is_clear()
    }
}

/// Remove channels matching `pattern` from the active collection and
/// reassign the survivors' working indices. Fixed indices are untouched.
pub fn discard_flagged(channels: &mut Vec<Channel>, pattern: u32) -> usize {
    let before = channels.len();
    channels.retain(|ch| ch.flags.is_unflagged(pattern));
    reindex(channels);
    before - channels.len()
}

/// Rewrite working indices to match current positions.
pub fn reindex(channels: &mut [Channel]) {
    for (i, ch) in channels.iter_mut().enumerate() {
        ch.index = i;
    }
}

/// An ordered subset of channels, by fixed index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub name: String,
    pub indices: Vec<usize>,
}

/// A named partition of the live channels into groups, from which
/// modalities are built (e.g. one correlated mode per readout group).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelDivision {
    pub name: String,
    pub groups: Vec<ChannelGroup>,
}

impl ChannelDivision {
    /// The trivial division: every live channel in one group.
    pub fn all(name: &str, channels: &[Channel]) -> Self {
        let indices = channels
            .iter()
            .filter(|ch| ch.flags.is_unflagged(flags::channel::HARDWARE))
            .map(|ch| ch.fixed_index)
            .collect();
        Self {
            name: name.to_string(),
            groups: vec![ChannelGroup {
                name: name.to_string(),
                indices,
            }],
        }
    }

    /// Partition channels into `n` equal contiguous blocks of the layout,
    /// the way readout electronics group detectors.
    pub fn blocks(name: &str, channels: &[Channel], n: usize) -> Self {
        let n = n.max(1);
        let mut groups: Vec<ChannelGroup> = (0..n)
            .map(|g| ChannelGroup {
                name: format!("{name}:{g}"),
                indices: Vec::new(),
            })
            .collect();
        let layout = channels.iter().map(|ch| ch.fixed_index).max().map_or(0, |m| m + 1);
        let per_group = layout.div_ceil(n).max(1);
        for ch in channels {
            if ch.flags.is_flagged(flags::channel::HARDWARE) {
                continue;
            }
            groups[(ch.fixed_index / per_group).min(n - 1)]
                .indices
                .push(ch.fixed_index);
        }
        groups.retain(|g| !g.indices.is_empty());
        Self {
            name: name.to_string(),
            groups,
        }
    }
}
