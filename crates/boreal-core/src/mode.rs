use std::fmt;
use std::sync::Arc;

use crate::channel::{Channel, ChannelDivision};
use crate::error::{BorealError, Result};
use crate::flags;
use crate::options::Options;

/// Where a mode's per-channel gains live.
///
/// Resolved once at construction time: either the mode owns its gain
/// vector directly, or it reads and writes a field of the channel through
/// a [`GainProvider`].
#[derive(Clone)]
pub enum GainSource {
    Owned,
    Provider(Arc<dyn GainProvider>),
}

impl fmt::Debug for GainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned => write!(f, "Owned"),
            Self::Provider(_) => write!(f, "Provider"),
        }
    }
}

/// External gain storage for a mode: a concrete channel attribute.
pub trait GainProvider: Send + Sync {
    fn get(&self, channel: &Channel) -> f64;
    fn set(&self, channel: &mut Channel, gain: f64);
}

/// Gains stored in the channel's `gain` field (the sky-response gain).
pub struct FieldGain;

impl GainProvider for FieldGain {
    fn get(&self, channel: &Channel) -> f64 {
        channel.gain
    }

    fn set(&self, channel: &mut Channel, gain: f64) {
        channel.gain = gain;
    }
}

/// Gains stored in the channel's point-source `coupling` field.
pub struct CouplingGain;

impl GainProvider for CouplingGain {
    fn get(&self, channel: &Channel) -> f64 {
        channel.coupling
    }

    fn set(&self, channel: &mut Channel, gain: f64) {
        channel.coupling = gain;
    }
}

/// What kind of common-mode component a mode represents.
#[derive(Clone, Debug, PartialEq)]
pub enum ModeKind {
    /// A bare channel grouping with gains, not itself solved.
    Plain,
    /// A solved correlated component.
    Correlated,
    /// Rides on a parent mode within the same modality: effective gains
    /// are this mode's gains multiplied by the parent's.
    Coupled { parent: String },
    /// The signal is derived from an external driver series instead of
    /// being estimated; gains stay fixed.
    Response { kind: ResponseKind },
}

/// Known external drivers for response modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Chopper,
}

/// An ordered, fixed channel subset plus a per-channel gain vector,
/// representing one common-mode component.
#[derive(Clone, Debug)]
pub struct Mode {
    pub name: String,
    pub kind: ModeKind,
    /// Member channels, by fixed index.
    pub channels: Vec<usize>,
    /// Owned gain storage; authoritative when `source == Owned`.
    gains: Vec<f64>,
    pub source: GainSource,
    /// When set, gain solving leaves this mode alone.
    pub fixed_gains: bool,
    /// Solve gains against phase bins rather than raw frames.
    pub phase_gains: bool,
}

impl Mode {
    pub fn new(name: &str, kind: ModeKind, channels: Vec<usize>) -> Self {
        let n = channels.len();
        Self {
            name: name.to_string(),
            kind,
            channels,
            gains: vec![1.0; n],
            source: GainSource::Owned,
            fixed_gains: false,
            phase_gains: false,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn GainProvider>) -> Self {
        self.source = GainSource::Provider(provider);
        self
    }

    pub fn size(&self) -> usize {
        self.channels.len()
    }

    /// Snapshot of the per-channel gains, NaN coerced to 0.
    ///
    /// `lookup` maps a fixed index to the channel's position in the live
    /// set, `None` for channels discarded from it.
    pub fn gains(&self, channels: &[Channel], lookup: &[Option<usize>]) -> Vec<f64> {
        self.channels
            .iter()
            .enumerate()
            .map(|(k, &fx)| {
                let g = match &self.source {
                    GainSource::Owned => self.gains[k],
                    GainSource::Provider(p) => lookup
                        .get(fx)
                        .and_then(|slot| *slot)
                        .map(|i| p.get(&channels[i]))
                        .unwrap_or(0.0),
                };
                if g.is_nan() {
                    0.0
                } else {
                    g
                }
            })
            .collect()
    }

    /// Install a new gain vector, flagging channels whose normalized gain
    /// falls outside `range` with `flag`. Returns how many were flagged.
    pub fn set_gains(
        &mut self,
        channels: &mut [Channel],
        lookup: &[Option<usize>],
        gains: &[f64],
        range: (f64, f64),
        flag: u32,
    ) -> Result<usize> {
        if gains.len() != self.channels.len() {
            return Err(BorealError::GainLengthMismatch {
                gains: gains.len(),
                channels: self.channels.len(),
            });
        }
        let mut flagged = 0;
        for (k, &fx) in self.channels.iter().enumerate() {
            let g = if gains[k].is_nan() { 0.0 } else { gains[k] };
            match &self.source {
                GainSource::Owned => self.gains[k] = g,
                GainSource::Provider(p) => {
                    if let Some(i) = lookup.get(fx).and_then(|slot| *slot) {
                        p.set(&mut channels[i], g);
                    }
                }
            }
            if let Some(i) = lookup.get(fx).and_then(|slot| *slot) {
                let ch = &mut channels[i];
                if ch.flags.is_unflagged(flags::channel::HARDWARE) {
                    let out_of_range = g.abs() < range.0 || g.abs() > range.1;
                    if out_of_range {
                        if ch.flags.is_unflagged(flag) {
                            flagged += 1;
                        }
                        ch.flags.flag(flag);
                    } else {
                        ch.flags.unflag(flag);
                    }
                }
            }
        }
        Ok(flagged)
    }
}

/// A named group of related modes sharing solve settings.
#[derive(Clone, Debug)]
pub struct Modality {
    pub name: String,
    pub modes: Vec<Mode>,
    /// Signal resolution, in seconds of timestream per block.
    pub resolution_secs: f64,
    /// Drift-removal timescale applied to the solved signals, in seconds.
    /// Zero disables drift removal.
    pub drifts_secs: f64,
    pub solve_gains: bool,
    /// Default estimator choice; tasks may override per invocation.
    pub robust: bool,
    /// Channels whose normalized |gain| falls outside this range get
    /// `gain_flag` set.
    pub gain_range: (f64, f64),
    pub gain_flag: u32,
}

impl Modality {
    /// Build a correlated modality with one mode per division group.
    pub fn correlated(name: &str, division: &ChannelDivision) -> Self {
        let modes = division
            .groups
            .iter()
            .map(|g| {
                Mode::new(
                    &format!("{}:{}", name, g.name),
                    ModeKind::Correlated,
                    g.indices.clone(),
                )
            })
            .collect();
        Self {
            name: name.to_string(),
            modes,
            resolution_secs: 0.0,
            drifts_secs: 0.0,
            solve_gains: true,
            robust: false,
            gain_range: (0.01, 100.0),
            gain_flag: flags::channel::GAIN,
        }
    }

    /// Apply per-modality option overrides, keyed
    /// `correlated.<name>.<setting>`.
    pub fn set_options(&mut self, options: &Options) {
        let key = |s: &str| format!("correlated.{}.{}", self.name, s);
        if let Some(r) = options.get_f64(&key("resolution")) {
            self.resolution_secs = r;
        }
        if let Some(d) = options.get_f64(&key("drifts")) {
            self.drifts_secs = d;
        }
        if let Some(b) = options.get_bool(&key("gains")) {
            self.solve_gains = b;
        }
        if let Some(b) = options.get_bool(&key("robust")) {
            self.robust = b;
        }
        if let Some(lo) = options.get_f64(&key("gainrange.min")) {
            self.gain_range.0 = lo;
        }
        if let Some(hi) = options.get_f64(&key("gainrange.max")) {
            self.gain_range.1 = hi;
        }
    }

    /// Effective gains of mode `idx`, resolving coupled modes against
    /// their parent within this modality.
    pub fn mode_gains(&self, idx: usize, channels: &[Channel], lookup: &[Option<usize>]) -> Vec<f64> {
        let mode = &self.modes[idx];
        let mut gains = mode.gains(channels, lookup);
        if let ModeKind::Coupled { parent } = &mode.kind {
            if let Some(parent) = self.modes.iter().find(|m| &m.name == parent) {
                // Coupled modes share the parent's channel ordering.
                let parent_gains = parent.gains(channels, lookup);
                for (g, pg) in gains.iter_mut().zip(parent_gains.iter()) {
                    *g *= pg;
                }
            }
        }
        gains
    }
}
