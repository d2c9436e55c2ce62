use std::collections::HashMap;

use crate::channel::{self, Channel};
use crate::dependents::Dependents;
use crate::flags;
use crate::frame::Frame;
use crate::mode::Modality;
use crate::phase::PhaseSet;
use crate::signal::Signal;

/// One contiguous stretch of timestream from one scan: the frames, the
/// per-integration clone of the channel list, and all reduction state
/// that evolves with them (signals, dependents ledgers, modalities).
///
/// Frames are held as `Option<Frame>` so a data gap is a hole, skipped
/// by every algorithm rather than dereferenced.
pub struct Integration {
    pub scan_index: usize,
    pub index: usize,
    pub frames: Vec<Option<Frame>>,
    /// The live channel subset; shrinks as channels are discarded.
    pub channels: Vec<Channel>,
    /// Instrument layout size: length of every frame's data array.
    pub layout_size: usize,
    /// Seconds per frame.
    pub sampling_interval: f64,
    /// Timescale of the slowest surviving drift, in seconds. Set by drift
    /// removal; scales the dependents of later correlated fits.
    pub filter_time_scale: f64,
    /// Overall calibration gain of this integration.
    pub gain: f64,
    /// Human-readable trail of what was done, task by task.
    pub comments: String,
    /// Integrations that fail a validity check are retired from the run
    /// but keep their place so summary ordering is unaffected.
    pub retired: bool,
    pub signals: HashMap<String, Signal>,
    pub modalities: HashMap<String, Modality>,
    dependents: HashMap<String, Dependents>,
    /// Phase-binned view of the timestream, for chopped observations.
    pub phases: Option<PhaseSet>,
    /// Chopper position per frame, driving response modes.
    pub chopper: Option<Vec<f64>>,
}

impl Integration {
    pub fn new(scan_index: usize, index: usize, layout_size: usize, n_frames: usize) -> Self {
        let channels = (0..layout_size).map(Channel::new).collect();
        let frames = (0..n_frames)
            .map(|t| Some(Frame::new(t, layout_size)))
            .collect();
        Self {
            scan_index,
            index,
            frames,
            channels,
            layout_size,
            sampling_interval: 0.1,
            filter_time_scale: 0.0,
            gain: 1.0,
            comments: String::new(),
            retired: false,
            signals: HashMap::new(),
            modalities: HashMap::new(),
            dependents: HashMap::new(),
            phases: None,
            chopper: None,
        }
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Total wall-clock span of the integration, in seconds.
    pub fn duration(&self) -> f64 {
        self.frames.len() as f64 * self.sampling_interval
    }

    /// Convert a timescale in seconds to a frame count, clamped to
    /// `[1, n_frames]`. Non-positive timescales mean "the whole
    /// integration".
    pub fn frames_per(&self, seconds: f64) -> usize {
        if seconds <= 0.0 {
            return self.frames.len().max(1);
        }
        let n = (seconds / self.sampling_interval).round() as usize;
        n.clamp(1, self.frames.len().max(1))
    }

    pub fn valid_frame_count(&self) -> usize {
        self.frames
            .iter()
            .flatten()
            .filter(|f| f.flags.is_clear())
            .count()
    }

    pub fn valid_channel_count(&self) -> usize {
        self.channels.iter().filter(|ch| ch.is_valid()).count()
    }

    /// Fixed index → position in the live channel list.
    pub fn channel_lookup(&self) -> Vec<Option<usize>> {
        let mut lookup = vec![None; self.layout_size];
        for (i, ch) in self.channels.iter().enumerate() {
            lookup[ch.fixed_index] = Some(i);
        }
        lookup
    }

    /// Discard channels flagged with `pattern` from the live set,
    /// reindexing the survivors.
    pub fn slim(&mut self, pattern: u32) -> usize {
        channel::discard_flagged(&mut self.channels, pattern)
    }

    /// Take the named dependents ledger out for a clear→compute→apply
    /// bracket; created on first use. Put it back with
    /// [`Integration::store_dependents`].
    pub fn take_dependents(&mut self, name: &str) -> Dependents {
        self.dependents
            .remove(name)
            .unwrap_or_else(|| Dependents::new(name, self.frames.len(), self.layout_size))
    }

    pub fn store_dependents(&mut self, parms: Dependents) {
        self.dependents.insert(parms.name().to_string(), parms);
    }

    /// Append a short code to the comment trail.
    pub fn comment(&mut self, text: &str) {
        if !self.comments.is_empty() {
            self.comments.push(' ');
        }
        self.comments.push_str(text);
    }

    /// RMS of the residual timestream over valid samples of valid
    /// channels; 0 when nothing is valid.
    pub fn residual_rms(&self) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for frame in self.frames.iter().flatten() {
            if frame.flags.is_flagged(flags::frame::MODELING) {
                continue;
            }
            for ch in &self.channels {
                if !ch.is_valid() || !frame.is_sample_valid(ch.fixed_index) {
                    continue;
                }
                let x = frame.data[ch.fixed_index];
                sum += x * x;
                n += 1;
            }
        }
        if n == 0 {
            0.0
        } else {
            (sum / n as f64).sqrt()
        }
    }

    /// Highest signal generation across this integration's signals.
    pub fn generation(&self) -> usize {
        self.signals.values().map(|s| s.generation).max().unwrap_or(0)
    }
}
