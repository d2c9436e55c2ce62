//! Double accounting of consumed degrees of freedom.
//!
//! Every fit that consumes information from the timestream (offset
//! removal, drift removal, correlated-mode solving) owns one named ledger
//! recording how much of each frame's and each channel's single unit of
//! information it used. The ledger is bracketed around each fit:
//! `clear` backs the previous iteration's costs out of the frame/channel
//! accumulators, the fit accumulates fresh costs with the `add_async`
//! methods, and `apply` installs the new totals. Repeating a fit
//! therefore never double-counts.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::Channel;
use crate::frame::Frame;
use crate::phase::PhaseData;

/// An f64 accumulator safe for concurrent addition from parallel workers.
/// Distinct slots are owned by distinct frame/channel indices, so
/// contention is incidental, not structural.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        if delta == 0.0 {
            return;
        }
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

/// One named fit's ledger: a slot per frame (or phase bin) and a slot per
/// fixed channel index.
pub struct Dependents {
    name: String,
    frame: Vec<AtomicF64>,
    channel: Vec<AtomicF64>,
}

impl Dependents {
    pub fn new(name: &str, frame_slots: usize, channel_slots: usize) -> Self {
        Self {
            name: name.to_string(),
            frame: (0..frame_slots).map(|_| AtomicF64::new(0.0)).collect(),
            channel: (0..channel_slots).map(|_| AtomicF64::new(0.0)).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame_slots(&self) -> usize {
        self.frame.len()
    }

    /// Back this ledger's costs out of the frame and channel accumulators
    /// over `[from, to)`, then zero its storage for that range. Must
    /// bracket the fit together with an `apply` over the same range.
    pub fn clear(&mut self, frames: &mut [Option<Frame>], channels: &mut [Channel], from: usize, to: usize) {
        for t in from..to {
            let d = self.frame[t].load();
            if d != 0.0 {
                if let Some(frame) = frames[t].as_mut() {
                    frame.dependents -= d;
                }
                self.frame[t].store(0.0);
            }
        }
        for ch in channels.iter_mut() {
            let d = self.channel[ch.fixed_index].load();
            if d != 0.0 {
                ch.dependents -= d;
                self.channel[ch.fixed_index].store(0.0);
            }
        }
    }

    /// Install the ledger's totals into the frame and channel accumulators
    /// over `[from, to)`. Call exactly once per `clear`.
    pub fn apply(&self, frames: &mut [Option<Frame>], channels: &mut [Channel], from: usize, to: usize) {
        for t in from..to {
            let d = self.frame[t].load();
            if d != 0.0 {
                if let Some(frame) = frames[t].as_mut() {
                    frame.dependents += d;
                }
            }
        }
        for ch in channels.iter_mut() {
            let d = self.channel[ch.fixed_index].load();
            if d != 0.0 {
                ch.dependents += d;
            }
        }
    }

    /// Phase-binned variant of [`Dependents::clear`]: the frame axis of
    /// this ledger indexes phase bins.
    pub fn clear_phases(&mut self, phases: &mut [PhaseData], channels: &mut [Channel]) {
        for (b, phase) in phases.iter_mut().enumerate() {
            let d = self.frame[b].load();
            if d != 0.0 {
                phase.dependents -= d;
                self.frame[b].store(0.0);
            }
        }
        for ch in channels.iter_mut() {
            let d = self.channel[ch.fixed_index].load();
            if d != 0.0 {
                ch.dependents -= d;
                self.channel[ch.fixed_index].store(0.0);
            }
        }
    }

    /// Phase-binned variant of [`Dependents::apply`].
    pub fn apply_phases(&self, phases: &mut [PhaseData], channels: &mut [Channel]) {
        for (b, phase) in phases.iter_mut().enumerate() {
            phase.dependents += self.frame[b].load();
        }
        for ch in channels.iter_mut() {
            ch.dependents += self.channel[ch.fixed_index].load();
        }
    }

    /// Accumulate a frame-side cost from within a parallel callback.
    pub fn add_async_frame(&self, index: usize, amount: f64) {
        self.frame[index].add(amount);
    }

    /// Accumulate a channel-side cost from within a parallel callback.
    pub fn add_async_channel(&self, fixed_index: usize, amount: f64) {
        self.channel[fixed_index].add(amount);
    }

    pub fn frame_total(&self, index: usize) -> f64 {
        self.frame[index].load()
    }

    pub fn channel_total(&self, fixed_index: usize) -> f64 {
        self.channel[fixed_index].load()
    }
}
