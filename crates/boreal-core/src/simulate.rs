//! Synthetic timestream generation for tests and demos.
//!
//! Produces scans whose frames contain a known mixture: per-channel gains
//! times a common-mode signal, white noise, optional random-walk drifts,
//! spikes, data gaps and a square-wave chopper. Reductions of simulated
//! data can then be checked against the injected truth.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::channel::ChannelDivision;
use crate::flags;
use crate::integration::Integration;
use crate::mode::{FieldGain, GainSource, Modality};
use crate::phase::PhaseSet;
use crate::scan::Scan;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSpec {
    pub seed: u64,
    pub scans: usize,
    pub integrations: usize,
    pub channels: usize,
    pub frames: usize,
    /// Seconds per frame.
    pub sampling_interval: f64,
    /// White noise rms per sample.
    pub noise: f64,
    /// Rms amplitude of the injected common-mode signal.
    pub common_mode: f64,
    /// Rms deviation of the true per-channel gains from 1.
    pub gain_spread: f64,
    /// Random-walk step rms per frame, per channel. 0 disables drifts.
    pub drift: f64,
    /// Spikes injected per integration.
    pub spikes: usize,
    pub spike_level: f64,
    /// Frames removed (data gaps) per integration.
    pub gaps: usize,
    /// Frames per chop cycle; 0 disables the chopper.
    pub chopper_period: usize,
    pub chopper_amplitude: f64,
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            seed: 7,
            scans: 1,
            integrations: 1,
            channels: 16,
            frames: 1024,
            sampling_interval: 0.1,
            noise: 1.0,
            common_mode: 3.0,
            gain_spread: 0.2,
            drift: 0.0,
            spikes: 0,
            spike_level: 50.0,
            gaps: 0,
            chopper_period: 0,
            chopper_amplitude: 0.0,
        }
    }
}

/// Standard normal deviate by Box-Muller.
fn gauss(rng: &mut StdRng) -> f64 {
    let u: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let v: f64 = rng.gen();
    (-2.0 * u.ln()).sqrt() * (std::f64::consts::TAU * v).cos()
}

impl SimulationSpec {
    pub fn build(&self) -> Vec<Scan> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..self.scans.max(1))
            .map(|s| {
                let mut scan = Scan::new(s, &format!("sim-{s}"));
                for i in 0..self.integrations.max(1) {
                    scan.integrations
                        .push(self.build_integration(s, i, &mut rng));
                }
                scan
            })
            .collect()
    }

    fn build_integration(&self, scan: usize, index: usize, rng: &mut StdRng) -> Integration {
        let mut integration = Integration::new(scan, index, self.channels, self.frames);
        integration.sampling_interval = self.sampling_interval;

        let true_gains: Vec<f64> = (0..self.channels)
            .map(|_| 1.0 + self.gain_spread * gauss(rng))
            .collect();

        let chopper: Option<Vec<f64>> = (self.chopper_period >= 2).then(|| {
            let half = self.chopper_period / 2;
            (0..self.frames)
                .map(|t| if (t / half) % 2 == 0 { 1.0 } else { -1.0 })
                .collect()
        });

        let mut drifts = vec![0.0; self.channels];
        for t in 0..self.frames {
            let c = self.common_mode * gauss(rng);
            let chop = chopper.as_ref().map_or(0.0, |ch| ch[t]);
            if self.drift > 0.0 {
                for d in &mut drifts {
                    *d += self.drift * gauss(rng);
                }
            }
            if let Some(frame) = integration.frames[t].as_mut() {
                for (fx, g) in true_gains.iter().enumerate() {
                    frame.data[fx] = g * (c + self.chopper_amplitude * chop)
                        + self.noise * gauss(rng)
                        + drifts[fx];
                }
            }
        }

        for _ in 0..self.spikes {
            let t = rng.gen_range(0..self.frames);
            let fx = rng.gen_range(0..self.channels);
            if let Some(frame) = integration.frames[t].as_mut() {
                frame.data[fx] += self.spike_level * self.noise;
            }
        }

        for _ in 0..self.gaps {
            let t = rng.gen_range(0..self.frames);
            integration.frames[t] = None;
        }

        let division = ChannelDivision::all("sky", &integration.channels);
        let mut sky = Modality::correlated("sky", &division);
        for mode in &mut sky.modes {
            mode.source = GainSource::Provider(Arc::new(FieldGain));
        }
        integration.modalities.insert("sky".to_string(), sky);

        if let Some(chop) = chopper {
            let bins = chop_bins(&chop);
            integration.phases = Some(PhaseSet::new(
                &integration.frames,
                &integration.channels,
                &bins,
                self.channels,
            ));
            for (t, &c) in chop.iter().enumerate() {
                // One transit frame per sign change.
                if t > 0 && c != chop[t - 1] {
                    if let Some(frame) = integration.frames[t].as_mut() {
                        frame.flags.flag(flags::frame::CHOP_TRANSIT);
                    }
                }
            }
            integration.chopper = Some(chop);
        }

        integration
    }
}

/// Split a chopper series into (from, to, phase) bins, one per constant
/// stretch, phase 0 for the positive throw and 1 for the negative.
fn chop_bins(chop: &[f64]) -> Vec<(usize, usize, u8)> {
    let mut bins = Vec::new();
    let mut from = 0;
    for t in 1..=chop.len() {
        if t == chop.len() || chop[t] != chop[from] {
            let phase = u8::from(chop[from] < 0.0);
            bins.push((from, t, phase));
            from = t;
        }
    }
    bins
}
