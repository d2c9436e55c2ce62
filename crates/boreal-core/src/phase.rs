//! Phase-binned decorrelation for chopped/modulated observations.
//!
//! A phase bin aggregates one contiguous run of frames into a single
//! per-channel value and weight. The correlated-mode algorithm then runs
//! bin by bin instead of frame block by frame block, sharing the ML and
//! robust estimators with the frame-resolution engine; only the data
//! source differs.

use std::collections::HashMap;

use ndarray::Array2;

use crate::channel::Channel;
use crate::context::ReductionContext;
use crate::dependents::Dependents;
use crate::error::{BorealError, Result};
use crate::estimator::{self, Estimator, WeightedPoint};
use crate::flags;
use crate::fork;
use crate::frame::Frame;
use crate::mode::{Modality, ModeKind};
use crate::signal::Signal;

/// One phase bin: a pre-averaged run of frames with its own per-channel
/// value, weight and validity, and its own dependents accumulator.
#[derive(Clone, Debug)]
pub struct PhaseData {
    pub index: usize,
    /// Covered frame range `[from, to)`.
    pub from: usize,
    pub to: usize,
    /// Which chop phase this bin belongs to.
    pub phase: u8,
    pub dependents: f64,
}

/// The phase-binned view of an integration: bin metadata plus dense
/// per-bin × per-channel value/weight/flag tables.
pub struct PhaseSet {
    pub phases: Vec<PhaseData>,
    /// `[bin, fixed channel]` weighted mean of the covered samples.
    pub value: Array2<f64>,
    /// `[bin, fixed channel]` accumulated weight.
    pub weight: Array2<f64>,
    /// `[bin, fixed channel]` nonzero marks the bin's sample invalid.
    pub sample_flag: Array2<u8>,
    pub signals: HashMap<String, Signal>,
    dependents: HashMap<String, Dependents>,
}

impl PhaseSet {
    /// Aggregate frames into bins at the given `[from, to, phase)`
    /// boundaries.
    pub fn new(frames: &[Option<Frame>], channels: &[Channel], bins: &[(usize, usize, u8)], layout_size: usize) -> Self {
        let n = bins.len();
        let mut set = Self {
            phases: bins
                .iter()
                .enumerate()
                .map(|(i, &(from, to, phase))| PhaseData {
                    index: i,
                    from,
                    to,
                    phase,
                    dependents: 0.0,
                })
                .collect(),
            value: Array2::zeros((n, layout_size)),
            weight: Array2::zeros((n, layout_size)),
            sample_flag: Array2::zeros((n, layout_size)),
            signals: HashMap::new(),
            dependents: HashMap::new(),
        };
        set.update(frames, channels);
        set
    }

    /// Recompute every bin's per-channel mean and weight from the current
    /// timestream.
    pub fn update(&mut self, frames: &[Option<Frame>], channels: &[Channel]) {
        for bin in &self.phases {
            let b = bin.index;
            for ch in channels {
                let fx = ch.fixed_index;
                let mut sum = 0.0;
                let mut sum_w = 0.0;
                for frame in frames[bin.from..bin.to].iter().flatten() {
                    if !frame.is_modeling() || !frame.is_sample_valid(fx) {
                        continue;
                    }
                    let w = frame.relative_weight * ch.weight;
                    sum += w * frame.data[fx];
                    sum_w += w;
                }
                if sum_w > 0.0 {
                    self.value[[b, fx]] = sum / sum_w;
                    self.weight[[b, fx]] = sum_w;
                    self.sample_flag[[b, fx]] = 0;
                } else {
                    self.value[[b, fx]] = 0.0;
                    self.weight[[b, fx]] = 0.0;
                    self.sample_flag[[b, fx]] = flags::sample::PHASE_INVALID;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    fn take_dependents(&mut self, name: &str, layout_size: usize) -> Dependents {
        let slots = self.phases.len();
        self.dependents
            .remove(name)
            .unwrap_or_else(|| Dependents::new(name, slots, layout_size))
    }

    fn store_dependents(&mut self, parms: Dependents) {
        self.dependents.insert(parms.name().to_string(), parms);
    }
}

/// Whether channel `ch` may contribute to bin `b`'s correlated fit.
///
/// Excluded when the channel is flagged, when it drives the modulation
/// itself, or when the bin marks its sample invalid.
fn usable(set: &PhaseSet, b: usize, ch: &Channel) -> bool {
    ch.is_valid() && ch.source_phase == 0 && set.sample_flag[[b, ch.fixed_index]] == 0
}

/// One decorrelation pass of the named modality over the phase bins.
///
/// Structurally identical to the frame-resolution engine: estimate Δ per
/// bin, subtract `gain × Δ` from every member channel's bin value, track
/// dependents, then optionally re-solve phase gains.
pub fn update_phases(
    integration: &mut crate::integration::Integration,
    name: &str,
    estimator: Estimator,
    ctx: &ReductionContext,
) -> Result<()> {
    let mut modality = integration
        .modalities
        .remove(name)
        .ok_or_else(|| BorealError::UnknownModality(name.to_string()))?;
    let mut phases = match integration.phases.take() {
        Some(p) => p,
        None => {
            integration.modalities.insert(name.to_string(), modality);
            return Ok(());
        }
    };

    // Earlier tasks (offsets, despiking, the frame-resolution engine)
    // changed the timestream since the bins were last aggregated, so
    // rebuild them from the current residual before estimating.
    phases.update(&integration.frames, &integration.channels);

    let result = run_phase_modality(integration, &mut phases, &mut modality, estimator, ctx);

    integration.phases = Some(phases);
    integration.modalities.insert(name.to_string(), modality);
    result
}

fn run_phase_modality(
    integration: &mut crate::integration::Integration,
    set: &mut PhaseSet,
    modality: &mut Modality,
    estimator: Estimator,
    ctx: &ReductionContext,
) -> Result<()> {
    let lookup = integration.channel_lookup();
    let layout_size = integration.layout_size;

    for idx in 0..modality.modes.len() {
        let gains = modality.mode_gains(idx, &integration.channels, &lookup);
        let mode = &modality.modes[idx];
        let mode_name = format!("{}:phases", mode.name);
        let mode_channels = mode.channels.clone();
        let n_bins = set.len();
        if n_bins == 0 {
            continue;
        }

        // Usable-channel snapshot: weight·gain products per mode channel.
        let n = mode_channels.len();
        let mut wg2 = vec![0.0; n];
        let mut live = vec![None; n];
        for (k, &fx) in mode_channels.iter().enumerate() {
            if let Some(i) = lookup.get(fx).and_then(|slot| *slot) {
                let ch = &integration.channels[i];
                live[k] = Some(i);
                wg2[k] = ch.weight * gains[k] * gains[k];
            }
        }

        let mut parms = set.take_dependents(&mode_name, layout_size);
        parms.clear_phases(&mut set.phases, &mut integration.channels);

        let signal = set
            .signals
            .entry(mode_name.clone())
            .or_insert_with(|| Signal::new(&mode_name, 1, n_bins));
        if signal.len() != n_bins {
            *signal = Signal::new(&mode_name, 1, n_bins);
        }

        // The freshly rebuilt bins still contain this signal's
        // accumulated model (bin subtraction never reaches the frames),
        // so put it back out before estimating what is left.
        for b in 0..n_bins {
            let c = signal.value[b];
            if c == 0.0 {
                continue;
            }
            for (k, &fx) in mode_channels.iter().enumerate() {
                if gains[k] != 0.0 && set.sample_flag[[b, fx]] == 0 {
                    set.value[[b, fx]] -= gains[k] * c;
                }
            }
        }

        // Bins are independent; parallel over bins with each job owning
        // its row of the value table and its signal slot.
        let channels = &integration.channels;
        let gains_ref = &gains;
        let wg2_ref = &wg2;
        let live_ref = &live;
        let mode_channels_ref = &mode_channels;
        let parms_ref = &parms;
        let sample_flag = &set.sample_flag;
        let weight_table = &set.weight;

        struct BinJob<'a> {
            bin: &'a mut PhaseData,
            values: &'a mut [f64],
            signal_value: &'a mut f64,
            signal_weight: &'a mut f64,
        }

        let jobs: Vec<BinJob> = set
            .phases
            .iter_mut()
            .zip(set.value.rows_mut())
            .zip(signal.value.iter_mut())
            .zip(signal.weight.iter_mut())
            .map(|(((bin, row), signal_value), signal_weight)| BinJob {
                bin,
                values: row.into_slice().expect("phase table rows are contiguous"),
                signal_value,
                signal_weight,
            })
            .collect();

        fork::distribute(ctx, jobs, |b, job| {
            let mut sum_wg2 = 0.0;
            let usable_k = |k: usize| -> bool {
                let Some(i) = live_ref[k] else { return false };
                let ch = &channels[i];
                ch.is_valid()
                    && ch.source_phase == 0
                    && sample_flag[[b, ch.fixed_index]] == 0
                    && wg2_ref[k] > 0.0
            };

            let increment = match estimator {
                Estimator::MaximumLikelihood => {
                    let mut num = 0.0;
                    let mut den = 0.0;
                    for (k, &fx) in mode_channels_ref.iter().enumerate() {
                        if !usable_k(k) {
                            continue;
                        }
                        let pw = weight_table[[b, fx]];
                        if pw <= 0.0 {
                            continue;
                        }
                        num += pw * gains_ref[k] * job.values[fx];
                        den += pw * gains_ref[k] * gains_ref[k];
                        sum_wg2 += pw * gains_ref[k] * gains_ref[k];
                    }
                    estimator::ml_increment(num, den)
                }
                Estimator::Robust => {
                    let mut points = Vec::with_capacity(mode_channels_ref.len());
                    for (k, &fx) in mode_channels_ref.iter().enumerate() {
                        if !usable_k(k) || gains_ref[k] == 0.0 {
                            continue;
                        }
                        let pw = weight_table[[b, fx]];
                        if pw <= 0.0 {
                            continue;
                        }
                        let w = pw * gains_ref[k] * gains_ref[k];
                        points.push(WeightedPoint::new(job.values[fx] / gains_ref[k], w));
                        sum_wg2 += w;
                    }
                    estimator::robust_increment(&mut points)
                }
            };

            let Some(increment) = increment else {
                return Ok(());
            };
            let delta = increment.value;

            for (k, &fx) in mode_channels_ref.iter().enumerate() {
                if gains_ref[k] == 0.0 || sample_flag[[b, fx]] != 0 {
                    continue;
                }
                job.values[fx] -= gains_ref[k] * delta;

                if usable_k(k) && sum_wg2 > 0.0 {
                    let pw = weight_table[[b, fx]];
                    let dp = pw * gains_ref[k] * gains_ref[k] / sum_wg2;
                    parms_ref.add_async_frame(job.bin.index, dp);
                    parms_ref.add_async_channel(fx, dp);
                }
            }

            *job.signal_value += delta;
            *job.signal_weight = increment.weight;
            Ok(())
        })?;

        signal.generation += 1;

        parms.apply_phases(&mut set.phases, &mut integration.channels);
        set.store_dependents(parms);

        // Phase-gain re-solve against the bin signal.
        let mode = &modality.modes[idx];
        let solvable = modality.solve_gains
            && !mode.fixed_gains
            && mode.phase_gains
            && matches!(mode.kind, ModeKind::Correlated | ModeKind::Plain);
        if solvable {
            let signal = &set.signals[&mode_name];
            let mut new_gains = gains.clone();
            for (k, &fx) in mode_channels.iter().enumerate() {
                let Some(i) = live[k] else { continue };
                let ch = &integration.channels[i];
                let increment = match estimator {
                    Estimator::MaximumLikelihood => {
                        let mut num = 0.0;
                        let mut den = 0.0;
                        for b in 0..set.len() {
                            if !usable(set, b, ch) {
                                continue;
                            }
                            let c = signal.value[b];
                            let pw = set.weight[[b, fx]];
                            num += pw * c * set.value[[b, fx]];
                            den += pw * c * c;
                        }
                        estimator::ml_increment(num, den)
                    }
                    Estimator::Robust => {
                        let mut points = Vec::with_capacity(set.len());
                        for b in 0..set.len() {
                            if !usable(set, b, ch) {
                                continue;
                            }
                            let c = signal.value[b];
                            if c == 0.0 {
                                continue;
                            }
                            let pw = set.weight[[b, fx]];
                            points.push(WeightedPoint::new(set.value[[b, fx]] / c, pw * c * c));
                        }
                        estimator::robust_increment(&mut points)
                    }
                };
                if let Some(increment) = increment {
                    new_gains[k] += increment.value;
                }
            }
            let flagged = modality.modes[idx].set_gains(
                &mut integration.channels,
                &lookup,
                &new_gains,
                modality.gain_range,
                modality.gain_flag,
            )?;
            if flagged > 0 {
                tracing::debug!(mode = %mode_name, flagged, "flagged out-of-range phase gains");
            }
        }
    }

    Ok(())
}
