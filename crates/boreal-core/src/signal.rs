use serde::{Deserialize, Serialize};

/// The derived common-mode series for one Mode: one value per resolution
/// block of `resolution` consecutive frames (or one per phase bin).
///
/// `value` and `drifts` partition the modeled series: `add_drifts`
/// restores exactly what `remove_drifts` took out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signal {
    pub mode: String,
    /// Frames per signal block; 1 for phase-binned signals.
    pub resolution: usize,
    pub value: Vec<f64>,
    pub weight: Vec<f64>,
    /// Slow baseline held out of `value`, one entry per drift window.
    pub drifts: Option<Vec<f64>>,
    /// Signal blocks per drift window of the last `remove_drifts` call.
    pub drift_n: usize,
    /// Completed decorrelation passes. Consumers compare against it to
    /// detect staleness; never used for synchronization.
    pub generation: usize,
}

impl Signal {
    pub fn new(mode: &str, resolution: usize, blocks: usize) -> Self {
        Self {
            mode: mode.to_string(),
            resolution: resolution.max(1),
            value: vec![0.0; blocks],
            weight: vec![0.0; blocks],
            drifts: None,
            drift_n: 0,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// The signal value covering frame `t`.
    pub fn value_at(&self, t: usize) -> f64 {
        self.value[t / self.resolution]
    }

    /// Multiply the whole modeled series, held-out drifts included.
    /// Paired with dividing the gains by the same factor, so `gain·C`
    /// is unchanged.
    pub fn scale(&mut self, factor: f64) {
        for v in self.value.iter_mut() {
            *v *= factor;
        }
        if let Some(drifts) = self.drifts.as_mut() {
            for d in drifts.iter_mut() {
                *d *= factor;
            }
        }
    }

    /// Strip the slow baseline: subtract the weighted mean of every window
    /// of `drift_n` signal blocks (rounded up to a power of two), holding
    /// the removed means so the operation is invertible.
    pub fn remove_drifts(&mut self, drift_n: usize) {
        let window = drift_n.max(1).next_power_of_two();
        let n_windows = self.value.len().div_ceil(window);
        if self.drifts.is_none() || self.drift_n != window {
            // A previous hold-out at another window size is folded back in
            // first, so value/drifts stay an exact partition.
            self.add_drifts();
            self.drifts = Some(vec![0.0; n_windows]);
            self.drift_n = window;
        }
        let drifts = self.drifts.as_mut().unwrap();

        for w in 0..n_windows {
            let from = w * window;
            let to = (from + window).min(self.value.len());

            let mut sum = 0.0;
            let mut sum_w = 0.0;
            for i in from..to {
                if self.weight[i] > 0.0 {
                    sum += self.weight[i] * self.value[i];
                    sum_w += self.weight[i];
                }
            }
            if sum_w <= 0.0 {
                continue;
            }
            let mean = sum / sum_w;
            for i in from..to {
                self.value[i] -= mean;
            }
            drifts[w] += mean;
        }
    }

    /// Restore the held-out baseline, reconstructing the pre-removal
    /// series exactly.
    pub fn add_drifts(&mut self) {
        let Some(drifts) = self.drifts.take() else {
            return;
        };
        for (i, v) in self.value.iter_mut().enumerate() {
            *v += drifts[i / self.drift_n];
        }
        self.drift_n = 0;
    }
}
