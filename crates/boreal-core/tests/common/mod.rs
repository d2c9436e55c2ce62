use std::sync::Arc;

use boreal_core::channel::ChannelDivision;
use boreal_core::context::ReductionContext;
use boreal_core::integration::Integration;
use boreal_core::mode::{FieldGain, GainSource, Modality};

pub fn ctx() -> ReductionContext {
    ReductionContext::new(4)
}

/// An integration whose sample for channel `fx` at frame `t` is
/// `gains[fx] * series[t]`, noise-free.
pub fn correlated_integration(gains: &[f64], series: &[f64]) -> Integration {
    let mut integration = Integration::new(0, 0, gains.len(), series.len());
    for (t, c) in series.iter().enumerate() {
        let frame = integration.frames[t].as_mut().unwrap();
        for (fx, g) in gains.iter().enumerate() {
            frame.data[fx] = g * c;
        }
    }
    integration
}

/// Install a single correlated "sky" mode spanning every channel, with
/// gains stored in the channel gain field.
pub fn with_sky(mut integration: Integration) -> Integration {
    let division = ChannelDivision::all("sky", &integration.channels);
    let mut sky = Modality::correlated("sky", &division);
    for mode in &mut sky.modes {
        mode.source = GainSource::Provider(Arc::new(FieldGain));
    }
    integration.modalities.insert("sky".to_string(), sky);
    integration
}

/// RMS over all samples of all frames, holes skipped.
pub fn raw_rms(integration: &Integration) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for frame in integration.frames.iter().flatten() {
        for &x in &frame.data {
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
