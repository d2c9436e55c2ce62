mod common;

use approx::assert_abs_diff_eq;

use boreal_core::decorrelate::update_modality;
use boreal_core::error::BorealError;
use boreal_core::estimator::Estimator;
use boreal_core::flags;

fn alternating(n: usize) -> Vec<f64> {
    (0..n).map(|t| if t % 2 == 0 { 1.0 } else { -1.0 }).collect()
}

#[test]
fn test_unit_gains_recover_common_mode_exactly() {
    let series = alternating(64);
    let mut integration = common::with_sky(common::correlated_integration(&[1.0, 1.0], &series));
    let ctx = common::ctx();

    update_modality(&mut integration, "sky", Estimator::MaximumLikelihood, &ctx).unwrap();

    let signal = &integration.signals["sky:sky"];
    assert_eq!(signal.len(), 64);
    assert_eq!(signal.generation, 1);
    for (t, &c) in series.iter().enumerate() {
        assert_abs_diff_eq!(signal.value[t], c, epsilon = 1e-12);
    }

    // Residuals vanish and the solved gains stay at unity.
    assert!(common::raw_rms(&integration) < 1e-12);
    for ch in &integration.channels {
        assert_abs_diff_eq!(ch.gain, 1.0, epsilon = 1e-12);
        assert!(ch.is_valid());
    }
}

#[test]
fn test_known_gains_decorrelate_in_one_pass() {
    let series = alternating(64);
    let mut integration = common::with_sky(common::correlated_integration(&[1.0, 2.0], &series));
    integration.channels[1].gain = 2.0;
    let ctx = common::ctx();

    update_modality(&mut integration, "sky", Estimator::MaximumLikelihood, &ctx).unwrap();

    // Renormalization may rescale gains and signal in tandem; the modeled
    // product gain·C and the residual are what must be exact.
    assert!(common::raw_rms(&integration) < 1e-9);
    let signal = &integration.signals["sky:sky"];
    let g0 = integration.channels[0].gain;
    for (t, &c) in series.iter().enumerate() {
        assert_abs_diff_eq!(g0 * signal.value[t], c, epsilon = 1e-9);
    }
    let ratio = integration.channels[1].gain / g0;
    assert_abs_diff_eq!(ratio, 2.0, epsilon = 1e-9);
}

#[test]
fn test_renormalization_floats_gains_around_unity() {
    let series: Vec<f64> = (0..128).map(|t| (t as f64 * 0.43).sin()).collect();
    let mut integration =
        common::with_sky(common::correlated_integration(&[0.5, 1.0, 2.0], &series));
    let ctx = common::ctx();

    update_modality(&mut integration, "sky", Estimator::MaximumLikelihood, &ctx).unwrap();

    // Noise-free data: the solve recovers the true gains, and the robust
    // renormalization pins the median |gain| at 1 while the signal
    // absorbs the inverse scale.
    assert_abs_diff_eq!(integration.channels[0].gain, 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(integration.channels[1].gain, 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(integration.channels[2].gain, 2.0, epsilon = 1e-9);

    // After the resync the residual is consistent with the new gains.
    assert!(common::raw_rms(&integration) < 1e-9);
    let signal = &integration.signals["sky:sky"];
    for (t, &c) in series.iter().enumerate() {
        assert_abs_diff_eq!(signal.value[t], c, epsilon = 1e-9);
    }
}

#[test]
fn test_gain_solving_converges_to_true_ratio() {
    let series: Vec<f64> = (0..256).map(|t| (t as f64 * 0.37).sin()).collect();
    let mut integration =
        common::with_sky(common::correlated_integration(&[1.5, 0.5], &series));
    let ctx = common::ctx();

    let before = common::raw_rms(&integration);
    assert!(before > 0.5);
    for _ in 0..6 {
        update_modality(&mut integration, "sky", Estimator::MaximumLikelihood, &ctx).unwrap();
    }

    // Each pass resynchronizes the residual with the freshly solved
    // gains, so iterating is stable and drives the noise-free residual
    // to zero instead of walking the gains away from the solution.
    assert!(common::raw_rms(&integration) < 1e-9);
    let ratio = integration.channels[0].gain / integration.channels[1].gain;
    assert_abs_diff_eq!(ratio, 3.0, epsilon = 1e-9);
    assert_eq!(integration.signals["sky:sky"].generation, 6);
}

#[test]
fn test_flagged_channel_is_excluded_from_estimate() {
    let series = alternating(32);
    let mut integration = common::with_sky(common::correlated_integration(&[1.0, 1.0], &series));
    // Junk data on the second channel, then retire it from fits.
    for frame in integration.frames.iter_mut().flatten() {
        frame.data[1] = 7.0;
    }
    integration.channels[1].flags.flag(flags::channel::DEAD);
    let ctx = common::ctx();

    update_modality(&mut integration, "sky", Estimator::MaximumLikelihood, &ctx).unwrap();

    // The estimate follows the valid channel alone.
    let signal = &integration.signals["sky:sky"];
    for (t, &c) in series.iter().enumerate() {
        assert_abs_diff_eq!(signal.value[t], c, epsilon = 1e-12);
    }
    for frame in integration.frames.iter().flatten() {
        assert_abs_diff_eq!(frame.data[0], 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_dependents_account_one_unit_per_block() {
    let series = alternating(48);
    let mut integration = common::with_sky(common::correlated_integration(&[1.0, 1.0], &series));
    let ctx = common::ctx();

    update_modality(&mut integration, "sky", Estimator::MaximumLikelihood, &ctx).unwrap();

    // Resolution is one frame per block, so each of the 48 block fits
    // costs one unit, and each of the 2 gain fits another, mirrored on
    // the frame and channel sides.
    let frame_total: f64 = integration
        .frames
        .iter()
        .flatten()
        .map(|f| f.dependents)
        .sum();
    let channel_total: f64 = integration.channels.iter().map(|ch| ch.dependents).sum();
    assert_abs_diff_eq!(frame_total, 50.0, epsilon = 1e-9);
    assert_abs_diff_eq!(channel_total, 50.0, epsilon = 1e-9);

    // A second pass re-brackets instead of double counting.
    update_modality(&mut integration, "sky", Estimator::MaximumLikelihood, &ctx).unwrap();
    let frame_total: f64 = integration
        .frames
        .iter()
        .flatten()
        .map(|f| f.dependents)
        .sum();
    assert_abs_diff_eq!(frame_total, 50.0, epsilon = 1e-9);
}

#[test]
fn test_robust_estimate_shrugs_off_spike() {
    let series: Vec<f64> = (0..64).map(|t| ((t / 8) as f64) - 3.5).collect();
    let mut integration =
        common::with_sky(common::correlated_integration(&[1.0, 1.0], &series));
    if let Some(frame) = integration.frames[10].as_mut() {
        frame.data[0] += 1000.0;
    }
    {
        let sky = integration.modalities.get_mut("sky").unwrap();
        sky.resolution_secs = 0.8; // 8 frames per block
        sky.solve_gains = false;
    }
    let ctx = common::ctx();

    update_modality(&mut integration, "sky", Estimator::Robust, &ctx).unwrap();

    for frame in integration.frames.iter().flatten() {
        if frame.index == 10 {
            assert_abs_diff_eq!(frame.data[0], 1000.0, epsilon = 1e-9);
        } else {
            assert_abs_diff_eq!(frame.data[0], 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(frame.data[1], 0.0, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_unknown_modality_is_an_error() {
    let mut integration = common::correlated_integration(&[1.0, 1.0], &alternating(8));
    let ctx = common::ctx();
    let result = update_modality(&mut integration, "nope", Estimator::MaximumLikelihood, &ctx);
    assert!(matches!(result, Err(BorealError::UnknownModality(_))));
}

#[test]
fn test_signal_drift_removal_runs_when_configured() {
    let series: Vec<f64> = (0..128).map(|t| 5.0 + (t as f64 * 0.2).sin()).collect();
    let mut integration =
        common::with_sky(common::correlated_integration(&[1.0, 1.0], &series));
    {
        let sky = integration.modalities.get_mut("sky").unwrap();
        sky.drifts_secs = 1.6; // 16 frames -> 16 signal blocks per window
        sky.solve_gains = false;
    }
    let ctx = common::ctx();

    update_modality(&mut integration, "sky", Estimator::MaximumLikelihood, &ctx).unwrap();

    let signal = &integration.signals["sky:sky"];
    assert!(signal.drifts.is_some());
    // The held-out baseline carries the DC level.
    let drift_mean: f64 =
        signal.drifts.as_ref().unwrap().iter().sum::<f64>() / signal.drifts.as_ref().unwrap().len() as f64;
    assert_abs_diff_eq!(drift_mean, 5.0, epsilon = 0.5);
}
