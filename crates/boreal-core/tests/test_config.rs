use std::io::Write;

use boreal_core::estimator::Estimator;
use boreal_core::options::{Options, ReductionConfig};
use boreal_core::simulate::SimulationSpec;

#[test]
fn test_default_config_round_trips_through_json() {
    let config = ReductionConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let back: ReductionConfig = serde_json::from_str(&json).unwrap();

    assert_eq!(back.tasks, config.tasks);
    assert_eq!(back.rounds, 1);
    assert_eq!(back.min_channels, 2);
    assert_eq!(back.min_frames, 16);
    assert!(!back.robust);
}

#[test]
fn test_partial_config_fills_defaults() {
    let back: ReductionConfig =
        serde_json::from_str(r#"{"rounds": 3, "robust": true}"#).unwrap();
    assert_eq!(back.rounds, 3);
    assert!(back.robust);
    assert_eq!(back.tasks, ReductionConfig::default().tasks);
}

#[test]
fn test_config_loads_from_file() {
    let config = ReductionConfig::default();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string(&config).unwrap().as_bytes())
        .unwrap();

    let text = std::fs::read_to_string(file.path()).unwrap();
    let back: ReductionConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back.tasks, config.tasks);
}

#[test]
fn test_per_task_estimator_overrides_global() {
    let mut config = ReductionConfig::default();
    assert_eq!(config.estimator("offsets"), Estimator::MaximumLikelihood);

    config.options.set("offsets.robust", "true");
    assert_eq!(config.estimator("offsets"), Estimator::Robust);
    assert_eq!(config.estimator("drifts"), Estimator::MaximumLikelihood);

    config.robust = true;
    config.options.set("drifts.robust", "false");
    assert_eq!(config.estimator("drifts"), Estimator::MaximumLikelihood);
    assert_eq!(config.estimator("despike"), Estimator::Robust);
}

#[test]
fn test_options_typed_accessors() {
    let mut options = Options::new();
    options.set("drifts", 30.0);
    options.set("despike.level", "10");
    options.set("correlated.sky.gains", "off");
    options.set("rounds", 4usize);

    assert!(options.is_set("drifts"));
    assert_eq!(options.get_f64("drifts"), Some(30.0));
    assert_eq!(options.get_f64("despike.level"), Some(10.0));
    assert_eq!(options.get_bool("correlated.sky.gains"), Some(false));
    assert_eq!(options.get_usize("rounds"), Some(4));
    assert_eq!(options.get("missing"), None);
    assert_eq!(options.get_bool("drifts"), None);
}

#[test]
fn test_estimator_serde_names_are_kebab_case() {
    assert_eq!(
        serde_json::to_string(&Estimator::MaximumLikelihood).unwrap(),
        r#""maximum-likelihood""#
    );
    assert_eq!(
        serde_json::from_str::<Estimator>(r#""robust""#).unwrap(),
        Estimator::Robust
    );
}

#[test]
fn test_simulation_spec_round_trips() {
    let spec = SimulationSpec {
        scans: 4,
        chopper_period: 32,
        ..SimulationSpec::default()
    };
    let json = serde_json::to_string(&spec).unwrap();
    let back: SimulationSpec = serde_json::from_str(&json).unwrap();
    assert_eq!(back.scans, 4);
    assert_eq!(back.chopper_period, 32);
    assert_eq!(back.channels, spec.channels);
}
