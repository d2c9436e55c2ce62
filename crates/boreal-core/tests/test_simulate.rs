use boreal_core::flags;
use boreal_core::simulate::SimulationSpec;

#[test]
fn test_same_seed_reproduces_data() {
    let spec = SimulationSpec {
        seed: 11,
        channels: 4,
        frames: 64,
        ..SimulationSpec::default()
    };
    let a = spec.build();
    let b = spec.build();

    let fa = a[0].integrations[0].frames[10].as_ref().unwrap();
    let fb = b[0].integrations[0].frames[10].as_ref().unwrap();
    assert_eq!(fa.data, fb.data);

    let c = SimulationSpec { seed: 12, ..spec }.build();
    let fc = c[0].integrations[0].frames[10].as_ref().unwrap();
    assert_ne!(fa.data, fc.data);
}

#[test]
fn test_build_shapes_match_spec() {
    let spec = SimulationSpec {
        scans: 2,
        integrations: 3,
        channels: 5,
        frames: 32,
        ..SimulationSpec::default()
    };
    let scans = spec.build();

    assert_eq!(scans.len(), 2);
    for (s, scan) in scans.iter().enumerate() {
        assert_eq!(scan.index, s);
        assert_eq!(scan.integrations.len(), 3);
        for integration in &scan.integrations {
            assert_eq!(integration.layout_size, 5);
            assert_eq!(integration.n_frames(), 32);
            assert!(integration.modalities.contains_key("sky"));
            let sky = &integration.modalities["sky"];
            assert_eq!(sky.modes.len(), 1);
            assert_eq!(sky.modes[0].size(), 5);
        }
    }
}

#[test]
fn test_gaps_leave_holes() {
    let spec = SimulationSpec {
        gaps: 5,
        frames: 256,
        ..SimulationSpec::default()
    };
    let scans = spec.build();
    let holes = scans[0].integrations[0]
        .frames
        .iter()
        .filter(|f| f.is_none())
        .count();
    assert!(holes >= 1 && holes <= 5);
}

#[test]
fn test_chopper_builds_phases_and_transits() {
    let spec = SimulationSpec {
        chopper_period: 16,
        chopper_amplitude: 2.0,
        frames: 128,
        ..SimulationSpec::default()
    };
    let scans = spec.build();
    let integration = &scans[0].integrations[0];

    let chopper = integration.chopper.as_ref().unwrap();
    assert_eq!(chopper.len(), 128);
    assert!(chopper.iter().all(|&c| c == 1.0 || c == -1.0));

    // One bin per half-cycle, phases alternating.
    let set = integration.phases.as_ref().unwrap();
    assert_eq!(set.len(), 128 / 8);
    assert_eq!(set.phases[0].phase, 0);
    assert_eq!(set.phases[1].phase, 1);
    assert_eq!(set.phases[1].from, 8);

    // Sign changes are marked as chop transits.
    let transits = integration
        .frames
        .iter()
        .flatten()
        .filter(|f| f.flags.is_flagged(flags::frame::CHOP_TRANSIT))
        .count();
    assert_eq!(transits, 128 / 8 - 1);
}

#[test]
fn test_no_chopper_means_no_phases() {
    let scans = SimulationSpec::default().build();
    let integration = &scans[0].integrations[0];
    assert!(integration.chopper.is_none());
    assert!(integration.phases.is_none());
}
