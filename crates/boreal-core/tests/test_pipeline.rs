use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

use boreal_core::context::ReductionContext;
use boreal_core::error::{BorealError, Result};
use boreal_core::integration::Integration;
use boreal_core::options::ReductionConfig;
use boreal_core::pipeline::{
    reduce_all, reduce_all_with, InFlightRegistry, IntegrationSummary, SourceModel,
};
use boreal_core::scan::Scan;
use boreal_core::simulate::SimulationSpec;

fn sim_scans(scans: usize, integrations: usize) -> Vec<Scan> {
    SimulationSpec {
        seed: 42,
        scans,
        integrations,
        channels: 8,
        frames: 128,
        common_mode: 3.0,
        gain_spread: 0.1,
        ..SimulationSpec::default()
    }
    .build()
}

fn config(tasks: &[&str]) -> ReductionConfig {
    let mut config = ReductionConfig::default();
    config.tasks = tasks.iter().map(|t| t.to_string()).collect();
    config
}

#[test]
fn test_summaries_come_back_in_canonical_order() {
    let mut scans = sim_scans(3, 2);
    let mut config = config(&["offsets", "correlated.sky", "weighting"]);
    config.pipelines = 3;
    let ctx = ReductionContext::new(4);

    let summaries = reduce_all(&mut scans, &config, &ctx, None).unwrap();

    assert_eq!(summaries.len(), 6);
    let keys: Vec<(usize, usize)> = summaries.iter().map(|s| (s.scan, s.integration)).collect();
    assert_eq!(keys, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);

    for summary in &summaries {
        assert!(!summary.retired);
        assert!(summary.generation >= 1, "decorrelation ran");
        assert!(summary.comments.contains("C[sky]"));
        // Common mode (rms 3) removed; what's left is near the noise.
        assert!(summary.residual_rms < 2.0, "rms = {}", summary.residual_rms);
    }
}

#[test]
fn test_single_pipeline_gives_same_order() {
    let mut scans = sim_scans(3, 2);
    let mut config = config(&["offsets"]);
    config.pipelines = 1;
    let ctx = ReductionContext::new(2);

    let summaries = reduce_all(&mut scans, &config, &ctx, None).unwrap();
    let keys: Vec<(usize, usize)> = summaries.iter().map(|s| (s.scan, s.integration)).collect();
    assert_eq!(keys, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);
}

#[test]
fn test_unhandled_task_is_skipped_not_fatal() {
    let mut scans = sim_scans(1, 1);
    let config = config(&["offsets", "correlated.atmosphere"]);
    let ctx = ReductionContext::new(2);

    let summaries = reduce_all(&mut scans, &config, &ctx, None).unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].comments.contains('O'));
    assert!(!summaries[0].comments.contains("C["));
}

#[test]
fn test_short_integration_is_dropped_with_summary() {
    let mut scans = sim_scans(1, 1);
    let mut short = Integration::new(1, 0, 8, 4);
    short.sampling_interval = 0.1;
    let mut scan = Scan::new(1, "short");
    scan.integrations.push(short);
    scans.push(scan);

    let config = config(&["offsets"]);
    let ctx = ReductionContext::new(2);

    let summaries = reduce_all(&mut scans, &config, &ctx, None).unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(!summaries[0].retired);
    assert!(summaries[1].retired);
    assert!(summaries[1].comments.contains("dropped"));
}

struct CountingModel {
    added: AtomicUsize,
    processed: AtomicUsize,
    synced: AtomicUsize,
}

impl SourceModel for CountingModel {
    fn add(&self, _integration: &Integration, _weight: f64) -> Result<()> {
        self.added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn process(&self, _scan: &Scan) -> Result<()> {
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sync(&self, _integration: &mut Integration) -> Result<()> {
        self.synced.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[test]
fn test_source_model_sees_every_integration_once_per_round() {
    let mut scans = sim_scans(2, 2);
    let mut config = config(&["offsets"]);
    config.extract_source = true;
    config.rounds = 2;
    let ctx = ReductionContext::new(2);
    let model = CountingModel {
        added: AtomicUsize::new(0),
        processed: AtomicUsize::new(0),
        synced: AtomicUsize::new(0),
    };

    reduce_all(&mut scans, &config, &ctx, Some(&model)).unwrap();

    assert_eq!(model.added.load(Ordering::Relaxed), 8);
    assert_eq!(model.processed.load(Ordering::Relaxed), 4);
    assert_eq!(model.synced.load(Ordering::Relaxed), 8);
}

/// Holds the second scan's reduction hostage until released.
struct GatedModel {
    gate: Mutex<mpsc::Receiver<()>>,
}

impl SourceModel for GatedModel {
    fn add(&self, integration: &Integration, _weight: f64) -> Result<()> {
        if integration.scan_index == 1 {
            self.gate
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| BorealError::Config("gate was never released".to_string()))?;
        }
        Ok(())
    }

    fn process(&self, _scan: &Scan) -> Result<()> {
        Ok(())
    }

    fn sync(&self, _integration: &mut Integration) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_summaries_are_consumed_while_pipelines_run() {
    let mut scans = sim_scans(2, 1);
    let mut config = config(&["offsets"]);
    config.pipelines = 2;
    config.extract_source = true;
    let ctx = ReductionContext::new(4);

    // Scan 1 cannot finish until the coordinator has already observed
    // scan 0's summary, so consumption must overlap the reduction.
    let (release, gate) = mpsc::channel();
    let model = GatedModel {
        gate: Mutex::new(gate),
    };

    let mut seen = Vec::new();
    let summaries = reduce_all_with(&mut scans, &config, &ctx, Some(&model), |s| {
        if s.scan == 0 {
            let _ = release.send(());
        }
        seen.push((s.scan, s.integration));
    })
    .unwrap();

    assert_eq!(seen, vec![(0, 0), (1, 0)]);
    assert_eq!(summaries.len(), 2);
}

#[test]
fn test_registry_take_blocks_until_complete() {
    let registry = InFlightRegistry::new();
    registry.check_in(0, 0);
    assert_eq!(registry.in_flight(), 1);

    std::thread::scope(|s| {
        s.spawn(|| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            registry.complete(IntegrationSummary {
                scan: 0,
                scan_id: "scan".to_string(),
                integration: 0,
                valid_channels: 8,
                valid_frames: 128,
                residual_rms: 1.0,
                generation: 1,
                retired: false,
                comments: String::new(),
            });
        });

        let summary = registry.take(0, 0).unwrap();
        assert_eq!(summary.valid_channels, 8);
    });
    assert_eq!(registry.in_flight(), 0);
}

#[test]
fn test_registry_unknown_key_returns_none() {
    let registry = InFlightRegistry::new();
    assert!(registry.take(9, 9).is_none());
}
