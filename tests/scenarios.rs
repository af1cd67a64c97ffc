//! End-to-end runs of the engine against synthetic hardware with known geometry.
use l1_probe_rs::backend::Backend;
use l1_probe_rs::chain::Pattern;
use l1_probe_rs::config::{LineStrategyKind, Strategy};
use l1_probe_rs::hierarchy::{HierarchyReconstructor, Level, reconstruct};
use l1_probe_rs::probe::{CapacityProbe, Confidence};
use l1_probe_rs::sim::SimulatedCache;
use l1_probe_rs::stats::SampleSet;
use l1_probe_rs::{Config, Engine, Error, Result};

const LINE: usize = 64;
const CAPACITY: usize = 32 * 1024;
const WAYS: usize = 8;

fn config(strategy: Strategy, line_strategy: LineStrategyKind) -> Config {
    Config {
        strategy,
        line_strategy,
        ..Config::default()
    }
}

fn run(config: Config, backend: &mut dyn Backend) -> l1_probe_rs::Report {
    Engine::new(config).unwrap().run(backend).unwrap()
}

#[test]
fn noise_free_stride_scan_recovers_geometry() {
    let mut sim = SimulatedCache::new(LINE, CAPACITY, WAYS);
    let report = run(
        config(Strategy::Probes, LineStrategyKind::StrideScan),
        &mut sim,
    );
    assert_eq!(report.level.triple(), (LINE, CAPACITY, WAYS));
    assert_eq!(report.level.confidence(), Confidence::Measured);
    assert!(report.verdict.is_consistent());
}

#[test]
fn noise_free_false_sharing_recovers_geometry() {
    let mut sim = SimulatedCache::new(LINE, CAPACITY, WAYS);
    let report = run(
        config(Strategy::Probes, LineStrategyKind::FalseSharing),
        &mut sim,
    );
    assert_eq!(report.level.triple(), (LINE, CAPACITY, WAYS));
    assert_eq!(report.level.confidence(), Confidence::Measured);
}

#[test]
fn noise_free_hierarchy_recovers_geometry() {
    let mut sim = SimulatedCache::new(LINE, CAPACITY, WAYS);
    let report = run(
        config(Strategy::Hierarchy, LineStrategyKind::StrideScan),
        &mut sim,
    );
    assert_eq!(report.level.triple(), (LINE, CAPACITY, WAYS));
    assert!(report.verdict.is_consistent());
}

#[test]
fn hierarchy_separates_two_levels() {
    // 512 KiB 16-way second level: set stride 32 KiB against the first level's 4 KiB
    let mut sim = SimulatedCache::new(LINE, CAPACITY, WAYS).with_outer_level(512 * 1024, 16, 40.0);
    let config = config(Strategy::Hierarchy, LineStrategyKind::StrideScan);

    let sweeps = HierarchyReconstructor::new(&config)
        .detect_levels(&mut sim)
        .unwrap();
    assert_eq!(
        reconstruct(&sweeps),
        vec![
            Level { capacity: CAPACITY, associativity: WAYS },
            Level { capacity: 512 * 1024, associativity: 16 },
        ]
    );

    let report = run(config, &mut sim);
    assert_eq!(report.level.triple(), (LINE, CAPACITY, WAYS));
    assert_eq!(report.level.confidence(), Confidence::Measured);
}

#[test]
fn direct_mapped_cache_is_recognized() {
    let mut sim = SimulatedCache::new(LINE, 8 * 1024, 1);
    let report = run(Config::default(), &mut sim);
    assert_eq!(report.level.triple(), (LINE, 8 * 1024, 1));
    assert_eq!(report.level.associativity.confidence, Confidence::Measured);
}

#[test]
fn jittered_probes_still_converge() {
    for (seed, line_strategy) in [
        (11, LineStrategyKind::StrideScan),
        (12, LineStrategyKind::FalseSharing),
        (13, LineStrategyKind::StrideScan),
    ] {
        let mut sim = SimulatedCache::new(LINE, CAPACITY, WAYS).with_jitter(0.05, seed);
        let report = run(config(Strategy::Probes, line_strategy), &mut sim);
        assert_eq!(
            report.level.triple(),
            (LINE, CAPACITY, WAYS),
            "seed {seed}, {line_strategy:?}"
        );
    }
}

#[test]
fn other_geometries_are_recovered() {
    for (line, capacity, ways) in [(32, 16 * 1024, 4), (64, 64 * 1024, 16), (128, 32 * 1024, 8)] {
        let mut sim = SimulatedCache::new(line, capacity, ways);
        let report = run(Config::default(), &mut sim);
        assert_eq!(report.level.triple(), (line, capacity, ways));
    }
}

#[test]
fn flat_capacity_sweep_falls_back_without_aborting() {
    // 4 MiB cache: nothing in the 1 KiB..1 MiB ladder ever spills
    let mut sim = SimulatedCache::new(LINE, 4 << 20, WAYS);
    let estimate = CapacityProbe::new(&Config::default())
        .detect(&mut sim, LINE)
        .unwrap();
    assert_eq!(estimate.value, 32 * 1024);
    assert_eq!(estimate.confidence, Confidence::Fallback);

    let report = run(Config::default(), &mut sim);
    assert_eq!(report.level.capacity.confidence, Confidence::Fallback);
    assert_eq!(report.level.confidence(), Confidence::Fallback);
}

/// Every pattern costs the same.
struct Featureless;

impl Backend for Featureless {
    fn region_size(&self) -> usize {
        64 << 20
    }
    fn sample_chain(&mut self, _: &Pattern, repeats: usize) -> Result<SampleSet> {
        Ok(SampleSet::new(vec![1.0; repeats]).unwrap())
    }
    fn contention_workers(&self) -> usize {
        4
    }
    fn sample_contention(&mut self, _: usize, repeats: usize) -> Result<SampleSet> {
        Ok(SampleSet::new(vec![1.0; repeats]).unwrap())
    }
}

#[test]
fn featureless_machine_aborts_hierarchy() {
    let engine = Engine::new(config(Strategy::Hierarchy, LineStrategyKind::StrideScan)).unwrap();
    let err = engine.run(&mut Featureless).unwrap_err();
    assert!(matches!(err, Error::AbortedReconstruction { .. }));
}

#[test]
fn featureless_machine_degrades_single_probes() {
    for line_strategy in [LineStrategyKind::StrideScan, LineStrategyKind::FalseSharing] {
        let report = run(config(Strategy::Probes, line_strategy), &mut Featureless);
        assert_eq!(report.level.triple(), (64, 32 * 1024, 8));
        assert_eq!(report.level.line_size.confidence, Confidence::Fallback);
        assert_eq!(report.level.capacity.confidence, Confidence::Fallback);
        assert_eq!(report.level.associativity.confidence, Confidence::Fallback);
    }
}
