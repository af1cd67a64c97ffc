//! Working-set capacity probe.
//!
//! One random chain per ladder size, covering every line of the working set. While
//! the set fits, each step is a hit; once it doesn't, the cyclic walk evicts lines
//! before they come round again and latency climbs. The capacity is the last size
//! before the first qualifying climb.
use log::{info, warn};

use super::{Estimate, median_latency};
use crate::backend::Backend;
use crate::chain::{ChainBuilder, MIN_CHAIN_LEN};
use crate::config::{CapacityConfig, Config};
use crate::detect::Series;
use crate::error::Result;
use crate::format_size_fixed_int;

pub struct CapacityProbe {
    config: CapacityConfig,
    repeats: usize,
    chains: ChainBuilder,
}

impl CapacityProbe {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.capacity.clone(),
            repeats: config.repeats,
            chains: ChainBuilder::new(config.seed),
        }
    }

    /// Sweep the ladder with one slot per `line_size` bytes.
    pub fn detect(&self, backend: &mut dyn Backend, line_size: usize) -> Result<Estimate> {
        let cfg = &self.config;
        info!(
            "[capacity] {} working-set sizes, {line_size} B granularity",
            cfg.ladder.len()
        );

        let mut series = Series::new();
        for &size in &cfg.ladder {
            // a clamped chain would cover more than `size` bytes
            if size < MIN_CHAIN_LEN * line_size {
                info!(
                    "  {}: below {MIN_CHAIN_LEN} lines, skipped",
                    format_size_fixed_int(size as u64)
                );
                continue;
            }
            let pattern = self.chains.shuffled(size / line_size, line_size);
            let latency = median_latency(backend, &pattern, self.repeats)?;
            info!(
                "  {} ({:>6} slots): {latency:>8.3} ns/access",
                format_size_fixed_int(size as u64),
                pattern.len()
            );
            series.push(size, latency);
        }

        match cfg.rule.first(&series) {
            Some(jump) => {
                info!(
                    "  latency rose {:.3} -> {:.3} ns ({:.2}x) past {}, threshold {:.0}%",
                    jump.reference,
                    jump.value,
                    jump.ratio(),
                    format_size_fixed_int(jump.last_flat_param as u64).trim(),
                    cfg.rule.relative * 100.0
                );
                Ok(Estimate::measured(jump.last_flat_param))
            }
            None => {
                warn!(
                    "  no capacity boundary in the ladder, assuming {} (low confidence)",
                    format_size_fixed_int(cfg.fallback as u64).trim()
                );
                Ok(Estimate::fallback(cfg.fallback))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Pattern;
    use crate::probe::Confidence;
    use crate::stats::SampleSet;

    /// Same latency for every pattern.
    struct Flat;

    impl Backend for Flat {
        fn region_size(&self) -> usize {
            usize::MAX
        }
        fn sample_chain(&mut self, _: &Pattern, repeats: usize) -> Result<SampleSet> {
            Ok(SampleSet::new(vec![1.2; repeats]).unwrap())
        }
        fn contention_workers(&self) -> usize {
            1
        }
        fn sample_contention(&mut self, _: usize, repeats: usize) -> Result<SampleSet> {
            Ok(SampleSet::new(vec![1.0; repeats]).unwrap())
        }
    }

    #[test]
    fn flat_sweep_falls_back_to_default() {
        let estimate = CapacityProbe::new(&Config::default())
            .detect(&mut Flat, 64)
            .unwrap();
        assert_eq!(estimate.value, 32 * 1024);
        assert_eq!(estimate.confidence, Confidence::Fallback);
    }

    /// Records the slot count of every sampled chain.
    struct Recording {
        sim: crate::sim::SimulatedCache,
        lens: Vec<usize>,
    }

    impl Backend for Recording {
        fn region_size(&self) -> usize {
            self.sim.region_size()
        }
        fn sample_chain(&mut self, pattern: &Pattern, repeats: usize) -> Result<SampleSet> {
            self.lens.push(pattern.len());
            self.sim.sample_chain(pattern, repeats)
        }
        fn contention_workers(&self) -> usize {
            self.sim.contention_workers()
        }
        fn sample_contention(&mut self, stride: usize, repeats: usize) -> Result<SampleSet> {
            self.sim.sample_contention(stride, repeats)
        }
    }

    #[test]
    fn wide_lines_skip_rungs_too_small_for_a_chain() {
        let mut backend = Recording {
            sim: crate::sim::SimulatedCache::new(512, 32 * 1024, 8),
            lens: Vec::new(),
        };
        let config = Config::default();
        let estimate = CapacityProbe::new(&config)
            .detect(&mut backend, 512)
            .unwrap();
        assert_eq!(estimate, Estimate::measured(32 * 1024));

        // the 1 KiB rung would need a 2-slot chain
        let expected: Vec<usize> = config
            .capacity
            .ladder
            .iter()
            .filter(|&&size| size >= MIN_CHAIN_LEN * 512)
            .map(|&size| size / 512)
            .collect();
        assert_eq!(backend.lens, expected);
    }

    #[test]
    fn finds_non_power_of_two_capacity() {
        // 48 KiB, 12-way: 64 sets of 64 B lines
        let mut sim = crate::sim::SimulatedCache::new(64, 48 * 1024, 12);
        let estimate = CapacityProbe::new(&Config::default())
            .detect(&mut sim, 64)
            .unwrap();
        assert_eq!(estimate, Estimate::measured(48 * 1024));
    }
}
