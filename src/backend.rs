//! The seam between the probes and whatever is being measured.
//!
//! Probes only describe *what* to measure (a [`Pattern`], or a false-sharing
//! layout); a [`Backend`] turns that into samples. [`Hardware`] runs the real
//! pointer chase over an anonymous mapping, [`crate::sim::SimulatedCache`] answers
//! from a cache model so the inference logic can be checked against known geometry.
use log::debug;

use crate::chain::{Pattern, SLOT_BYTES};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::platform::{self, MemoryRegion};
use crate::pool::WorkerPool;
use crate::stats::SampleSet;
use crate::timing;

pub trait Backend {
    /// Bytes of measurement region patterns may span.
    fn region_size(&self) -> usize;

    /// Install `pattern` and take `repeats` latency samples (ns per access) over it.
    fn sample_chain(&mut self, pattern: &Pattern, repeats: usize) -> Result<SampleSet>;

    /// Threads available for contention runs.
    fn contention_workers(&self) -> usize;

    /// Take `repeats` timings (ns per write) of every worker incrementing its own slot,
    /// slots `stride` bytes apart.
    fn sample_contention(&mut self, stride: usize, repeats: usize) -> Result<SampleSet>;
}

/// Reject patterns that would write past the end of the region.
pub fn check_fits(pattern: &Pattern, region: usize) -> Result<()> {
    let needed = pattern.span();
    if needed > region {
        return Err(Error::PatternOutOfBounds {
            needed,
            available: region,
        });
    }
    Ok(())
}

/// Measures the machine this process runs on.
pub struct Hardware {
    region: MemoryRegion,
    pool: WorkerPool,
    iterations: usize,
    max_warmup: usize,
    writes_per_worker: usize,
}

impl Hardware {
    /// Map the measurement region and size the contention pool from `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let region = MemoryRegion::allocate(config.region_bytes)?;
        let workers = platform::hardware_threads().min(config.false_sharing.max_workers);
        Ok(Self {
            region,
            pool: WorkerPool::new(workers),
            iterations: config.iterations,
            max_warmup: config.max_warmup,
            writes_per_worker: config.false_sharing.writes_per_worker,
        })
    }

    /// Write the chain's links into the region; returns the first slot.
    fn install(&mut self, pattern: &Pattern) -> Result<*const usize> {
        check_fits(pattern, self.region.len())?;
        let base = self.region.as_mut_ptr();
        for (offset, next) in pattern.links() {
            debug_assert!(offset % SLOT_BYTES == 0);
            // SAFETY: check_fits guarantees offset + SLOT_BYTES <= region length, and the
            // region base is page aligned so slot-aligned offsets are usize aligned
            unsafe {
                let slot = base.add(offset) as *mut usize;
                slot.write(base.add(next) as usize);
            }
        }
        let first = pattern.offsets()[0];
        // SAFETY: first is in bounds per check_fits
        Ok(unsafe { self.region.as_ptr().add(first) } as *const usize)
    }
}

impl Backend for Hardware {
    fn region_size(&self) -> usize {
        self.region.len()
    }

    fn sample_chain(&mut self, pattern: &Pattern, repeats: usize) -> Result<SampleSet> {
        let start = self.install(pattern)?;
        let warmup = pattern.len().min(self.max_warmup);
        let samples: Vec<f64> = (0..repeats.max(1))
            // SAFETY: install() just closed the chain over the region, which `self`
            // keeps alive and unmodified for the duration of the loop
            .map(|_| unsafe { timing::chase(start, warmup, self.iterations) })
            .collect();
        debug!("chain of {} slots: samples {:.3?}", pattern.len(), samples);
        SampleSet::new(samples).ok_or(Error::InvalidConfig("repeats must be at least 1".into()))
    }

    fn contention_workers(&self) -> usize {
        self.pool.workers()
    }

    fn sample_contention(&mut self, stride: usize, repeats: usize) -> Result<SampleSet> {
        let writes = self.writes_per_worker.max(1);
        let samples = (0..repeats.max(1))
            .map(|_| {
                self.pool
                    .run_contended(stride, writes)
                    .map(|elapsed| elapsed.as_nanos() as f64 / writes as f64)
            })
            .collect::<Result<Vec<f64>>>()?;
        debug!(
            "contention at stride {stride} with {} workers: samples {:.3?}",
            self.pool.workers(),
            samples
        );
        SampleSet::new(samples).ok_or(Error::InvalidConfig("repeats must be at least 1".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainBuilder;

    fn small_config() -> Config {
        Config {
            region_bytes: 8 << 20,
            iterations: 4_096,
            ..Config::default()
        }
    }

    #[test]
    fn hardware_samples_a_chain() {
        let mut hw = Hardware::new(&small_config()).unwrap();
        let pattern = ChainBuilder::new(1).shuffled(256, 64);
        let set = hw.sample_chain(&pattern, 3).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.median() >= 0.0);
    }

    #[test]
    fn oversized_pattern_is_rejected() {
        let mut hw = Hardware::new(&small_config()).unwrap();
        let pattern = ChainBuilder::new(1).conflict_ring(4, 4 << 20);
        let err = hw.sample_chain(&pattern, 1).unwrap_err();
        assert!(matches!(err, Error::PatternOutOfBounds { .. }));
    }
}
