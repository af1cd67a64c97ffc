//! Synthetic hardware: a set-associative LRU cache in front of flat memory,
//! optionally backed by a larger outer level that sees only its misses.
//!
//! Latency for a chain is its steady-state cost: the chain is walked twice to warm
//! the caches, then one more cycle is counted. Each access costs `hit_ns` on a
//! first-level hit, `miss_ns` when the first level misses, and the outer level's
//! `miss_ns` when both miss. Contention follows a simple model where each extra
//! writer sharing a line adds `sharing_penalty` to the cost of a write. Optional
//! jitter scales each sample by a uniform factor in `1 +- jitter`, from a seeded
//! generator so runs are reproducible.
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::backend::{Backend, check_fits};
use crate::chain::Pattern;
use crate::error::{Error, Result};
use crate::stats::SampleSet;

/// Second level behind the simulated cache, sharing its line size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OuterLevel {
    pub capacity: usize,
    pub associativity: usize,
    /// Cost of an access that misses this level too.
    pub miss_ns: f64,
}

/// Per-set LRU state, most recently used line at the back.
struct LruSets {
    ways: usize,
    sets: Vec<Vec<usize>>,
}

impl LruSets {
    fn new(capacity: usize, line_size: usize, ways: usize) -> Self {
        let sets = capacity / (line_size * ways);
        Self {
            ways,
            sets: vec![Vec::with_capacity(ways); sets],
        }
    }

    /// Touch `line`; true on a hit.
    fn access(&mut self, line: usize) -> bool {
        let count = self.sets.len();
        let set = &mut self.sets[line % count];
        let hit = match set.iter().position(|&l| l == line) {
            Some(pos) => {
                set.remove(pos);
                true
            }
            None => {
                if set.len() == self.ways {
                    set.remove(0);
                }
                false
            }
        };
        set.push(line);
        hit
    }
}

/// Geometry and cost model of the simulated cache.
#[derive(Debug, Clone)]
pub struct SimulatedCache {
    pub line_size: usize,
    pub capacity: usize,
    pub associativity: usize,
    pub hit_ns: f64,
    pub miss_ns: f64,
    /// Nanoseconds per write with no sharing.
    pub write_ns: f64,
    /// Relative slowdown per additional writer on the same line.
    pub sharing_penalty: f64,
    pub workers: usize,
    pub region_size: usize,
    pub outer: Option<OuterLevel>,
    jitter: f64,
    rng: Xoshiro256PlusPlus,
}

impl SimulatedCache {
    /// Noise-free cache with 1 ns hits, 10 ns misses and 8 contention workers.
    pub fn new(line_size: usize, capacity: usize, associativity: usize) -> Self {
        assert!(line_size.is_power_of_two());
        assert!(capacity % (line_size * associativity) == 0);
        Self {
            line_size,
            capacity,
            associativity,
            hit_ns: 1.0,
            miss_ns: 10.0,
            write_ns: 2.0,
            sharing_penalty: 10.0,
            workers: 8,
            region_size: 256 << 20,
            outer: None,
            jitter: 0.0,
            rng: Xoshiro256PlusPlus::seed_from_u64(0),
        }
    }

    /// Scale every sample by a uniform random factor in `1 +- fraction`.
    pub fn with_jitter(mut self, fraction: f64, seed: u64) -> Self {
        self.jitter = fraction;
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Put an outer level behind this one; its misses cost `miss_ns`.
    pub fn with_outer_level(mut self, capacity: usize, associativity: usize, miss_ns: f64) -> Self {
        assert!(capacity % (self.line_size * associativity) == 0);
        self.outer = Some(OuterLevel {
            capacity,
            associativity,
            miss_ns,
        });
        self
    }

    /// Steady-state miss rate of walking `pattern` cyclically.
    pub fn miss_rate(&self, pattern: &Pattern) -> f64 {
        self.miss_rates(pattern).0
    }

    /// Fractions of accesses that miss the first level, and that miss every level.
    fn miss_rates(&self, pattern: &Pattern) -> (f64, f64) {
        let mut first = LruSets::new(self.capacity, self.line_size, self.associativity);
        let mut outer = self
            .outer
            .map(|o| LruSets::new(o.capacity, self.line_size, o.associativity));
        let (mut first_misses, mut all_misses) = (0usize, 0usize);

        for pass in 0..3 {
            for &offset in pattern.offsets() {
                let line = offset / self.line_size;
                if first.access(line) {
                    continue;
                }
                let outer_hit = outer.as_mut().is_some_and(|o| o.access(line));
                if pass == 2 {
                    first_misses += 1;
                    if outer.is_some() && !outer_hit {
                        all_misses += 1;
                    }
                }
            }
        }
        let n = pattern.len() as f64;
        (first_misses as f64 / n, all_misses as f64 / n)
    }

    fn latency(&self, pattern: &Pattern) -> f64 {
        let (first, all) = self.miss_rates(pattern);
        let outer_extra = self.outer.map_or(0.0, |o| o.miss_ns - self.miss_ns);
        self.hit_ns + first * (self.miss_ns - self.hit_ns) + all * outer_extra
    }

    fn jittered(&mut self, value: f64, repeats: usize) -> Option<SampleSet> {
        let samples = (0..repeats.max(1))
            .map(|_| {
                if self.jitter > 0.0 {
                    value * (1.0 + self.rng.random_range(-self.jitter..=self.jitter))
                } else {
                    value
                }
            })
            .collect();
        SampleSet::new(samples)
    }
}

impl Backend for SimulatedCache {
    fn region_size(&self) -> usize {
        self.region_size
    }

    fn sample_chain(&mut self, pattern: &Pattern, repeats: usize) -> Result<SampleSet> {
        check_fits(pattern, self.region_size)?;
        let latency = self.latency(pattern);
        self.jittered(latency, repeats)
            .ok_or(Error::InvalidConfig("repeats must be at least 1".into()))
    }

    fn contention_workers(&self) -> usize {
        self.workers
    }

    fn sample_contention(&mut self, stride: usize, repeats: usize) -> Result<SampleSet> {
        let per_line = (self.line_size / stride).clamp(1, self.workers.max(1));
        let cost = self.write_ns * (1.0 + self.sharing_penalty * (per_line - 1) as f64);
        self.jittered(cost, repeats)
            .ok_or(Error::InvalidConfig("repeats must be at least 1".into()))
    }
}
