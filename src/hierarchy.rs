//! Joint stride x way sweep that reconstructs the cache hierarchy.
//!
//! A ring of `S` slots spaced `H` bytes apart puts `S` lines into as few sets as
//! `H` allows. Once `H` reaches a level's set stride (capacity / ways) all `S`
//! slots share one set of that level, and latency jumps right after `S = ways`.
//! The set of jump positions therefore changes as `H` grows past each level's set
//! stride and stops changing once `H` is past the last one.
//!
//! 1. **Detection** records the jump set for each doubling of `H`.
//! 2. **Reconstruction** walks the jump sets from the largest `H` down: a jump at
//!    `S` that disappears when `H` halves belongs to a level of `S` ways whose set
//!    stride is the larger `H`, i.e. capacity `H * S`.
//! 3. **Disambiguation** finds the line size of the smallest level by skewing the
//!    set stride by an offset `L`: while `L` is within one line every set still
//!    takes part, past it only every `L / line`-th set does and rings thrash
//!    earlier.
use std::collections::BTreeSet;

use log::{info, warn};

use crate::backend::Backend;
use crate::chain::ChainBuilder;
use crate::config::{Config, HierarchyConfig};
use crate::detect::Series;
use crate::engine::CacheLevelEstimate;
use crate::error::{Error, Result};
use crate::format_size_fixed_int;
use crate::probe::{Estimate, median_latency};

/// Jump positions found at one stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrideSweep {
    pub stride: usize,
    /// Ring sizes after which latency jumped.
    pub jumps: BTreeSet<usize>,
}

/// A cache level isolated by reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level {
    pub capacity: usize,
    pub associativity: usize,
}

pub struct HierarchyReconstructor {
    config: HierarchyConfig,
    repeats: usize,
    chains: ChainBuilder,
}

impl HierarchyReconstructor {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.hierarchy.clone(),
            repeats: config.repeats,
            chains: ChainBuilder::new(config.seed),
        }
    }

    /// Run all three phases and return the smallest level.
    pub fn run(&self, backend: &mut dyn Backend) -> Result<CacheLevelEstimate> {
        let sweeps = self.detect_levels(backend)?;
        let levels = reconstruct(&sweeps);
        let l1 = levels.first().copied().ok_or(Error::AbortedReconstruction {
            strides: sweeps.len(),
        })?;
        info!(
            "  L1 candidate: {} {}-way",
            format_size_fixed_int(l1.capacity as u64).trim(),
            l1.associativity
        );

        let line = self.detect_line(backend, l1)?;
        Ok(CacheLevelEstimate {
            line_size: line,
            capacity: Estimate::measured(l1.capacity),
            associativity: Estimate::measured(l1.associativity),
        })
    }

    /// Phase 1: jump sets per stride until the pattern stabilizes.
    pub fn detect_levels(&self, backend: &mut dyn Backend) -> Result<Vec<StrideSweep>> {
        let cfg = &self.config;
        let max_stride = backend.region_size() / cfg.max_ways;
        info!(
            "[hierarchy / detection] strides {} B..{} B, rings of 1..={} slots",
            cfg.start_stride, max_stride, cfg.max_ways
        );

        let mut sweeps: Vec<StrideSweep> = Vec::new();
        let mut stride = cfg.start_stride;
        while stride < max_stride {
            info!("  stride (H) = {stride:>9} B");
            let mut series = Series::new();
            for count in 1..=cfg.max_ways {
                let pattern = self.chains.conflict_ring(count, stride);
                let latency = median_latency(backend, &pattern, self.repeats)?;
                let delta = series.points().last().map_or(0.0, |p| latency - p.value);
                info!("    S={count:>2} time={latency:>8.3} ns  delta={delta:>7.3} ns");
                series.push(count, latency);
            }

            let jumps: BTreeSet<usize> = cfg
                .rule
                .all(&series)
                .iter()
                .map(|jump| jump.last_flat_param)
                .collect();
            info!("    jumps after S={jumps:?}");

            let stable = stride >= cfg.min_stable_stride
                && sweeps.last().is_some_and(|last| last.jumps == jumps);
            if stable {
                info!("  pattern stabilized at {stride} B");
                break;
            }
            sweeps.push(StrideSweep { stride, jumps });
            stride *= 2;
        }

        Ok(sweeps)
    }

    /// Phase 3: the per-set stride offset at which the first-jump trend inverts.
    pub fn detect_line(&self, backend: &mut dyn Backend, level: Level) -> Result<Estimate> {
        let cfg = &self.config;
        let set_stride = level.capacity / level.associativity.max(1);
        let max_ring = (level.capacity / cfg.min_line).max(2);
        let rings: Vec<usize> = std::iter::successors(Some(1usize), |&s| s.checked_mul(2))
            .take_while(|&s| s <= max_ring)
            .collect();
        info!(
            "[hierarchy / line size] set stride {set_stride} B, offsets {:?}",
            cfg.line_offsets
        );

        let mut first_jumps = Vec::with_capacity(cfg.line_offsets.len());
        for &offset in &cfg.line_offsets {
            let spacing = set_stride + offset;
            if spacing * max_ring + spacing > backend.region_size() {
                warn!("  offset {offset} B: rings no longer fit the region, stopping");
                break;
            }
            let mut series = Series::new();
            for &ring in &rings {
                let pattern = self.chains.conflict_ring(ring + 1, spacing);
                let latency = median_latency(backend, &pattern, self.repeats)?;
                info!("    L={offset:>5} B  S={ring:>5} time={latency:>8.3} ns");
                series.push(ring, latency);
            }
            let first_jump = cfg.rule.first(&series).map(|jump| jump.param);
            info!("  L={offset:>5} B  first_jump={first_jump:?}");
            first_jumps.push((offset, first_jump));
        }

        match plateau_end(&first_jumps) {
            Some(line) => {
                info!("  first-jump trend turns after L={line} B -> line size {line} B");
                Ok(Estimate::measured(line))
            }
            None => {
                warn!(
                    "  first-jump trend never turned, assuming {} B line (low confidence)",
                    cfg.fallback_line
                );
                Ok(Estimate::fallback(cfg.fallback_line))
            }
        }
    }
}

/// Phase 2: attribute each jump position to the stride at which it first appeared.
///
/// Levels are returned smallest capacity first.
pub fn reconstruct(sweeps: &[StrideSweep]) -> Vec<Level> {
    info!("[hierarchy / reconstruction]");
    let Some(last) = sweeps.last() else {
        return Vec::new();
    };

    let mut active = last.jumps.clone();
    let mut levels = Vec::new();
    for pair in sweeps.windows(2).rev() {
        let (smaller, larger) = (&pair[0], &pair[1]);
        let vanished: Vec<usize> = active
            .iter()
            .copied()
            .filter(|s| !smaller.jumps.contains(s))
            .collect();
        for ways in vanished {
            let level = Level {
                capacity: larger.stride * ways,
                associativity: ways,
            };
            info!(
                "  level: stride={} B assoc={} cap~{}",
                larger.stride,
                ways,
                format_size_fixed_int(level.capacity as u64).trim()
            );
            levels.push(level);
            active.remove(&ways);
        }
    }

    levels.sort();
    levels
}

/// Last offset before the first-jump ring size first drops below its predecessor.
///
/// An offset whose sweep never jumped counts as beyond every measured ring.
fn plateau_end(first_jumps: &[(usize, Option<usize>)]) -> Option<usize> {
    let rank = |jump: Option<usize>| jump.unwrap_or(usize::MAX);
    first_jumps
        .windows(2)
        .find(|w| rank(w[1].1) < rank(w[0].1))
        .map(|w| w[0].0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(stride: usize, jumps: &[usize]) -> StrideSweep {
        StrideSweep {
            stride,
            jumps: jumps.iter().copied().collect(),
        }
    }

    #[test]
    fn reconstructs_two_levels() {
        // L1 32 KiB 8-way (set stride 4 KiB), L2 1 MiB 16-way (set stride 64 KiB)
        let sweeps = vec![
            sweep(1024, &[]),
            sweep(2048, &[16, 17]),
            sweep(4096, &[8]),
            sweep(8192, &[8]),
            sweep(32768, &[8]),
            sweep(65536, &[8, 16]),
            sweep(131072, &[8, 16]),
        ];
        let levels = reconstruct(&sweeps);
        assert_eq!(
            levels,
            vec![
                Level { capacity: 32 * 1024, associativity: 8 },
                Level { capacity: 1024 * 1024, associativity: 16 },
            ]
        );
    }

    #[test]
    fn no_boundary_means_no_levels() {
        let sweeps = vec![sweep(32, &[]), sweep(64, &[]), sweep(128, &[])];
        assert!(reconstruct(&sweeps).is_empty());
        assert!(reconstruct(&[]).is_empty());
    }

    #[test]
    fn plateau_end_is_last_offset_before_decrease() {
        let trend = [
            (16, Some(512)),
            (32, Some(512)),
            (64, Some(512)),
            (128, Some(256)),
            (256, Some(128)),
        ];
        assert_eq!(plateau_end(&trend), Some(64));
    }

    #[test]
    fn flat_trend_has_no_plateau_end() {
        let trend = [(16, Some(512)), (32, Some(512)), (64, None)];
        assert_eq!(plateau_end(&trend), None);
    }
}
