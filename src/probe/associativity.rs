//! Conflict-set associativity probe.
//!
//! `C` slots exactly one capacity apart all index the same set under modulo
//! indexing. Up to the associativity they coexist and every step hits; one more
//! and the set thrashes.
use log::{info, warn};

use super::{Estimate, median_latency};
use crate::backend::Backend;
use crate::chain::ChainBuilder;
use crate::config::{AssociativityConfig, Config};
use crate::detect::Series;
use crate::error::{Error, Result};

pub struct AssociativityProbe {
    config: AssociativityConfig,
    repeats: usize,
    chains: ChainBuilder,
}

impl AssociativityProbe {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.associativity.clone(),
            repeats: config.repeats,
            chains: ChainBuilder::new(config.seed),
        }
    }

    pub fn detect(
        &self,
        backend: &mut dyn Backend,
        line_size: usize,
        capacity: usize,
    ) -> Result<Estimate> {
        let cfg = &self.config;
        // the largest ring must fit the region; shrink the sweep rather than overrun it
        let max_ways = cfg
            .max_ways
            .min(backend.region_size().saturating_sub(line_size) / capacity.max(1));
        if max_ways < 2 {
            return Err(Error::PatternOutOfBounds {
                needed: 2 * capacity,
                available: backend.region_size(),
            });
        }
        info!("[associativity] conflict sets of 1..={max_ways} slots, {capacity} B apart");

        let mut series = Series::new();
        for count in 1..=max_ways {
            let pattern = self.chains.conflict_ring(count, capacity);
            let latency = median_latency(backend, &pattern, self.repeats)?;
            info!("  C={count:>2}: {latency:>8.3} ns/access");
            series.push(count, latency);
        }

        match cfg.rule.first(&series) {
            Some(jump) => {
                info!(
                    "  C={} is {:.2}x the baseline of {:.3} ns and holds at the next count",
                    jump.param,
                    jump.ratio(),
                    jump.baseline
                );
                Ok(Estimate::measured(jump.last_flat_param))
            }
            None => {
                warn!(
                    "  no persistent conflict jump, assuming {}-way (low confidence)",
                    cfg.fallback
                );
                Ok(Estimate::fallback(cfg.fallback))
            }
        }
    }
}
