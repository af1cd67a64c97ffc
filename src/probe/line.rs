//! Line-size probes.
use log::{info, warn};

use super::{Estimate, median_latency};
use crate::backend::Backend;
use crate::chain::ChainBuilder;
use crate::config::{Config, FalseSharingConfig, LineScanConfig};
use crate::detect::{Series, first_dominant};
use crate::error::Result;

/// A way of finding the cache line size.
pub trait LineSizeStrategy {
    fn name(&self) -> &'static str;

    fn detect(&self, backend: &mut dyn Backend) -> Result<Estimate>;
}

/// Times pairs of accesses `stride` bytes apart. While the stride is below the
/// line size the second access of each pair hits the line the first one just
/// filled; from the line size on, both miss, and latency steps up.
pub struct StrideScan {
    config: LineScanConfig,
    repeats: usize,
    chains: ChainBuilder,
}

impl StrideScan {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.line_scan.clone(),
            repeats: config.repeats,
            chains: ChainBuilder::new(config.seed),
        }
    }
}

impl LineSizeStrategy for StrideScan {
    fn name(&self) -> &'static str {
        "stride scan"
    }

    fn detect(&self, backend: &mut dyn Backend) -> Result<Estimate> {
        let cfg = &self.config;
        info!(
            "[line size / stride scan] {} groups spaced {} B apart",
            cfg.groups, cfg.group_spacing
        );

        let mut series = Series::new();
        for &stride in &cfg.strides {
            let pattern = self
                .chains
                .paired_groups(cfg.groups, cfg.group_spacing, stride);
            let latency = median_latency(backend, &pattern, self.repeats)?;
            info!("  stride {stride:>5} B: {latency:>8.3} ns/access");
            series.push(stride, latency);
        }

        match first_dominant(&series, &cfg.rule, cfg.dominance) {
            Some(jump) => {
                info!(
                    "  jump at {} B: {:.3} -> {:.3} ns ({:.2}x, threshold {:.0}%)",
                    jump.param,
                    jump.reference,
                    jump.value,
                    jump.ratio(),
                    cfg.rule.relative * 100.0
                );
                Ok(Estimate::measured(jump.param))
            }
            None => {
                warn!(
                    "  no dominant stride jump, assuming {} B line (low confidence)",
                    cfg.fallback
                );
                Ok(Estimate::fallback(cfg.fallback))
            }
        }
    }
}

/// Compares contended writes with slots `L / 2` apart against slots `L` apart.
/// The ratio peaks at the true line size: half a line packs two writers per line,
/// a full line gives each writer its own.
pub struct FalseSharing {
    config: FalseSharingConfig,
    repeats: usize,
}

impl FalseSharing {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.false_sharing.clone(),
            repeats: config.repeats,
        }
    }
}

impl LineSizeStrategy for FalseSharing {
    fn name(&self) -> &'static str {
        "false sharing"
    }

    fn detect(&self, backend: &mut dyn Backend) -> Result<Estimate> {
        let cfg = &self.config;
        let workers = backend.contention_workers();
        info!("[line size / false sharing] {workers} workers");
        if workers < 2 {
            warn!(
                "  need at least 2 hardware threads for contention, assuming {} B line (low confidence)",
                cfg.fallback
            );
            return Ok(Estimate::fallback(cfg.fallback));
        }

        let mut best: Option<(usize, f64)> = None;
        for &candidate in &cfg.candidates {
            let packed = backend
                .sample_contention(candidate / 2, self.repeats)?
                .median();
            let reference = backend.sample_contention(candidate, self.repeats)?.median();
            let ratio = packed / reference;
            info!(
                "  candidate {candidate:>5} B: packed {packed:>8.3} ns, reference {reference:>8.3} ns, ratio {ratio:.3}"
            );
            if ratio.is_finite() && best.is_none_or(|(_, r)| ratio > r) {
                best = Some((candidate, ratio));
            }
        }

        match best {
            // a ratio of ~1 everywhere means no layout ever shared a line
            Some((line, ratio)) if ratio > 1.1 => {
                info!("  maximal slowdown {ratio:.3}x at {line} B");
                Ok(Estimate::measured(line))
            }
            _ => {
                warn!(
                    "  no layout showed false sharing, assuming {} B line (low confidence)",
                    cfg.fallback
                );
                Ok(Estimate::fallback(cfg.fallback))
            }
        }
    }
}

/// Build the strategy `config` selects.
pub fn from_config(config: &Config) -> Box<dyn LineSizeStrategy> {
    match config.line_strategy {
        crate::config::LineStrategyKind::StrideScan => Box::new(StrideScan::new(config)),
        crate::config::LineStrategyKind::FalseSharing => Box::new(FalseSharing::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Confidence;
    use crate::sim::SimulatedCache;

    #[test]
    fn stride_scan_finds_simulated_line() {
        for line in [32, 64, 128] {
            let mut sim = SimulatedCache::new(line, 32 * 1024, 8);
            let estimate = StrideScan::new(&Config::default()).detect(&mut sim).unwrap();
            assert_eq!(estimate, Estimate::measured(line), "line {line}");
        }
    }

    #[test]
    fn false_sharing_finds_simulated_line() {
        let mut sim = SimulatedCache::new(64, 32 * 1024, 8);
        let estimate = FalseSharing::new(&Config::default()).detect(&mut sim).unwrap();
        assert_eq!(estimate, Estimate::measured(64));
    }

    #[test]
    fn false_sharing_single_thread_falls_back() {
        let mut sim = SimulatedCache::new(64, 32 * 1024, 8).with_workers(1);
        let estimate = FalseSharing::new(&Config::default()).detect(&mut sim).unwrap();
        assert_eq!(estimate.value, 64);
        assert_eq!(estimate.confidence, Confidence::Fallback);
    }
}
