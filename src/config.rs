//! Tunables for every probe.
//!
//! A [`Config`] is built once and handed by reference to each component, so two
//! engines with different settings can coexist. None of the thresholds below are
//! authoritative: they are defaults that separate hit from miss latency on common
//! desktop and server parts.
use crate::detect::{JumpRule, Reference};
use crate::error::{Error, Result};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Which pipeline the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Line size, then capacity, then associativity, each from its own sweep.
    Probes,
    /// Joint stride x way sweep that reconstructs the hierarchy, then derives line size.
    Hierarchy,
}

/// Which line-size probe [`Strategy::Probes`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStrategyKind {
    StrideScan,
    FalseSharing,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub strategy: Strategy,
    pub line_strategy: LineStrategyKind,

    /// Size of the anonymous mapping every pattern lives in (default: 256 MiB).
    pub region_bytes: usize,

    /// Samples per configuration, reduced to their median (default: 15).
    pub repeats: usize,

    /// Timed pointer-chase steps per sample (default: 400,000).
    pub iterations: usize,

    /// Upper bound on untimed warm-up steps before each sample (default: 65,536).
    pub max_warmup: usize,

    /// Seed for every randomized chain (default: `0xDEADBEEF`).
    pub seed: u64,

    /// Physical address width used to derive tag bits (default: 48).
    pub address_bits: u32,

    pub line_scan: LineScanConfig,
    pub false_sharing: FalseSharingConfig,
    pub capacity: CapacityConfig,
    pub associativity: AssociativityConfig,
    pub hierarchy: HierarchyConfig,
}

/// Stride-scan line-size probe.
#[derive(Debug, Clone)]
pub struct LineScanConfig {
    /// Candidate strides in bytes, increasing.
    pub strides: Vec<usize>,
    /// Distance between the bases of two access groups.
    pub group_spacing: usize,
    /// Number of groups in one chain.
    pub groups: usize,
    pub rule: JumpRule,
    /// The accepted jump must be this many times larger than either neighboring delta.
    pub dominance: f64,
    pub fallback: usize,
}

/// False-sharing line-size probe.
#[derive(Debug, Clone)]
pub struct FalseSharingConfig {
    /// Candidate line sizes in bytes. Each is compared against half of itself.
    pub candidates: Vec<usize>,
    pub max_workers: usize,
    pub writes_per_worker: usize,
    pub fallback: usize,
}

#[derive(Debug, Clone)]
pub struct CapacityConfig {
    /// Working-set sizes in bytes, increasing.
    pub ladder: Vec<usize>,
    pub rule: JumpRule,
    pub fallback: usize,
}

#[derive(Debug, Clone)]
pub struct AssociativityConfig {
    /// Largest conflict count tried.
    pub max_ways: usize,
    pub rule: JumpRule,
    pub fallback: usize,
}

#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    /// First stride of the sweep.
    pub start_stride: usize,
    /// Conflict counts tried per stride run from 1 to this value.
    pub max_ways: usize,
    /// The jump-set pattern only counts as stable from this stride on.
    pub min_stable_stride: usize,
    pub rule: JumpRule,
    /// Offsets added to the per-set stride during line-size disambiguation.
    pub line_offsets: Vec<usize>,
    /// Smallest line size considered; bounds the disambiguation ring length.
    pub min_line: usize,
    pub fallback_line: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::Probes,
            line_strategy: LineStrategyKind::StrideScan,
            region_bytes: 256 * MIB,
            repeats: 15,
            iterations: 400_000,
            max_warmup: 1 << 16,
            seed: 0xDEAD_BEEF,
            address_bits: 48,
            line_scan: LineScanConfig::default(),
            false_sharing: FalseSharingConfig::default(),
            capacity: CapacityConfig::default(),
            associativity: AssociativityConfig::default(),
            hierarchy: HierarchyConfig::default(),
        }
    }
}

impl Default for LineScanConfig {
    fn default() -> Self {
        Self {
            strides: doublings(8, 512),
            group_spacing: 4 * KIB,
            groups: 1024,
            rule: JumpRule {
                relative: 0.25,
                reference: Reference::Previous,
                absolute_margin: 0.25,
                baseline_points: 2,
                persistence: None,
            },
            dominance: 2.0,
            fallback: 64,
        }
    }
}

impl Default for FalseSharingConfig {
    fn default() -> Self {
        Self {
            candidates: doublings(16, 512),
            max_workers: 16,
            writes_per_worker: 200_000,
            fallback: 64,
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        let mut ladder = vec![KIB, 2 * KIB];
        // dense where L1 capacities actually live
        ladder.extend((4..=32).step_by(4).map(|k| k * KIB));
        ladder.extend((40..=64).step_by(8).map(|k| k * KIB));
        ladder.extend([80, 96, 112, 128].map(|k| k * KIB));
        ladder.extend([192, 256, 384, 512, 768, 1024].map(|k| k * KIB));
        Self {
            ladder,
            rule: JumpRule {
                relative: 0.15,
                reference: Reference::Previous,
                absolute_margin: 0.25,
                baseline_points: 3,
                persistence: None,
            },
            fallback: 32 * KIB,
        }
    }
}

impl Default for AssociativityConfig {
    fn default() -> Self {
        Self {
            max_ways: 32,
            rule: JumpRule {
                relative: 0.3,
                reference: Reference::Baseline,
                absolute_margin: 0.25,
                baseline_points: 3,
                persistence: Some(0.8),
            },
            fallback: 8,
        }
    }
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            start_stride: 32,
            max_ways: 32,
            min_stable_stride: 512 * KIB,
            rule: JumpRule {
                relative: 0.11,
                reference: Reference::Previous,
                absolute_margin: 0.05,
                baseline_points: 3,
                persistence: None,
            },
            line_offsets: doublings(16, 1024),
            min_line: 16,
            fallback_line: 64,
        }
    }
}

/// Powers of two from `from` to `to`, inclusive.
fn doublings(from: usize, to: usize) -> Vec<usize> {
    std::iter::successors(Some(from), |&v| v.checked_mul(2))
        .take_while(|&v| v <= to)
        .collect()
}

impl Config {
    /// Default config with overrides read from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Default config with overrides read through `lookup`.
    ///
    /// Recognised keys: `L1_PROBE_STRATEGY` (`probes` | `hierarchy`),
    /// `L1_PROBE_LINE_STRATEGY` (`stride` | `false-sharing`) and
    /// `L1_PROBE_REGION_MB`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("L1_PROBE_STRATEGY") {
            config.strategy = match value.trim() {
                "probes" => Strategy::Probes,
                "hierarchy" => Strategy::Hierarchy,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "L1_PROBE_STRATEGY must be 'probes' or 'hierarchy', got '{other}'"
                    )));
                }
            };
        }

        if let Some(value) = lookup("L1_PROBE_LINE_STRATEGY") {
            config.line_strategy = match value.trim() {
                "stride" => LineStrategyKind::StrideScan,
                "false-sharing" => LineStrategyKind::FalseSharing,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "L1_PROBE_LINE_STRATEGY must be 'stride' or 'false-sharing', got '{other}'"
                    )));
                }
            };
        }

        if let Some(value) = lookup("L1_PROBE_REGION_MB") {
            let mb: usize = value.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("L1_PROBE_REGION_MB is not a number: '{value}'"))
            })?;
            config.region_bytes = mb.checked_mul(MIB).ok_or_else(|| {
                Error::InvalidConfig(format!("L1_PROBE_REGION_MB too large: {mb}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a sweep meaningless or overrun the region.
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, msg: impl FnOnce() -> String) -> Result<()> {
            if ok { Ok(()) } else { Err(Error::InvalidConfig(msg())) }
        }

        check(self.repeats >= 1, || "repeats must be at least 1".into())?;
        check(self.iterations >= 8, || "iterations must be at least 8".into())?;
        check(self.address_bits <= 64, || "address_bits must be at most 64".into())?;

        check(is_increasing(&self.line_scan.strides), || {
            "line_scan.strides must be non-empty and increasing".into()
        })?;
        check(
            self.line_scan.strides.iter().all(|&s| s >= 8 && s % 8 == 0),
            || "line_scan.strides must be multiples of 8".into(),
        )?;
        let widest = self.line_scan.strides.last().copied().unwrap_or(0);
        check(widest < self.line_scan.group_spacing, || {
            "line_scan.group_spacing must exceed every stride".into()
        })?;
        check(
            self.line_scan.groups * self.line_scan.group_spacing <= self.region_bytes,
            || "line_scan groups do not fit the region".into(),
        )?;

        check(is_increasing(&self.false_sharing.candidates), || {
            "false_sharing.candidates must be non-empty and increasing".into()
        })?;
        check(
            self.false_sharing.candidates.iter().all(|&c| c >= 16 && c % 16 == 0),
            || "false_sharing.candidates must be multiples of 16".into(),
        )?;

        check(is_increasing(&self.capacity.ladder), || {
            "capacity.ladder must be non-empty and increasing".into()
        })?;
        let largest = self.capacity.ladder.last().copied().unwrap_or(0);
        check(largest <= self.region_bytes, || {
            "capacity.ladder exceeds the region".into()
        })?;

        check(self.associativity.max_ways >= 2, || {
            "associativity.max_ways must be at least 2".into()
        })?;
        check(self.hierarchy.max_ways >= 2, || {
            "hierarchy.max_ways must be at least 2".into()
        })?;
        check(
            self.hierarchy.start_stride >= 8 && self.hierarchy.start_stride % 8 == 0,
            || "hierarchy.start_stride must be a multiple of 8".into(),
        )?;
        check(is_increasing(&self.hierarchy.line_offsets), || {
            "hierarchy.line_offsets must be non-empty and increasing".into()
        })?;
        check(
            self.hierarchy.line_offsets.iter().all(|&l| l % 8 == 0),
            || "hierarchy.line_offsets must be multiples of 8".into(),
        )?;
        check(self.hierarchy.min_line >= 8, || {
            "hierarchy.min_line must be at least 8".into()
        })?;

        Ok(())
    }
}

fn is_increasing(values: &[usize]) -> bool {
    !values.is_empty() && values.windows(2).all(|w| w[0] < w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn capacity_ladder_is_dense_around_l1_sizes() {
        let ladder = CapacityConfig::default().ladder;
        assert_eq!(ladder.first(), Some(&KIB));
        assert_eq!(ladder.last(), Some(&MIB));
        for kb in [24, 28, 32, 40, 48] {
            assert!(ladder.contains(&(kb * KIB)), "{kb} KiB missing");
        }
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("L1_PROBE_STRATEGY", "hierarchy"),
            ("L1_PROBE_LINE_STRATEGY", "false-sharing"),
            ("L1_PROBE_REGION_MB", "64"),
        ]))
        .unwrap();
        assert_eq!(config.strategy, Strategy::Hierarchy);
        assert_eq!(config.line_strategy, LineStrategyKind::FalseSharing);
        assert_eq!(config.region_bytes, 64 * MIB);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("L1_PROBE_STRATEGY", "guess")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn region_too_small_for_line_scan_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("L1_PROBE_REGION_MB", "1")])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
