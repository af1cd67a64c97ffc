//! Runs the configured pipeline against a backend and reconciles the result.
use std::fmt;

use log::info;

use crate::backend::Backend;
use crate::config::{Config, Strategy};
use crate::error::Result;
use crate::hierarchy::HierarchyReconstructor;
use crate::probe::{AssociativityProbe, CapacityProbe, Confidence, Estimate, line};
use crate::verify::{Verdict, verify};

/// Line size, capacity and associativity of one cache level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLevelEstimate {
    pub line_size: Estimate,
    pub capacity: Estimate,
    pub associativity: Estimate,
}

impl CacheLevelEstimate {
    /// `(line_size, capacity, associativity)` in bytes, bytes and ways.
    pub fn triple(&self) -> (usize, usize, usize) {
        (
            self.line_size.value,
            self.capacity.value,
            self.associativity.value,
        )
    }

    /// Low if any parameter fell back to its default.
    pub fn confidence(&self) -> Confidence {
        if [self.line_size, self.capacity, self.associativity]
            .iter()
            .all(Estimate::is_measured)
        {
            Confidence::Measured
        } else {
            Confidence::Fallback
        }
    }
}

/// Outcome of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub strategy: &'static str,
    pub level: CacheLevelEstimate,
    pub verdict: Verdict,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = &self.level;
        writeln!(f, "==== RESULTS ({}) ====", self.strategy)?;
        writeln!(
            f,
            "L1_CACHE_SIZE      = {} KB  [{}]",
            level.capacity.value / 1024,
            level.capacity.confidence
        )?;
        writeln!(
            f,
            "L1_CACHE_ASSOC     = {}  [{}]",
            level.associativity.value, level.associativity.confidence
        )?;
        writeln!(
            f,
            "L1_CACHE_LINE_SIZE = {} bytes  [{}]",
            level.line_size.value, level.line_size.confidence
        )?;
        write!(f, "{}", self.verdict)
    }
}

/// Drives every probe with one immutable [`Config`].
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the configured strategy. Only backend failures and an aborted hierarchy
    /// reconstruction are errors; inconclusive probes degrade to fallbacks.
    pub fn run(&self, backend: &mut dyn Backend) -> Result<Report> {
        let (strategy, level) = match self.config.strategy {
            Strategy::Probes => self.run_probes(backend)?,
            Strategy::Hierarchy => (
                "hierarchy reconstruction",
                HierarchyReconstructor::new(&self.config).run(backend)?,
            ),
        };

        let (line, capacity, ways) = level.triple();
        let verdict = verify(line, capacity, ways, self.config.address_bits);
        info!("[consistency] {verdict}");
        Ok(Report {
            strategy,
            level,
            verdict,
        })
    }

    fn run_probes(&self, backend: &mut dyn Backend) -> Result<(&'static str, CacheLevelEstimate)> {
        let line_probe = line::from_config(&self.config);
        let line_size = line_probe.detect(backend)?;
        let capacity = CapacityProbe::new(&self.config).detect(backend, line_size.value)?;
        let associativity = AssociativityProbe::new(&self.config).detect(
            backend,
            line_size.value,
            capacity.value,
        )?;
        Ok((
            line_probe.name(),
            CacheLevelEstimate {
                line_size,
                capacity,
                associativity,
            },
        ))
    }
}
