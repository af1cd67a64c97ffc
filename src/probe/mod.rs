//! Single-parameter probes. Each sweeps one parameter, reduces every point to a
//! median, and hands the series to a [`crate::detect::JumpRule`].
//!
//! A probe never fails because its sweep was inconclusive: it returns the
//! documented fallback marked [`Confidence::Fallback`]. Only backend errors
//! propagate.
use std::fmt;

use crate::backend::Backend;
use crate::chain::Pattern;
use crate::error::Result;

pub mod associativity;
pub mod capacity;
pub mod line;

pub use associativity::AssociativityProbe;
pub use capacity::CapacityProbe;
pub use line::{FalseSharing, LineSizeStrategy, StrideScan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Read off a detected change point.
    Measured,
    /// Nothing qualified; the value is the configured default.
    Fallback,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Measured => write!(f, "measured"),
            Confidence::Fallback => write!(f, "fallback (low confidence)"),
        }
    }
}

/// One inferred parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub value: usize,
    pub confidence: Confidence,
}

impl Estimate {
    pub fn measured(value: usize) -> Self {
        Self {
            value,
            confidence: Confidence::Measured,
        }
    }

    pub fn fallback(value: usize) -> Self {
        Self {
            value,
            confidence: Confidence::Fallback,
        }
    }

    pub fn is_measured(&self) -> bool {
        self.confidence == Confidence::Measured
    }
}

/// Median latency of `pattern` over `repeats` samples.
pub(crate) fn median_latency(
    backend: &mut dyn Backend,
    pattern: &Pattern,
    repeats: usize,
) -> Result<f64> {
    Ok(backend.sample_chain(pattern, repeats)?.median())
}
