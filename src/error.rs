//! Fatal errors. Inconclusive probes and inconsistent geometry are not errors:
//! they surface as [`crate::probe::Confidence::Fallback`] and
//! [`crate::verify::Verdict::Inconsistent`] respectively.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The anonymous memory mapping backing every probe could not be created.
    #[error("could not map {bytes} bytes of anonymous memory")]
    Allocation {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },

    /// A pattern touches bytes outside the measurement region.
    #[error("pattern needs {needed} bytes but the region holds {available}")]
    PatternOutOfBounds { needed: usize, available: usize },

    /// The joint stride/way sweep never isolated a cache level.
    #[error("hierarchy reconstruction found no cache level across {strides} strides")]
    AbortedReconstruction { strides: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
}
