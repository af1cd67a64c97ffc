//! Reduction of repeated samples to one robust statistic.
//!
//! Preemption and interrupts only ever make a sample slower, so the sample
//! distribution has a long right tail. The median ignores that tail; the mean
//! would chase it.

/// Median of `data`, averaging the two middle values for even lengths.
///
/// Uses `select_nth_unstable_by()`, so `data` is partially reordered.
///
/// # Panics
///
/// Panics if `data` is empty.
pub fn median(data: &mut [f64]) -> f64 {
    assert!(!data.is_empty(), "Cannot compute median of empty slice");

    let n = data.len();
    let mid = n / 2;
    let (_, &mut upper, _) = data.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    if n % 2 == 1 {
        return upper;
    }
    // everything left of `mid` is <= upper; the lower middle is their maximum
    let lower = data[..mid]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    (lower + upper) / 2.0
}

/// `k >= 1` samples taken for one configuration, in nanoseconds per access.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    samples: Vec<f64>,
}

impl SampleSet {
    /// Wrap `samples`; `None` if there are none.
    pub fn new(samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            None
        } else {
            Some(Self { samples })
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn median(&self) -> f64 {
        let mut scratch = self.samples.clone();
        median(&mut scratch)
    }

    pub fn min(&self) -> f64 {
        self.samples.iter().copied().fold(f64::INFINITY, f64::min)
    }
}
