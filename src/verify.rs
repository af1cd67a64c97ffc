//! Cross-check of an inferred geometry against `capacity = sets * line * ways`.
//!
//! Detected values are never rewritten here. An inconsistent triple comes back with
//! the invariants it breaks and a nearby consistent geometry to compare against.
use std::fmt;

/// Allowed distance of the set count from the nearest integer.
const SET_TOLERANCE: f64 = 0.01;

/// Address split of a consistent geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub sets: usize,
    pub index_bits: u32,
    pub offset_bits: u32,
    pub tag_bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Violation {
    LineNotPowerOfTwo(usize),
    CapacityNotPowerOfTwo(usize),
    AssociativityNotPowerOfTwo(usize),
    /// Set count is not within tolerance of an integer.
    FractionalSets(f64),
    SetsNotPowerOfTwo(usize),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::LineNotPowerOfTwo(v) => write!(f, "line size {v} is not a power of two"),
            Violation::CapacityNotPowerOfTwo(v) => {
                write!(f, "capacity {v} is not a power of two")
            }
            Violation::AssociativityNotPowerOfTwo(v) => {
                write!(f, "associativity {v} is not a power of two")
            }
            Violation::FractionalSets(v) => write!(f, "set count {v:.3} is not an integer"),
            Violation::SetsNotPowerOfTwo(v) => write!(f, "set count {v} is not a power of two"),
        }
    }
}

/// Closest consistent geometry to a rejected triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suggestion {
    pub sets: usize,
    pub line_size: usize,
    pub associativity: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Consistent(Geometry),
    Inconsistent {
        violations: Vec<Violation>,
        /// `capacity / (line * ways)` as measured.
        raw_sets: f64,
        suggestion: Suggestion,
    },
}

impl Verdict {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Verdict::Consistent(_))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Consistent(g) => write!(
                f,
                "consistent: {} sets, tag/index/offset = {}/{}/{} bits",
                g.sets, g.tag_bits, g.index_bits, g.offset_bits
            ),
            Verdict::Inconsistent {
                violations,
                raw_sets,
                suggestion,
            } => {
                write!(f, "INCONSISTENT ({raw_sets:.3} sets):")?;
                for v in violations {
                    write!(f, " {v};")?;
                }
                write!(
                    f,
                    " nearest power-of-two set count {}, suggested {} B {}-way with {} B lines",
                    suggestion.sets,
                    suggestion.capacity,
                    suggestion.associativity,
                    suggestion.line_size
                )
            }
        }
    }
}

/// Nearest power of two by absolute distance, ties going up. Anything up to 1 maps to 1.
pub fn nearest_power_of_two(value: f64) -> usize {
    if value.is_nan() || value <= 1.0 {
        return 1;
    }
    const LARGEST: usize = 1 << (usize::BITS - 1);
    // `as` saturates, so anything past the top power of two lands on it
    let Some(upper) = (value.ceil() as usize).checked_next_power_of_two() else {
        return LARGEST;
    };
    let lower = upper / 2;
    if upper as f64 == value || value - lower as f64 >= upper as f64 - value {
        upper
    } else {
        lower.max(1)
    }
}

/// Check `(line_size, capacity, associativity)` and derive the address split
/// for an `address_bits`-wide physical address.
pub fn verify(line_size: usize, capacity: usize, associativity: usize, address_bits: u32) -> Verdict {
    let mut violations = Vec::new();
    if !line_size.is_power_of_two() {
        violations.push(Violation::LineNotPowerOfTwo(line_size));
    }
    if !capacity.is_power_of_two() {
        violations.push(Violation::CapacityNotPowerOfTwo(capacity));
    }
    if !associativity.is_power_of_two() {
        violations.push(Violation::AssociativityNotPowerOfTwo(associativity));
    }

    let raw_sets = capacity as f64 / (line_size.max(1) * associativity.max(1)) as f64;
    let rounded = raw_sets.round();
    let sets = if (raw_sets - rounded).abs() <= SET_TOLERANCE && rounded >= 1.0 {
        let sets = rounded as usize;
        if !sets.is_power_of_two() {
            violations.push(Violation::SetsNotPowerOfTwo(sets));
        }
        Some(sets)
    } else {
        violations.push(Violation::FractionalSets(raw_sets));
        None
    };

    match sets {
        Some(sets) if violations.is_empty() => {
            let index_bits = sets.trailing_zeros();
            let offset_bits = line_size.trailing_zeros();
            Verdict::Consistent(Geometry {
                sets,
                index_bits,
                offset_bits,
                tag_bits: address_bits.saturating_sub(index_bits + offset_bits),
            })
        }
        _ => {
            let sets = nearest_power_of_two(raw_sets);
            let line_size = nearest_power_of_two(line_size as f64);
            let associativity = nearest_power_of_two(associativity as f64);
            Verdict::Inconsistent {
                violations,
                raw_sets,
                suggestion: Suggestion {
                    sets,
                    line_size,
                    associativity,
                    capacity: sets.saturating_mul(line_size).saturating_mul(associativity),
                },
            }
        }
    }
}
