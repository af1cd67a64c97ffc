//! Access patterns for pointer chasing.
//!
//! A [`Pattern`] is a cyclic list of byte offsets into the measurement region.
//! Installing it writes, at each offset, the address of the next offset, so the
//! traversal visits every slot exactly once per cycle. The visiting order is a
//! seeded shuffle: consecutive steps have no fixed stride for a prefetcher to
//! lock on to, and a given seed always reproduces the same chain.
use log::warn;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Chains shorter than this are too easy for a stream prefetcher to predict.
pub const MIN_CHAIN_LEN: usize = 4;

/// Width of one link in the region.
pub const SLOT_BYTES: usize = std::mem::size_of::<usize>();

/// Byte offsets visited in order, wrapping from the last back to the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    offsets: Vec<usize>,
}

impl Pattern {
    /// Wrap an explicit visiting order. Offsets must be distinct and slot aligned.
    pub fn from_offsets(offsets: Vec<usize>) -> Self {
        debug_assert!(!offsets.is_empty(), "pattern needs at least one slot");
        debug_assert!(offsets.iter().all(|o| o % SLOT_BYTES == 0));
        Self { offsets }
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Bytes of region the pattern needs, counting the link stored at the last offset.
    pub fn span(&self) -> usize {
        self.offsets.iter().max().map_or(0, |&max| max + SLOT_BYTES)
    }

    /// `(offset, next offset)` for every link in the cycle.
    pub fn links(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let n = self.offsets.len();
        (0..n).map(move |i| (self.offsets[i], self.offsets[(i + 1) % n]))
    }
}

/// Builds randomized chains from one seed.
#[derive(Debug, Clone, Copy)]
pub struct ChainBuilder {
    seed: u64,
}

impl ChainBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn shuffled_indices(&self, n: usize) -> Vec<usize> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed ^ n as u64);
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut rng);
        indices
    }

    /// One random cycle over `n` slots spaced `stride` bytes apart.
    ///
    /// `n` below [`MIN_CHAIN_LEN`] is clamped up to it.
    pub fn shuffled(&self, n: usize, stride: usize) -> Pattern {
        let n = if n < MIN_CHAIN_LEN {
            warn!("chain of {n} slots clamped to {MIN_CHAIN_LEN}");
            MIN_CHAIN_LEN
        } else {
            n
        };
        Pattern::from_offsets(
            self.shuffled_indices(n)
                .into_iter()
                .map(|i| i * stride)
                .collect(),
        )
    }

    /// Random cycle over `count` slots spaced `spacing` bytes apart, with no minimum length.
    ///
    /// With `spacing` equal to a cache's set stride every slot competes for the same set.
    pub fn conflict_ring(&self, count: usize, spacing: usize) -> Pattern {
        Pattern::from_offsets(
            self.shuffled_indices(count.max(1))
                .into_iter()
                .map(|i| i * spacing)
                .collect(),
        )
    }

    /// `groups` randomly ordered pairs: each visits `base` then `base + stride`.
    ///
    /// Pair bases are `spacing` bytes apart, so the second access of a pair reuses the
    /// line the first one filled exactly when `stride` is below the line size.
    pub fn paired_groups(&self, groups: usize, spacing: usize, stride: usize) -> Pattern {
        debug_assert!(stride < spacing, "pair members must not overlap the next group");
        let groups = groups.max(MIN_CHAIN_LEN / 2);
        Pattern::from_offsets(
            self.shuffled_indices(groups)
                .into_iter()
                .flat_map(|g| [g * spacing, g * spacing + stride])
                .collect(),
        )
    }
}
