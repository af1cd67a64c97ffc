use std::collections::{HashMap, HashSet};

use l1_probe_rs::chain::ChainBuilder;
use l1_probe_rs::detect::{JumpRule, Reference, Series};
use l1_probe_rs::stats::median;
use l1_probe_rs::verify::{Verdict, verify};
use proptest::prelude::*;

fn previous_rule() -> JumpRule {
    JumpRule {
        relative: 0.2,
        reference: Reference::Previous,
        absolute_margin: 0.25,
        baseline_points: 3,
        persistence: None,
    }
}

/// Gentle 1% ramp, multiplied by `factor` from index `at` on.
fn ramp_with_step(len: usize, at: usize, factor: f64) -> Series {
    (0..len)
        .map(|i| {
            let base = 1.0 + 0.01 * i as f64;
            (i + 1, if i >= at { base * factor } else { base })
        })
        .collect()
}

proptest! {
    #[test]
    fn chain_is_one_cycle_over_every_slot(n in 4usize..3000, seed in any::<u64>()) {
        let pattern = ChainBuilder::new(seed).shuffled(n, 64);
        prop_assert_eq!(pattern.len(), n);

        let next: HashMap<usize, usize> = pattern.links().collect();
        let start = pattern.offsets()[0];
        let mut seen = HashSet::new();
        let mut at = start;
        for _ in 0..n {
            prop_assert!(seen.insert(at), "slot {} visited twice", at);
            at = next[&at];
        }
        prop_assert_eq!(at, start);
        prop_assert_eq!(seen.len(), n);
    }

    #[test]
    fn median_ignores_sample_order(
        (xs, shuffled) in prop::collection::vec(0.0f64..1e6, 1..200)
            .prop_flat_map(|xs| (Just(xs.clone()), Just(xs).prop_shuffle()))
    ) {
        let mut a = xs;
        let mut b = shuffled;
        prop_assert_eq!(median(&mut a), median(&mut b));
    }

    #[test]
    fn injected_step_is_the_only_jump(
        (len, at) in (6usize..40).prop_flat_map(|len| (Just(len), 3..len)),
        factor in 1.5f64..3.0,
    ) {
        let series = ramp_with_step(len, at, factor);
        let jumps: Vec<usize> = previous_rule().all(&series).iter().map(|j| j.index).collect();
        prop_assert_eq!(jumps, vec![at]);
    }

    #[test]
    fn sub_threshold_step_is_not_flagged(
        (len, at) in (6usize..40).prop_flat_map(|len| (Just(len), 3..len)),
        factor in 1.0f64..1.12,
    ) {
        let series = ramp_with_step(len, at, factor);
        prop_assert!(previous_rule().all(&series).is_empty());
    }

    #[test]
    fn power_of_two_geometry_is_consistent(
        set_bits in 0u32..=12,
        line_bits in 3u32..=8,
        way_bits in 0u32..=5,
    ) {
        let (sets, line, ways) = (1usize << set_bits, 1usize << line_bits, 1usize << way_bits);
        match verify(line, sets * line * ways, ways, 48) {
            Verdict::Consistent(geometry) => {
                prop_assert_eq!(geometry.sets, sets);
                prop_assert_eq!(geometry.index_bits, set_bits);
                prop_assert_eq!(geometry.offset_bits, line_bits);
                prop_assert_eq!(geometry.tag_bits, 48 - set_bits - line_bits);
            }
            other => prop_assert!(false, "rejected consistent geometry: {}", other),
        }
    }
}

#[test]
fn fifty_thousand_seven_way_is_rejected_with_128_sets() {
    match verify(64, 50_000, 7, 48) {
        Verdict::Inconsistent { suggestion, .. } => assert_eq!(suggestion.sets, 128),
        Verdict::Consistent(g) => panic!("accepted {g:?}"),
    }
}
