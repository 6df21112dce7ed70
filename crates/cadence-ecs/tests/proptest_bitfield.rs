//! Property tests for `Bitfield` against a `BTreeSet` model.

use std::collections::BTreeSet;

use cadence_ecs::bitfield::Bitfield;
use proptest::prelude::*;

fn bits_strategy(width: usize) -> impl Strategy<Value = BTreeSet<usize>> {
    prop::collection::btree_set(0..width, 0..width.min(24))
}

fn build(width: usize, bits: &BTreeSet<usize>) -> Bitfield {
    let mut field = Bitfield::new(width);
    for &b in bits {
        field.set(b);
    }
    field
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn set_bits_round_trip_through_iter_ones(
        (width, bits) in (1usize..200).prop_flat_map(|w| (Just(w), bits_strategy(w)))
    ) {
        let field = build(width, &bits);
        let ones: BTreeSet<usize> = field.iter_ones().collect();
        prop_assert_eq!(&ones, &bits);
        prop_assert_eq!(field.is_empty(), bits.is_empty());
        prop_assert!(field.capacity() >= width);
    }

    #[test]
    fn test_mask_is_subset(
        (width, have, need) in (1usize..200)
            .prop_flat_map(|w| (Just(w), bits_strategy(w), bits_strategy(w)))
    ) {
        let have_field = build(width, &have);
        let need_field = build(width, &need);
        prop_assert_eq!(have_field.test_mask(&need_field), need.is_subset(&have));
    }

    #[test]
    fn clear_removes_only_that_bit(
        (width, bits, victim) in (1usize..200)
            .prop_flat_map(|w| (Just(w), bits_strategy(w), 0..w))
    ) {
        let mut field = build(width, &bits);
        field.clear(victim);
        for b in 0..width {
            prop_assert_eq!(field.test(b), b != victim && bits.contains(&b));
        }
    }
}
