//! Interval-set algebra over record IDs
//!
//! This module provides compact set types for "which IDs have we already
//! seen" bookkeeping, without storing every member:
//!
//! - `Range`: a closed interval `[begin, end]`
//! - `MultiRange`: a sorted group of disjoint, non-adjacent ranges
//! - `IntervalSet`: the closed set of kinds (`Null`, `All`, `Range`, `Multi`)
//!   that all support the same operations
//!
//! # Example
//!
//! ```
//! use statline::range::{IntervalSet, Range};
//!
//! let a = IntervalSet::from(Range::new(0u64, 2).unwrap());
//! let b = IntervalSet::from(Range::new(3u64, 9).unwrap());
//! assert_eq!(&a | &b, IntervalSet::range(0, 9).unwrap());
//! ```

mod interval;
mod multi;
mod set;

pub use interval::{Discrete, Range};
pub use multi::MultiRange;
pub use set::IntervalSet;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_range() -> impl Strategy<Value = Range<i32>> {
        (-200i32..200, 0i32..40)
            .prop_map(|(begin, width)| Range::new(begin, begin + width).unwrap())
    }

    fn arb_set() -> impl Strategy<Value = IntervalSet<i32>> {
        prop_oneof![
            1 => Just(IntervalSet::Null),
            1 => Just(IntervalSet::All),
            8 => prop::collection::vec(arb_range(), 0..8)
                .prop_map(|ranges| IntervalSet::from_multi(ranges.into_iter().collect())),
        ]
    }

    fn assert_minimal(set: &IntervalSet<i32>) {
        if let Some(runs) = set.runs() {
            for pair in runs.windows(2) {
                assert!(
                    pair[0].precedes_with_gap(&pair[1]),
                    "{} and {} should have been merged",
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    proptest! {
        #[test]
        fn range_contains_endpoints(begin in -1000i64..1000, width in 0i64..100) {
            let range = Range::new(begin, begin + width).unwrap();
            prop_assert!(range.contains(begin));
            prop_assert!(range.contains(begin + width));
            prop_assert!(!range.contains(begin - 1));
            prop_assert!(!range.contains(begin + width + 1));
        }

        #[test]
        fn union_is_commutative(a in arb_set(), b in arb_set()) {
            prop_assert_eq!(&a | &b, &b | &a);
        }

        #[test]
        fn union_is_associative(a in arb_set(), b in arb_set(), c in arb_set()) {
            prop_assert_eq!(&(&a | &b) | &c, &a | &(&b | &c));
        }

        #[test]
        fn union_is_minimal(a in arb_set(), b in arb_set()) {
            assert_minimal(&(&a | &b));
            assert_minimal(&(&a & &b));
            if let Ok(diff) = a.difference(&b) {
                assert_minimal(&diff);
            }
        }

        #[test]
        fn identities(x in arb_set()) {
            prop_assert_eq!(&IntervalSet::Null | &x, x.clone());
            prop_assert_eq!(&IntervalSet::All & &x, x.clone());
            prop_assert_eq!(&IntervalSet::Null & &x, IntervalSet::Null);
            prop_assert_eq!(&IntervalSet::All | &x, IntervalSet::All);
        }

        #[test]
        fn membership_matches_operations(a in arb_set(), b in arb_set(), point in -250i32..250) {
            let union = &a | &b;
            let inter = &a & &b;
            prop_assert_eq!(union.contains(point), a.contains(point) || b.contains(point));
            prop_assert_eq!(inter.contains(point), a.contains(point) && b.contains(point));
            if let Ok(diff) = a.difference(&b) {
                prop_assert_eq!(diff.contains(point), a.contains(point) && !b.contains(point));
            }
        }

        #[test]
        fn subset_agrees_with_union(a in arb_set(), b in arb_set()) {
            let union = &a | &b;
            prop_assert!(a <= union);
            prop_assert!(b <= union);
            prop_assert_eq!(a <= b, (&a | &b) == b);
        }
    }
}
