//! Property test for the ordering guarantee the sorted indexes build on:
//! a prefix-bounded range scan over lexicographically ordered paths finds
//! exactly the subtree a naive ancestry filter finds.

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::ops::Bound;

use stagesync_core::PrimPath;

fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-c0-9_]{1,3}", 1..5)
        .prop_map(|segments| format!("/{}", segments.join("/")))
}

proptest! {
    #[test]
    fn prop_range_scan_matches_naive_subtree_filter(
        raw_paths in prop::collection::vec(path_strategy(), 1..32),
        root_raw in path_strategy(),
    ) {
        let paths: BTreeSet<PrimPath> = raw_paths
            .iter()
            .map(|raw| PrimPath::new(raw).unwrap())
            .collect();
        let root = PrimPath::new(&root_raw).unwrap();

        // The range query the indexes use.
        let scanned: Vec<&PrimPath> = paths
            .range((Bound::Included(root.clone()), Bound::Unbounded))
            .take_while(|p| root.is_self_or_ancestor_of(p))
            .collect();

        // Ground truth by exhaustive filtering.
        let naive: Vec<&PrimPath> = paths
            .iter()
            .filter(|p| root.is_self_or_ancestor_of(p))
            .collect();

        prop_assert_eq!(scanned, naive);
    }
}
