//! Property tests over mempool admission.
//!
//! Random fee sequences against a pool with room for roughly three
//! bundles; after every submission the pool must respect its capacity and
//! hold at most one bundle per coin.

use std::collections::HashSet;

use proptest::prelude::*;

use grove_node_lib::MempoolConfig;
use grove_tests::helpers::*;

const COINS: usize = 4;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn admission_respects_capacity_and_coin_exclusivity(
        submissions in prop::collection::vec((0..COINS, 1u64..50_000, any::<u8>()), 1..16)
    ) {
        let probe = memory_node();
        let coins = fund(&probe, COINS, 10_000_000);
        let cost = bundle_conditions(&probe, &pay(coins[0], pkh(1), 1)).cost;
        let capacity = cost * 7 / 2;

        let node = memory_node_with_mempool(MempoolConfig { max_total_cost: capacity, ..MempoolConfig::default() });
        let coins = fund(&node, COINS, 10_000_000);

        for (index, fee, dest) in submissions {
            node.add_spend_bundle(pay(coins[index], pkh(dest), fee)).unwrap();

            let pool = node.mempool();
            prop_assert!(pool.total_cost() <= capacity);
            let items = pool.get_all_mempool_items();
            let mut spent = HashSet::new();
            for item in items.values() {
                for id in &item.removals {
                    prop_assert!(spent.insert(*id), "coin {} spent by two pooled bundles", id);
                }
            }
            prop_assert_eq!(items.values().map(|i| i.cost).sum::<u64>(), pool.total_cost());
        }
    }
}
