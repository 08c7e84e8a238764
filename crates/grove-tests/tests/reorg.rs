//! Fork choice and reorganization through the full node.

use grove_core::error::{BlockError, SpendError};
use grove_core::types::BlockRecord;
use grove_node_lib::AddBlockResult;
use grove_tests::helpers::*;

#[test]
fn heavier_fork_restores_spent_coins_and_prunes_mempool() {
    let node = memory_node();
    let genesis = node.get_peak().unwrap().unwrap();
    let premine = premine();
    let key = test_key();

    // Main branch: A1 spends the premine to a fresh coin y.
    let p = pay(premine, key.puzzle_hash(), 100);
    let y = bundle_conditions(&node, &p).additions[0];
    node.add_spend_bundle(p).unwrap();
    let a1 = mine_next(&node, pkh(0xA1));
    node.add_block(&a1).unwrap();

    // Q spends y and only makes sense on the A branch.
    let q = pay(y, pkh(9), 100);
    assert!(node.add_spend_bundle(q.clone()).unwrap().is_accepted());

    // Competing branch from genesis: B1 ties, B2 wins.
    let b1 = block_on(&node, &genesis, &[], 0, pkh(0xB1), 1);
    assert_eq!(node.add_block(&b1).unwrap(), AddBlockResult::AddedToFork);
    assert_eq!(node.get_peak().unwrap().unwrap().header_hash, a1.hash());

    let mut events = node.subscribe();
    let b2 = block_on(&node, &BlockRecord::from_header(&b1.header), &[], 0, pkh(0xB2), 1);
    let AddBlockResult::Added(change) = node.add_block(&b2).unwrap() else {
        panic!("heavier fork should win");
    };
    assert!(change.is_reorg());
    assert_eq!(change.fork_height, Some(0));
    assert_eq!(change.old_peak.map(|p| p.header_hash), Some(a1.hash()));
    assert_eq!(events.try_recv().unwrap(), change);

    let restored = node.get_coin_record(&premine.coin_id()).unwrap().unwrap();
    assert!(!restored.is_spent());
    assert!(node.get_coin_record(&y.coin_id()).unwrap().is_none());
    assert!(node.get_coin_record(&a1.reward_coins[0].coin_id()).unwrap().is_none());

    assert!(node.mempool().get_spendbundle(&q.name()).is_none());
    assert_eq!(node.mempool().size(), 0);
}

#[test]
fn reorg_keeps_bundles_still_valid_on_new_chain() {
    let node = memory_node();
    let genesis = node.get_peak().unwrap().unwrap();

    let a1 = mine_next(&node, pkh(0xA1));
    node.add_block(&a1).unwrap();
    let keep = pay(premine(), pkh(3), 500);
    assert!(node.add_spend_bundle(keep.clone()).unwrap().is_accepted());

    let b1 = block_on(&node, &genesis, &[], 0, pkh(0xB1), 2);
    let result = node.add_block(&b1).unwrap();
    assert!(matches!(result, AddBlockResult::Added(ref c) if c.is_reorg()));

    let item = node.mempool().get_mempool_item(&keep.name()).unwrap();
    assert_eq!(item.fee, 500);
}

#[test]
fn fork_spending_coin_from_other_branch_is_invalid() {
    let node = memory_node();
    let genesis = node.get_peak().unwrap().unwrap();
    let key = test_key();

    let p = pay(premine(), key.puzzle_hash(), 0);
    let y = bundle_conditions(&node, &p).additions[0];
    node.add_spend_bundle(p).unwrap();
    node.add_block(&mine_next(&node, pkh(0xA1))).unwrap();

    // y exists only on the A branch.
    let spend_y = pay(y, pkh(9), 0);
    let bad = block_on(&node, &genesis, &[spend_y], 0, pkh(0xB1), 5);
    assert_eq!(
        node.add_block(&bad).unwrap(),
        AddBlockResult::InvalidBlock(BlockError::Spend(SpendError::UnknownCoin(y.coin_id())))
    );
    assert!(node.get_block(&bad.hash()).unwrap().is_none());
}

#[test]
fn fork_may_respend_coin_spent_on_abandoned_branch() {
    let node = memory_node();
    let genesis = node.get_peak().unwrap().unwrap();
    let premine = premine();

    node.add_spend_bundle(pay(premine, pkh(1), 10)).unwrap();
    node.add_block(&mine_next(&node, pkh(0xA1))).unwrap();

    let alt = pay(premine, pkh(2), 20);
    let b1 = block_on(&node, &genesis, &[alt], 20, pkh(0xB1), 1);
    assert_eq!(node.add_block(&b1).unwrap(), AddBlockResult::AddedToFork);
    let b2 = block_on(&node, &BlockRecord::from_header(&b1.header), &[], 0, pkh(0xB2), 1);
    assert!(matches!(node.add_block(&b2).unwrap(), AddBlockResult::Added(_)));

    let record = node.get_coin_record(&premine.coin_id()).unwrap().unwrap();
    assert_eq!(record.spent_height, Some(1));
    assert!(node.get_coin_records_by_puzzle_hash(&pkh(1), true).unwrap().is_empty());
    assert_eq!(node.get_coin_records_by_puzzle_hash(&pkh(2), false).unwrap().len(), 1);
}

#[test]
fn orphan_then_parent_arrives() {
    let node = memory_node();
    let genesis = node.get_peak().unwrap().unwrap();
    let b1 = block_on(&node, &genesis, &[], 0, pkh(1), 1);
    let b2 = block_on(&node, &BlockRecord::from_header(&b1.header), &[], 0, pkh(2), 1);

    assert_eq!(node.add_block(&b2).unwrap(), AddBlockResult::DisconnectedBlock);
    assert!(matches!(node.add_block(&b1).unwrap(), AddBlockResult::Added(_)));
    assert!(matches!(node.add_block(&b2).unwrap(), AddBlockResult::Added(_)));
    assert_eq!(node.add_block(&b2).unwrap(), AddBlockResult::AlreadyHave);
    assert_eq!(node.get_peak().unwrap().unwrap().height, 2);
}

#[test]
fn reorg_on_rocksdb_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let b2_hash = {
        let node = rocks_node(dir.path());
        let genesis = node.get_peak().unwrap().unwrap();
        node.add_block(&mine_next(&node, pkh(0xA1))).unwrap();
        let b1 = block_on(&node, &genesis, &[], 0, pkh(0xB1), 1);
        node.add_block(&b1).unwrap();
        let b2 = block_on(&node, &BlockRecord::from_header(&b1.header), &[], 0, pkh(0xB2), 1);
        node.add_block(&b2).unwrap();
        b2.hash()
    };

    let node = rocks_node(dir.path());
    assert_eq!(node.get_peak().unwrap().unwrap().header_hash, b2_hash);
    assert!(node.get_coin_records_by_puzzle_hash(&pkh(0xA1), true).unwrap().is_empty());
    assert_eq!(node.get_coin_records_by_puzzle_hash(&pkh(0xB1), false).unwrap().len(), 1);
}

#[test]
fn extension_event_delivered_after_reorg_keeps_bundle() {
    let node = memory_node();
    let genesis = node.get_peak().unwrap().unwrap();
    let premine = premine();
    let c = pay(premine, pkh(1), 100);
    assert!(node.add_spend_bundle(c.clone()).unwrap().is_accepted());

    // A1 confirms C, B1/B2 then abandon it. Both events are held back.
    let a1 = mine_next(&node, pkh(0xA1));
    assert_eq!(a1.coin_spends.len(), 1);
    let AddBlockResult::Added(extension) = node.blockchain().add_block(&a1).unwrap() else {
        panic!("A1 should extend genesis");
    };
    let b1 = block_on(&node, &genesis, &[], 0, pkh(0xB1), 1);
    assert_eq!(node.blockchain().add_block(&b1).unwrap(), AddBlockResult::AddedToFork);
    let b2 = block_on(&node, &BlockRecord::from_header(&b1.header), &[], 0, pkh(0xB2), 1);
    let AddBlockResult::Added(reorg) = node.blockchain().add_block(&b2).unwrap() else {
        panic!("B2 should win");
    };

    node.mempool().new_peak(&reorg).unwrap();
    node.mempool().new_peak(&extension).unwrap();

    assert!(!node.get_coin_record(&premine.coin_id()).unwrap().unwrap().is_spent());
    assert!(node.mempool().get_spendbundle(&c.name()).is_some());
}

#[test]
fn concurrent_blocks_leave_mempool_consistent_with_chain() {
    for _ in 0..8 {
        let node = memory_node();
        let genesis = node.get_peak().unwrap().unwrap();
        let premine = premine();
        let c = pay(premine, pkh(1), 100);
        node.add_spend_bundle(c.clone()).unwrap();

        let a1 = mine_next(&node, pkh(0xA1));
        let b1 = block_on(&node, &genesis, &[], 0, pkh(0xB1), 1);
        let b2 = block_on(&node, &BlockRecord::from_header(&b1.header), &[], 0, pkh(0xB2), 1);
        let mut events = node.subscribe();

        std::thread::scope(|scope| {
            scope.spawn(|| node.add_block(&a1).unwrap());
            scope.spawn(|| {
                node.add_block(&b1).unwrap();
                node.add_block(&b2).unwrap();
            });
        });

        let spent = node.get_coin_record(&premine.coin_id()).unwrap().unwrap().is_spent();
        let pooled = node.mempool().get_spendbundle(&c.name()).is_some();
        assert_eq!(spent, !pooled, "bundle must be pooled exactly when its coin is unspent");

        // The last event names the stored peak.
        let mut last = None;
        while let Ok(change) = events.try_recv() {
            last = Some(change.new_peak);
        }
        assert_eq!(last, node.get_peak().unwrap());
    }
}
