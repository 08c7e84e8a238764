//! End-to-end tests: boot a node, mine blocks with spends, and check the
//! coin set, block store, and peak notifications.

use grove_core::traits::ConsensusValidator;
use grove_core::types::Condition;
use grove_node_lib::AddBlockResult;
use grove_tests::helpers::*;

#[test]
fn genesis_premine_is_spendable() {
    let node = memory_node();
    let premine = premine();
    let record = node.get_coin_record(&premine.coin_id()).unwrap().unwrap();
    assert!(record.coinbase);
    assert_eq!(record.confirmed_height, 0);
    assert_eq!(
        node.get_coin_records_by_puzzle_hash(&test_key().puzzle_hash(), false).unwrap(),
        vec![record]
    );
}

#[test]
fn mined_spend_moves_value() {
    let node = memory_node();
    let mut events = node.subscribe();
    let premine = premine();
    let fee = 1_000;
    let bundle = pay(premine, pkh(7), fee);
    assert!(node.add_spend_bundle(bundle).unwrap().is_accepted());

    let block = mine_next(&node, pkh(0xFA));
    let AddBlockResult::Added(change) = node.add_block(&block).unwrap() else {
        panic!("block should extend the peak");
    };
    assert_eq!(events.try_recv().unwrap(), change);
    assert_eq!(change.spent_coin_ids, vec![premine.coin_id()]);
    assert_eq!(change.created_coin_ids.len(), 2);

    let spent = node.get_coin_record(&premine.coin_id()).unwrap().unwrap();
    assert_eq!(spent.spent_height, Some(1));

    let received = node.get_coin_records_by_puzzle_hash(&pkh(7), false).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].coin.amount, premine.amount - fee);
    assert!(!received[0].coinbase);

    let reward = node.get_coin_records_by_puzzle_hash(&pkh(0xFA), false).unwrap();
    assert_eq!(reward[0].coin.amount, node.consensus().constants().block_reward + fee);
    assert!(node.get_coin_records_by_puzzle_hash(&test_key().puzzle_hash(), false).unwrap().is_empty());
    assert_eq!(
        node.get_coin_records_by_puzzle_hash(&test_key().puzzle_hash(), true).unwrap(),
        vec![spent]
    );
}

#[test]
fn chain_of_spends_across_blocks() {
    let node = memory_node();
    let key = test_key();
    let mut coin = premine();
    for height in 1..=5u64 {
        let bundle = pay(coin, key.puzzle_hash(), 10);
        let next = bundle_conditions(&node, &bundle).additions[0];
        node.add_spend_bundle(bundle).unwrap();
        let block = mine_next(&node, pkh(height as u8));
        assert!(matches!(node.add_block(&block).unwrap(), AddBlockResult::Added(_)));
        assert_eq!(node.get_peak().unwrap().unwrap().height, height);
        coin = next;
    }
    let record = node.get_coin_record(&coin.coin_id()).unwrap().unwrap();
    assert_eq!(record.confirmed_height, 5);
    assert!(!record.is_spent());
    assert_eq!(node.get_block_at_height(3).unwrap().unwrap().height(), 3);
}

#[test]
fn height_locked_bundle_waits_for_its_height() {
    let node = memory_node();
    let premine = premine();
    let bundle = spend_coins(
        &test_key(),
        &[(
            premine,
            vec![
                Condition::CreateCoin { puzzle_hash: pkh(1), amount: premine.amount - 50 },
                Condition::AssertHeightAbsolute(3),
            ],
        )],
    );
    assert!(node.add_spend_bundle(bundle.clone()).unwrap().is_accepted());

    for expected_height in 1..=2u64 {
        let block = mine_next(&node, pkh(expected_height as u8));
        assert!(block.coin_spends.is_empty(), "not eligible at height {expected_height}");
        node.add_block(&block).unwrap();
    }
    let block = mine_next(&node, pkh(3));
    assert_eq!(block.coin_spends.len(), 1);
    node.add_block(&block).unwrap();
    assert!(node.mempool().get_spendbundle(&bundle.name()).is_none());
}

#[test]
fn ephemeral_spend_in_one_bundle() {
    let node = memory_node();
    let key = test_key();
    let premine = premine();
    let middle = grove_core::types::Coin::new(premine.coin_id(), key.puzzle_hash(), premine.amount - 10);
    let bundle = spend_coins(
        &key,
        &[
            (premine, vec![Condition::CreateCoin { puzzle_hash: key.puzzle_hash(), amount: middle.amount }]),
            (middle, vec![Condition::CreateCoin { puzzle_hash: pkh(4), amount: middle.amount - 10 }]),
        ],
    );
    assert!(node.add_spend_bundle(bundle).unwrap().is_accepted());
    let block = mine_next(&node, pkh(0xFA));
    node.add_block(&block).unwrap();

    let record = node.get_coin_record(&middle.coin_id()).unwrap().unwrap();
    assert_eq!(record.confirmed_height, 1);
    assert_eq!(record.spent_height, Some(1));
    assert_eq!(node.get_coin_records_by_puzzle_hash(&pkh(4), false).unwrap().len(), 1);
}

#[test]
fn rocks_node_restarts_with_same_chain() {
    let dir = tempfile::tempdir().unwrap();
    let tip = {
        let node = rocks_node(dir.path());
        node.add_spend_bundle(pay(premine(), pkh(5), 100)).unwrap();
        for farmer in 1..=3u8 {
            let block = mine_next(&node, pkh(farmer));
            node.add_block(&block).unwrap();
        }
        node.get_peak().unwrap().unwrap()
    };

    let node = rocks_node(dir.path());
    assert_eq!(node.get_peak().unwrap(), Some(tip));
    assert!(node.get_coin_record(&premine().coin_id()).unwrap().unwrap().is_spent());
    assert_eq!(node.get_coin_records_by_puzzle_hash(&pkh(5), false).unwrap().len(), 1);
    // The mempool is not persisted.
    assert_eq!(node.mempool().size(), 0);
}
