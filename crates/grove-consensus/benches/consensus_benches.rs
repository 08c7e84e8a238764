//! Criterion benchmarks for grove-consensus critical operations.
//!
//! Covers: standard spend execution, bundle validation, and full block
//! validation on top of genesis.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use grove_consensus::{genesis_block, mine_block, standard_solution, ConsensusEngine, StandardPuzzleRunner};
use grove_core::coin_store::{CoinStore, MemoryCoinStore};
use grove_core::constants::ConsensusConstants;
use grove_core::crypto::{aggregate_signatures, KeyPair};
use grove_core::traits::{ConsensusValidator, PuzzleRunner};
use grove_core::types::{BlockRecord, CoinSpend, Condition, Hash256, SpendBundle};

fn setup() -> (ConsensusEngine, MemoryCoinStore, BlockRecord, SpendBundle) {
    let key = KeyPair::from_seed(&[1; 32]);
    let constants = ConsensusConstants {
        genesis_puzzle_hash: key.puzzle_hash(),
        ..ConsensusConstants::regtest()
    };
    let now = constants.genesis_timestamp + 3_600;
    let engine = ConsensusEngine::with_clock(constants.clone(), move || now);

    let genesis = genesis_block(&constants);
    let mut coins = MemoryCoinStore::new();
    coins
        .apply_block(0, genesis.header.timestamp, &[], &genesis.reward_coins, &[])
        .expect("genesis applies");

    let coin = genesis.reward_coins[0];
    let outputs: Vec<Condition> = (0..8u8)
        .map(|i| Condition::CreateCoin { puzzle_hash: Hash256([i; 32]), amount: 1_000 })
        .collect();
    let solution = standard_solution(&outputs).expect("encodes");
    let sig = key.sign_spend(&coin, &solution, &constants.genesis_challenge);
    let bundle = SpendBundle::new(
        vec![CoinSpend { coin, puzzle_reveal: key.public_key_bytes(), solution }],
        aggregate_signatures([&sig]),
    );
    (engine, coins, BlockRecord::from_header(&genesis.header), bundle)
}

fn bench_run_spend(c: &mut Criterion) {
    let (engine, _, _, bundle) = setup();
    let runner = StandardPuzzleRunner::new(engine.constants());
    let spend = &bundle.coin_spends[0];
    c.bench_function("standard_run_spend", |b| {
        b.iter(|| runner.run_spend(black_box(spend), u64::MAX))
    });
}

fn bench_bundle_validation(c: &mut Criterion) {
    let (engine, coins, _, bundle) = setup();
    c.bench_function("spend_bundle_validation", |b| {
        b.iter(|| engine.validate_spend_bundle(black_box(&bundle), &coins))
    });
}

fn bench_block_validation(c: &mut Criterion) {
    let (engine, coins, parent, bundle) = setup();
    let fees = bundle.coin_spends[0].coin.amount - 8_000;
    let mut block = engine
        .create_block(&parent, &[bundle], fees, Hash256([0xFA; 32]), parent.timestamp + 30, 1)
        .expect("template");
    mine_block(&mut block, 1_000);
    c.bench_function("block_validation", |b| {
        b.iter(|| engine.validate_block(black_box(&block), Some(&parent), &coins))
    });
}

criterion_group!(benches, bench_run_spend, bench_bundle_validation, bench_block_validation);
criterion_main!(benches);
