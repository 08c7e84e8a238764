//! Criterion benchmarks for grove-core hot paths.
//!
//! Covers: Merkle roots, header hashing, BLS aggregate verification,
//! mempool admission and selection, and coin store apply/rollback.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use grove_core::coin_store::{CoinStore, MemoryCoinStore};
use grove_core::crypto::{aggregate_signatures, spend_message, verify_aggregate, KeyPair};
use grove_core::mempool::{Mempool, MempoolItem};
use grove_core::merkle::merkle_root;
use grove_core::traits::BundleConditions;
use grove_core::types::{BlockHeader, Coin, CoinSpend, Hash256, SpendBundle};

fn make_ids(n: usize) -> Vec<Hash256> {
    (0..n)
        .map(|i| Hash256(*blake3::hash(&(i as u64).to_le_bytes()).as_bytes()))
        .collect()
}

fn coin(i: u64) -> Coin {
    Coin::new(Hash256::sha256(i.to_be_bytes()), Hash256([0xAA; 32]), 1_000 + i)
}

fn pool_item(i: u64) -> MempoolItem {
    let c = coin(i);
    let bundle = SpendBundle::new(
        vec![CoinSpend { coin: c, puzzle_reveal: vec![], solution: i.to_be_bytes().to_vec() }],
        vec![],
    );
    let conditions = BundleConditions {
        removals: vec![c],
        additions: vec![],
        fee: (i % 97) * 1_000,
        cost: 10_000 + (i % 13) * 1_000,
        assert_height: 0,
        assert_seconds: 0,
    };
    MempoolItem::new(bundle, conditions, 0)
}

fn bench_merkle_root(c: &mut Criterion) {
    let ids = make_ids(1000);
    c.bench_function("merkle_root_1000_ids", |b| b.iter(|| merkle_root(black_box(&ids))));
}

fn bench_header_hash(c: &mut Criterion) {
    let header = BlockHeader {
        version: 1,
        height: 100,
        prev_hash: Hash256([0xAA; 32]),
        weight: 1_000,
        difficulty: 10,
        timestamp: 1_700_000_000,
        transactions_root: Hash256([0xBB; 32]),
        nonce: 42,
    };
    c.bench_function("header_hash", |b| b.iter(|| black_box(&header).hash()));
}

fn bench_aggregate_verify(c: &mut Criterion) {
    let challenge = Hash256([0xCC; 32]);
    let keys: Vec<KeyPair> = (0..8u8).map(|i| KeyPair::from_seed(&[i; 32])).collect();
    let sigs: Vec<_> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| k.sign_spend(&coin(i as u64), b"s", &challenge))
        .collect();
    let agg = aggregate_signatures(&sigs);
    let pairs: Vec<_> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.public_key(), spend_message(b"s", &coin(i as u64).coin_id(), &challenge)))
        .collect();
    c.bench_function("bls_aggregate_verify_8", |b| {
        b.iter(|| verify_aggregate(black_box(&agg), black_box(&pairs)))
    });
}

fn bench_mempool(c: &mut Criterion) {
    let items: Vec<MempoolItem> = (0..2_000).map(pool_item).collect();
    c.bench_function("mempool_insert_2000_with_eviction", |b| {
        b.iter_batched(
            || items.clone(),
            |items| {
                let mut pool = Mempool::new(5_000_000);
                for item in items {
                    let _ = pool.insert(item);
                }
                pool
            },
            BatchSize::LargeInput,
        )
    });

    let mut pool = Mempool::new(u64::MAX);
    for item in items {
        let _ = pool.insert(item);
    }
    c.bench_function("mempool_select_for_block", |b| {
        b.iter(|| pool.select_for_block(black_box(1_000_000), 10, 0).len())
    });
}

fn bench_coin_store(c: &mut Criterion) {
    let rewards: Vec<Coin> = (0..500).map(coin).collect();
    c.bench_function("coin_store_apply_500_then_rollback", |b| {
        b.iter_batched(
            MemoryCoinStore::new,
            |mut store| {
                for (h, reward) in rewards.iter().enumerate() {
                    let _ = store.apply_block(h as u64, 0, &[], std::slice::from_ref(reward), &[]);
                }
                let _ = store.rollback_to(250);
                store
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_merkle_root,
    bench_header_hash,
    bench_aggregate_verify,
    bench_mempool,
    bench_coin_store,
);
criterion_main!(benches);
