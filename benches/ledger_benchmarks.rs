//! Draftbook - Ledger Benchmarks
//!
//! Criterion benchmarks for the hot paths of the wallet ledger.
//!
//! Run: cargo bench --bench ledger_benchmarks
//!
//! These benchmarks measure:
//! - Single mutation commit latency
//! - Multi-account settlement batches
//! - Paged history reads
//! - Auto-fill index derivation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use draftbook::draft::fairness;
use draftbook::events::EventBus;
use draftbook::ledger::{aury, EntryType, LedgerStore, Mutation};
use draftbook::storage::{Store, WriteSet};

fn fresh_ledger() -> LedgerStore {
    LedgerStore::new(Store::in_memory().unwrap(), EventBus::new())
}

// ============================================================================
// MUTATIONS
// ============================================================================

fn bench_apply_mutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Mutations");
    group.throughput(Throughput::Elements(1));

    group.bench_function("deposit", |b| {
        let ledger = fresh_ledger();
        b.iter(|| {
            black_box(
                ledger
                    .apply_mutation(Mutation::new("alice", EntryType::Deposit, 1))
                    .unwrap(),
            )
        });
    });

    group.bench_function("debit_refused", |b| {
        let ledger = fresh_ledger();
        ledger
            .apply_mutation(Mutation::new("alice", EntryType::Deposit, 1))
            .unwrap();
        b.iter(|| {
            black_box(
                ledger
                    .apply_mutation(Mutation::new("alice", EntryType::EntryFee, aury(1)))
                    .is_err(),
            )
        });
    });

    group.finish();
}

fn bench_settlement_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("SettlementBatch");

    for players in [2usize, 6, 10] {
        group.throughput(Throughput::Elements(players as u64));
        group.bench_with_input(BenchmarkId::from_parameter(players), &players, |b, &players| {
            let ledger = fresh_ledger();
            let accounts: Vec<String> = (0..players).map(|i| format!("player-{}", i)).collect();
            b.iter(|| {
                let mut batch: Vec<Mutation> = accounts
                    .iter()
                    .map(|a| Mutation::new(a.as_str(), EntryType::PrizeWon, 7))
                    .collect();
                batch.push(Mutation::new("house", EntryType::TaxCollected, 1));
                black_box(ledger.apply_batch(&batch, WriteSet::new()).unwrap())
            });
        });
    }

    group.finish();
}

// ============================================================================
// READS
// ============================================================================

fn bench_history_page(c: &mut Criterion) {
    let ledger = fresh_ledger();
    for i in 1..=1_000u64 {
        ledger
            .apply_mutation(Mutation::new("alice", EntryType::Deposit, i))
            .unwrap();
    }

    let mut group = c.benchmark_group("History");
    group.throughput(Throughput::Elements(50));
    group.bench_function("newest_50", |b| {
        b.iter(|| {
            let page: Vec<_> = ledger.list_entries("alice").unwrap().take(50).collect();
            black_box(page)
        });
    });
    group.bench_function("reconcile_1000", |b| {
        b.iter(|| black_box(ledger.reconcile("alice").unwrap()));
    });
    group.finish();
}

fn bench_autofill(c: &mut Criterion) {
    c.bench_function("autofill_index", |b| {
        let mut slot = 0u32;
        b.iter(|| {
            slot = slot.wrapping_add(1);
            black_box(fairness::autofill_index("draft-bench", 3, slot, 40))
        });
    });
}

criterion_group!(
    benches,
    bench_apply_mutation,
    bench_settlement_batch,
    bench_history_page,
    bench_autofill
);
criterion_main!(benches);
