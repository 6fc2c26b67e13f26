//! # Tree Benchmarks
//!
//! Performance benchmarks for the branch arena and store bootstrap.
//!
//! Run with: `cargo bench -p siptrack-core`

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use siptrack_core::{FilterResult, MemoryStorage, ObjectStore, Oid, StoreOptions, Tree};
use std::hint::black_box;

/// A tree where every branch has `fanout` children, `size` branches total.
fn create_wide_tree(size: u64, fanout: u64) -> Tree<()> {
    let mut tree = Tree::new();
    tree.add_branch(None, Oid(0)).expect("root");
    for i in 1..size {
        tree.add_branch(Some(Oid((i - 1) / fanout)), Oid(i))
            .expect("branch");
    }
    tree
}

/// A single chain of `size` branches.
fn create_deep_tree(size: u64) -> Tree<()> {
    let mut tree = Tree::new();
    tree.add_branch(None, Oid(0)).expect("root");
    for i in 1..size {
        tree.add_branch(Some(Oid(i - 1)), Oid(i)).expect("branch");
    }
    tree
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_branch_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_insertion");

    for size in [100u64, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(create_wide_tree(size, 8)));
        });
    }

    group.finish();
}

fn bench_traverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("traverse");

    for size in [100u64, 1000, 10000].iter() {
        let wide = create_wide_tree(*size, 8);
        group.bench_with_input(BenchmarkId::new("wide", size), size, |b, _| {
            b.iter(|| {
                black_box(
                    wide.traverse(Some(Oid(0)), true, None, |_| FilterResult::Match)
                        .count(),
                )
            });
        });

        let deep = create_deep_tree(*size);
        group.bench_with_input(BenchmarkId::new("deep", size), size, |b, _| {
            b.iter(|| {
                black_box(
                    deep.traverse(Some(Oid(0)), true, None, |_| FilterResult::Match)
                        .count(),
                )
            });
        });

        group.bench_with_input(BenchmarkId::new("depth_limited", size), size, |b, _| {
            b.iter(|| {
                black_box(
                    wide.traverse(Some(Oid(0)), false, Some(1), |_| FilterResult::Match)
                        .count(),
                )
            });
        });
    }

    group.finish();
}

fn bench_removal(c: &mut Criterion) {
    let mut group = c.benchmark_group("removal");

    for size in [100u64, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("recursive", size), size, |b, &size| {
            b.iter_batched(
                || create_wide_tree(size, 8),
                |mut tree| black_box(tree.remove(Oid(0), true).expect("remove").len()),
                BatchSize::SmallInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("adopting", size), size, |b, &size| {
            b.iter_batched(
                || create_wide_tree(size, 8),
                |mut tree| black_box(tree.remove(Oid(1), false).expect("remove").len()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_store_bootstrap(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    c.bench_function("store_bootstrap", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = ObjectStore::open(Box::new(MemoryStorage::new()), StoreOptions::default())
                .await
                .expect("open");
            black_box(store.len())
        });
    });
}

criterion_group!(
    benches,
    bench_branch_insertion,
    bench_traverse,
    bench_removal,
    bench_store_bootstrap,
);

criterion_main!(benches);
