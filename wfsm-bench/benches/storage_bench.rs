//! File store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use wfsm_core::{Entity, EntityStore};
use wfsm_storage::{FileStore, FileStoreConfig};

fn create_test_store() -> (TempDir, FileStore) {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open_with(FileStoreConfig::new(dir.path()).with_fsync(false)).unwrap();
    (dir, store)
}

fn entity(i: usize, next_transition_at: i64) -> Entity {
    let mut e = Entity::new(
        format!("ent-{}", i),
        "order",
        "processing",
        serde_json::json!({"amount": i, "note": "x".repeat(100)}),
        1_000,
    );
    e.next_transition_at = next_transition_at;
    e
}

fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_store_save");
    let (_dir, store) = create_test_store();

    group.throughput(Throughput::Elements(1));
    group.bench_function("save", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % 1000;
            store.save(black_box(&entity(i, 5_000))).unwrap()
        });
    });

    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_store_load");
    let (_dir, store) = create_test_store();
    for i in 0..1000 {
        store.save(&entity(i, 0)).unwrap();
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("load", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % 1000;
            black_box(store.load("order", &format!("ent-{}", i)).unwrap())
        });
    });

    group.finish();
}

fn bench_find_due(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_store_find_due");
    group.sample_size(20);

    for total in [100usize, 1000] {
        let (_dir, store) = create_test_store();
        // One in ten entities is due.
        for i in 0..total {
            let next = if i % 10 == 0 { 2_000 } else { 0 };
            store.save(&entity(i, next)).unwrap();
        }

        group.throughput(Throughput::Elements(total as u64));
        group.bench_with_input(BenchmarkId::new("entities", total), &total, |b, _| {
            b.iter(|| black_box(store.find_due("order", 3_000).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_save, bench_load, bench_find_due);

criterion_main!(benches);
