//! Performance benchmarks for the access layer.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use entity_access::{
    AttributeDescriptor, AttributeKind, DataAccess, EntityDescriptor, FetchOptions, Predicate,
    Schema, StoreConfig, Timestamp,
};
use tempfile::TempDir;

fn create_access(dir: &TempDir) -> DataAccess {
    let schema = Schema::new(vec![EntityDescriptor::new("Task")
        .attribute(AttributeDescriptor::new("title", AttributeKind::Text))
        .attribute(AttributeDescriptor::new("done", AttributeKind::Bool).with_default(false))
        .attribute(AttributeDescriptor::new("createdAt", AttributeKind::Timestamp))])
    .unwrap();

    DataAccess::open(
        schema,
        StoreConfig {
            checkpoint_interval: 1000,
            ..StoreConfig::at(dir.path().join("store"))
        },
    )
    .unwrap()
}

fn populate(access: &DataAccess, count: usize) {
    for i in 0..count {
        let mut task = access.insert("Task").unwrap();
        task.set("title", format!("task {}", i))
            .set("done", i % 3 == 0)
            .set("createdAt", Timestamp((count - i) as i64));
        access.update(&task).unwrap();
    }
    access.commit().unwrap();
}

/// Benchmark a filtered, ordered fetch at varying store sizes
fn bench_select_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_many");

    for size in [100, 1000, 10000] {
        group.bench_with_input(BenchmarkId::new("objects", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let access = create_access(&dir);
            populate(&access, size);

            b.iter(|| {
                let options = FetchOptions::filtered(Predicate::eq("done", false))
                    .order_by("createdAt", true)
                    .limit(50);
                black_box(access.select_many("Task", options).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark count against select_many
fn bench_count(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let access = create_access(&dir);
    populate(&access, 5000);

    c.bench_function("count_open_tasks", |b| {
        b.iter(|| black_box(access.count("Task", Some(Predicate::eq("done", false))).unwrap()));
    });
}

/// Benchmark commit throughput (journal append + fsync)
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for batch in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("batch", batch), &batch, |b, &batch| {
            let dir = TempDir::new().unwrap();
            let access = create_access(&dir);

            b.iter(|| {
                populate(&access, batch);
            });
        });
    }

    group.finish();
}

/// Benchmark commit with a live query attached
fn bench_live_refresh(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let access = create_access(&dir);
    populate(&access, 1000);

    let live = access
        .live_query(
            "Task",
            FetchOptions::filtered(Predicate::eq("done", false)).order_by("createdAt", true),
            None,
        )
        .unwrap();

    c.bench_function("commit_with_live_query", |b| {
        b.iter(|| {
            populate(&access, 1);
            while live.try_recv().is_ok() {}
        });
    });
}

criterion_group!(
    benches,
    bench_select_many,
    bench_count,
    bench_commit,
    bench_live_refresh
);
criterion_main!(benches);
