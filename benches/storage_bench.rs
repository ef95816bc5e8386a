//! Throughput of the core engine operations, measured with Criterion.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata::memtable::{Memtable, MemtableOpts};
use strata::{IntKey, IntValue, Storage, StorageOpts};
use tempfile::TempDir;

fn bench_memtable(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable");

    group.bench_function("write_1000", |b| {
        b.iter(|| {
            let table: Memtable<IntKey, IntValue> = Memtable::new(MemtableOpts {
                soft_limit_in_bytes: 1 << 20,
                ..MemtableOpts::default()
            });
            for i in 0..1000 {
                table.write(black_box(IntKey(i)), black_box(IntValue::new(i as i32)));
            }
            table
        });
    });

    group.bench_function("read_hit", |b| {
        let table: Memtable<IntKey, IntValue> = Memtable::new(MemtableOpts {
            soft_limit_in_bytes: 1 << 20,
            ..MemtableOpts::default()
        });
        for i in 0..1000 {
            table.write(IntKey(i), IntValue::new(i as i32));
        }
        b.iter(|| black_box(table.read(&IntKey(500))));
    });

    group.finish();
}

fn bench_storage(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("put", |b| {
        let temp_dir = TempDir::new().unwrap();
        let db: Storage<IntKey, IntValue> = Storage::open(
            "bench",
            StorageOpts {
                directory: temp_dir.path().to_path_buf(),
                ..StorageOpts::default()
            },
        )
        .unwrap();
        let mut i = 0i64;
        b.iter(|| {
            i += 1;
            db.put(black_box(IntKey(i)), black_box(IntValue::new(i as i32)))
                .unwrap();
        });
    });

    group.bench_function("get_from_memtable", |b| {
        let temp_dir = TempDir::new().unwrap();
        let db: Storage<IntKey, IntValue> = Storage::open(
            "bench",
            StorageOpts {
                directory: temp_dir.path().to_path_buf(),
                ..StorageOpts::default()
            },
        )
        .unwrap();
        for i in 0..10_000 {
            db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
        }
        b.iter(|| black_box(db.get(&IntKey(5000)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_memtable, bench_storage);
criterion_main!(benches);
