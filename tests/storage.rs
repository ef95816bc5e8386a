use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata::compact::CompactionEvent;
use strata::wal::Wal;
use strata::{IntKey, IntValue, Storage, StorageOpts, StrataError, StringKey, StringValue};
use tempfile::TempDir;

fn opts(dir: &std::path::Path) -> StorageOpts {
    StorageOpts {
        directory: dir.to_path_buf(),
        memtable_threshold: 1024,
        flush_time_interval: Duration::from_millis(20),
        ..StorageOpts::default()
    }
}

#[test]
fn test_put_then_get_in_memory() {
    let _ = env_logger::try_init();
    let temp_dir = TempDir::new().unwrap();

    let db: Storage<IntKey, IntValue> = Storage::open("test", opts(temp_dir.path())).unwrap();
    db.put(IntKey(278), IntValue::new(278)).unwrap();
    assert_eq!(IntValue::new(278), db.get(&IntKey(278)).unwrap());
}

#[test]
fn test_get_missing_key() {
    let temp_dir = TempDir::new().unwrap();

    let db: Storage<IntKey, IntValue> = Storage::open("test", opts(temp_dir.path())).unwrap();
    assert!(matches!(
        db.get(&IntKey(404)).unwrap_err(),
        StrataError::KeyNotFound
    ));
}

#[test]
fn test_overflow_triggers_flush() {
    let temp_dir = TempDir::new().unwrap();

    let db: Storage<IntKey, IntValue> = Storage::open("test", opts(temp_dir.path())).unwrap();
    for i in 0..256 {
        db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
    }
    // overflows the memtable and seals it for flushing
    db.put(IntKey(90892389), IntValue::new(1993920)).unwrap();

    thread::sleep(Duration::from_millis(200));

    assert_eq!(IntValue::new(244), db.get(&IntKey(244)).unwrap());
    assert_eq!(IntValue::new(1993920), db.get(&IntKey(90892389)).unwrap());
    assert!(db.manifest().lsm().get_level(0).unwrap().tables_count() >= 1);
}

#[test]
fn test_wal_replay_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let storage_opts = StorageOpts {
        memtable_threshold: 2048,
        turn_on_memtable_wal: true,
        memtable_wal_time_interval: Duration::from_millis(1),
        ..opts(temp_dir.path())
    };

    {
        let db: Storage<IntKey, IntValue> =
            Storage::open("test", storage_opts.clone()).unwrap();
        for i in 0..100 {
            db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
        }
        // dropped without deleting the WAL: nothing reached a flush
    }

    let db: Storage<IntKey, IntValue> = Storage::open("test", storage_opts).unwrap();
    db.rollback_all().unwrap();
    for i in 0..100 {
        assert_eq!(
            IntValue::new(i as i32),
            db.get(&IntKey(i)).unwrap(),
            "key {} lost after replay",
            i
        );
    }
}

#[test]
fn test_delete_reaches_disk_through_tombstones() {
    let temp_dir = TempDir::new().unwrap();
    let db: Storage<IntKey, IntValue> = Storage::open(
        "test",
        StorageOpts {
            memtable_threshold: 2048,
            ..opts(temp_dir.path())
        },
    )
    .unwrap();

    for i in 0..5120 {
        db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
    }
    for i in 0..10 {
        db.delete(IntKey(i), IntValue::default()).unwrap();
    }
    // push the tombstones through a flush
    for i in 5120..10240 {
        db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
    }
    thread::sleep(Duration::from_millis(800));

    assert!(matches!(
        db.get(&IntKey(0)).unwrap_err(),
        StrataError::KeyNotFound
    ));
    assert!(matches!(
        db.get(&IntKey(9)).unwrap_err(),
        StrataError::KeyNotFound
    ));
    assert_eq!(IntValue::new(11), db.get(&IntKey(11)).unwrap());
    assert_eq!(IntValue::new(5119), db.get(&IntKey(5119)).unwrap());
}

#[test]
fn test_compaction_merges_level0_down() {
    let _ = env_logger::try_init();
    let temp_dir = TempDir::new().unwrap();
    let gc_wal_path = temp_dir.path().join("gc").join("gc-wal.log");

    let total_keys = 2560;
    {
        let db: Storage<IntKey, IntValue> = Storage::open(
            "test",
            StorageOpts {
                memtable_threshold: 1024,
                turn_on_compaction: true,
                level0_max_size_in_bytes: 2048,
                max_size_in_bytes_growth_factor: 2,
                compaction_time_interval: Duration::from_millis(50),
                ..opts(temp_dir.path())
            },
        )
        .unwrap();

        for i in 0..total_keys {
            db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
        }
        thread::sleep(Duration::from_millis(1500));

        let lsm = db.manifest().lsm();
        assert!(lsm.get_level(0).unwrap().size_in_bytes() <= 2048);
        assert!(lsm.depth() > 1, "expected compaction to create level 1");
        let deeper_tables: usize = (1..lsm.depth())
            .filter_map(|l| lsm.get_level(l))
            .map(|level| level.tables_count())
            .sum();
        assert!(deeper_tables >= 1);

        for i in 0..total_keys {
            assert_eq!(
                IntValue::new(i as i32),
                db.get(&IntKey(i)).unwrap(),
                "key {} lost across compaction",
                i
            );
        }
    }

    // after a clean shutdown the journal folds into empty partial sets
    let events = Wal::<CompactionEvent>::replay(&gc_wal_path).unwrap();
    let mut partial: std::collections::HashSet<std::path::PathBuf> =
        std::collections::HashSet::new();
    for event in events {
        match event {
            CompactionEvent::WriteStarted(p) | CompactionEvent::DeleteStarted(p) => {
                partial.insert(p);
            }
            CompactionEvent::WriteCompleted(p) | CompactionEvent::DeleteCompleted(p) => {
                partial.remove(&p);
            }
        }
    }
    assert!(partial.is_empty());
}

#[test]
fn test_manifest_persists_across_restart() {
    let temp_dir = TempDir::new().unwrap();
    let storage_opts = opts(temp_dir.path());

    let total_keys = 2560;
    {
        let db: Storage<IntKey, IntValue> =
            Storage::open("test", storage_opts.clone()).unwrap();
        for i in 0..=total_keys {
            db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
        }
        thread::sleep(Duration::from_millis(500));
        // drop closes the engine and takes a final manifest snapshot
    }

    let db: Storage<IntKey, IntValue> = Storage::open("test", storage_opts).unwrap();
    assert!(db.manifest().lsm().get_level(0).unwrap().tables_count() >= 10);
    for i in 0..total_keys {
        assert_eq!(
            IntValue::new(i as i32),
            db.get(&IntKey(i)).unwrap(),
            "key {} lost across restart",
            i
        );
    }
}

#[test]
fn test_concurrent_readers_after_flush() {
    let temp_dir = TempDir::new().unwrap();
    let db: Arc<Storage<IntKey, IntValue>> =
        Arc::new(Storage::open("test", opts(temp_dir.path())).unwrap());

    for i in 0..512 {
        db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
    }
    thread::sleep(Duration::from_millis(200));

    let mut readers = Vec::new();
    for t in 0..8 {
        let db = db.clone();
        readers.push(thread::spawn(move || {
            for i in (t..512).step_by(8) {
                assert_eq!(IntValue::new(i as i32), db.get(&IntKey(i)).unwrap());
            }
        }));
    }
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_string_keys_and_values() {
    let temp_dir = TempDir::new().unwrap();
    let db: Storage<StringKey, StringValue> =
        Storage::open("test", opts(temp_dir.path())).unwrap();

    for i in 0..64 {
        db.put(
            StringKey(format!("key-{:03}", i)),
            StringValue::new(format!("val-{:03}", i)),
        )
        .unwrap();
    }
    thread::sleep(Duration::from_millis(100));

    assert_eq!(
        StringValue::new("val-042"),
        db.get(&StringKey("key-042".into())).unwrap()
    );
    db.delete(StringKey("key-042".into()), StringValue::default())
        .unwrap();
    assert!(matches!(
        db.get(&StringKey("key-042".into())).unwrap_err(),
        StrataError::KeyNotFound
    ));
}

#[test]
fn test_read_all_sees_live_values_only() {
    let temp_dir = TempDir::new().unwrap();
    let db: Storage<IntKey, IntValue> = Storage::open(
        "test",
        StorageOpts {
            memtable_threshold: 4096,
            ..opts(temp_dir.path())
        },
    )
    .unwrap();

    for i in 0..100 {
        db.put(IntKey(i), IntValue::new(i as i32)).unwrap();
    }
    for i in 0..10 {
        db.delete(IntKey(i), IntValue::default()).unwrap();
    }

    let all = db.read_all().unwrap();
    assert_eq!(90, all.len());
}
