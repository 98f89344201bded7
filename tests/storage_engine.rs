//! Integration tests exercising the storage engine as a whole: a sharded
//! engine backed by real datafiles on disk, rather than a single `Store`'s
//! unit tests.

use beetle::storage::ShardedEngine;
use beetle::value::Value;

#[test]
fn survives_restart_with_many_keys_across_shards() {
    let dir = tempfile::tempdir().unwrap();

    {
        let engine = ShardedEngine::open(dir.path(), 4).unwrap();
        for i in 0..500 {
            let key = format!("key-{i}");
            engine
                .put(key.as_bytes(), &Value::Bytes(format!("value-{i}").into_bytes()), 0)
                .unwrap();
        }
        engine.sync_all().unwrap();
    }

    let engine = ShardedEngine::open(dir.path(), 4).unwrap();
    assert_eq!(engine.len(), 500);
    for i in 0..500 {
        let key = format!("key-{i}");
        let expected = Value::Bytes(format!("value-{i}").into_bytes());
        assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(expected));
    }
}

#[test]
fn deleted_key_stays_deleted_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = ShardedEngine::open(dir.path(), 2).unwrap();
        engine.put(b"gone", &Value::Int(1), 0).unwrap();
        assert!(engine.delete(b"gone").unwrap());
    }
    let engine = ShardedEngine::open(dir.path(), 2).unwrap();
    assert_eq!(engine.get(b"gone").unwrap(), None);
}

#[test]
fn rotate_all_forces_a_new_active_file_per_shard_without_losing_data() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ShardedEngine::open(dir.path(), 3).unwrap();
    for i in 0..20 {
        engine
            .put(format!("k{i}").as_bytes(), &Value::Int(i), 0)
            .unwrap();
    }
    engine.rotate_all().unwrap();
    for i in 0..20 {
        assert_eq!(
            engine.get(format!("k{i}").as_bytes()).unwrap(),
            Some(Value::Int(i))
        );
    }
}

#[test]
fn merge_all_compacts_overwritten_keys_without_losing_the_latest_value() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ShardedEngine::open(dir.path(), 1).unwrap();
    for generation in 0..5 {
        for i in 0..10 {
            engine
                .put(format!("k{i}").as_bytes(), &Value::Int(generation), 0)
                .unwrap();
        }
    }
    engine.merge_all().unwrap();
    for i in 0..10 {
        assert_eq!(
            engine.get(format!("k{i}").as_bytes()).unwrap(),
            Some(Value::Int(4))
        );
    }
}

#[test]
fn expired_entry_reads_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ShardedEngine::open(dir.path(), 1).unwrap();
    engine.put(b"ephemeral", &Value::Int(1), 1).unwrap(); // expires at ms 1
    assert_eq!(engine.get(b"ephemeral").unwrap(), None);
}
