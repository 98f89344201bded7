//! Sharded engine: routes keys across N independent [`Store`] instances by
//! a stable hash, so writes to different keys never contend on the same
//! writer mutex.
//!
//! There is no cross-shard transaction support; spec.md explicitly leaves
//! cross-shard atomicity out of scope, so `MULTI`/`EXEC` at the `net` layer
//! only guarantees atomicity for commands landing on a single connection's
//! view of each shard in isolation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::Result;
use super::store::{self, Store};
use crate::value::Value;

/// A collection of [`Store`]s behind a single logical keyspace.
pub struct ShardedEngine {
    shards: Vec<Store>,
}

impl ShardedEngine {
    /// Opens `shard_count` stores under `dir`, one per subdirectory
    /// `shard-<n>`, each rotating at the default max file size. `shard_count`
    /// must match across restarts: changing it would silently misroute
    /// existing keys.
    pub fn open(dir: impl AsRef<Path>, shard_count: usize) -> Result<Self> {
        Self::open_with_config(dir, shard_count, store::DEFAULT_MAX_FILE_SIZE)
    }

    /// Opens `shard_count` stores under `dir`, each rotating its active file
    /// once it grows past `max_file_size` bytes (the configured
    /// `log_file_size`).
    pub fn open_with_config(
        dir: impl AsRef<Path>,
        shard_count: usize,
        max_file_size: u64,
    ) -> Result<Self> {
        assert!(shard_count > 0, "shard_count must be at least 1");
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut shards = Vec::with_capacity(shard_count);
        for i in 0..shard_count {
            shards.push(Store::open_with_config(
                Self::shard_dir(dir, i),
                max_file_size,
            )?);
        }
        Ok(ShardedEngine { shards })
    }

    fn shard_dir(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("shard_{index}"))
    }

    /// Routes `key` to a shard index via `crc32fast::hash(key) % shard_count`.
    /// This mapping is frozen: it must not change between releases or
    /// existing databases would route to the wrong shard on upgrade.
    pub fn shard_index(&self, key: &[u8]) -> usize {
        (crc32fast::hash(key) as usize) % self.shards.len()
    }

    fn shard_for(&self, key: &[u8]) -> &Store {
        &self.shards[self.shard_index(key)]
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        self.shard_for(key).get(key)
    }

    pub fn expiration_of(&self, key: &[u8]) -> Option<u64> {
        self.shard_for(key).expiration_of(key)
    }

    pub fn put(&self, key: &[u8], value: &Value, expiration_ms: u64) -> Result<()> {
        self.shard_for(key).put(key, value, expiration_ms)
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.shard_for(key).delete(key)
    }

    /// Deletes every key in `keys`, grouping them by shard first so each
    /// shard's store is called exactly once with its own subset rather than
    /// once per key. Returns the total number of keys that were actually
    /// present and removed.
    pub fn delete_many(&self, keys: &[Vec<u8>]) -> Result<usize> {
        let mut by_shard: HashMap<usize, Vec<Vec<u8>>> = HashMap::new();
        for key in keys {
            by_shard
                .entry(self.shard_index(key))
                .or_default()
                .push(key.clone());
        }

        let mut deleted = 0;
        for (index, shard_keys) in by_shard {
            deleted += self.shards[index].delete_many(&shard_keys)?;
        }
        Ok(deleted)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns every key present across all shards, per spec.md section
    /// 4.D/4.E's `keys()` operation.
    pub fn keys(&self) -> std::collections::HashSet<Vec<u8>> {
        self.shards.iter().flat_map(Store::keys).collect()
    }

    /// Unconditionally merges every shard. Driven by the server's
    /// `merge_interval` tick; each `Store::merge` is already a no-op when
    /// there is nothing to compact, so calling this on a schedule is cheap.
    pub fn merge_all(&self) -> Result<()> {
        for shard in &self.shards {
            shard.merge()?;
        }
        Ok(())
    }

    /// Forces every shard to rotate to a new active datafile, regardless of
    /// the current active file's size. Driven by the server's
    /// `log_rotation_interval` tick.
    pub fn rotate_all(&self) -> Result<()> {
        for shard in &self.shards {
            shard.rotate()?;
        }
        Ok(())
    }

    pub fn sync_all(&self) -> Result<()> {
        for shard in &self.shards {
            shard.sync()?;
        }
        Ok(())
    }
}
