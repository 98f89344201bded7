//! In-memory key directory: maps every live key to the location of its
//! most recent entry on disk, plus a hints-file format for skipping a full
//! datafile scan on restart.
//!
//! Modeled on the teacher's `DashMap<String, CmdPos>` index, generalized to
//! arbitrary byte keys and to carrying expiration alongside the location so
//! TTL filtering at read time never needs to touch the datafile.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Location of one entry inside a datafile, plus the fields needed to
/// answer liveness/TTL questions without re-reading the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeydirEntry {
    pub file_id: u64,
    pub position: u64,
    pub size: u64,
    pub expiration_ms: u64,
}

/// The live index: key bytes to their newest on-disk location.
///
/// A tombstone is represented by removing the key from the map entirely —
/// the map only ever holds locations of entries a reader should resolve to
/// a live value.
#[derive(Debug, Default)]
pub struct Keydir {
    map: DashMap<Vec<u8>, KeydirEntry>,
}

impl Keydir {
    pub fn new() -> Self {
        Keydir {
            map: DashMap::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<KeydirEntry> {
        self.map.get(key).map(|r| *r.value())
    }

    pub fn insert(&self, key: Vec<u8>, entry: KeydirEntry) {
        self.map.insert(key, entry);
    }

    pub fn remove(&self, key: &[u8]) -> Option<KeydirEntry> {
        self.map.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Vec<u8>, KeydirEntry)> + '_ {
        self.map.iter().map(|r| (r.key().clone(), *r.value()))
    }

    /// Removes every entry whose `file_id` is in `file_ids`. Used after a
    /// merge replaces a set of old datafiles: anything still pointing at
    /// them was superseded by a newer write racing the merge and is dropped
    /// from the rewritten set, so the live index must not keep stale
    /// pointers into files about to be deleted.
    pub fn retain_file_ids_not_in(&self, file_ids: &std::collections::HashSet<u64>) {
        self.map.retain(|_, v| !file_ids.contains(&v.file_id));
    }

    /// Serializes the current keydir to a hints file at `path`, one entry
    /// per key, via bincode. The hints file lets restart skip scanning every
    /// datafile's full contents.
    pub fn persist_hints(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            let snapshot: HashMap<Vec<u8>, KeydirEntry> =
                self.map.iter().map(|r| (r.key().clone(), *r.value())).collect();
            bincode::serialize_into(&mut writer, &snapshot)
                .map_err(|e| Error::FormatError(e.to_string()))?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Loads a hints file previously written by [`Self::persist_hints`].
    /// Every entry's `value_size` must be `> 0` (a live key always points at
    /// a non-empty encoded record); a hand-edited or corrupted hints file
    /// violating that is rejected with `FormatError` rather than loaded.
    pub fn load_hints(path: &Path) -> Result<Keydir> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let snapshot: HashMap<Vec<u8>, KeydirEntry> = bincode::deserialize_from(reader)
            .map_err(|e| Error::FormatError(e.to_string()))?;
        let map = DashMap::new();
        for (k, v) in snapshot {
            if v.size == 0 {
                return Err(Error::FormatError(format!(
                    "hints entry for key {k:?} has value_size 0"
                )));
            }
            map.insert(k, v);
        }
        Ok(Keydir { map })
    }
}
