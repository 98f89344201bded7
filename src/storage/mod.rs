//! The Bitcask-style storage engine: entry codec, append-only datafiles,
//! the in-memory keydir, the per-shard store, and the shard router tying
//! them together.

pub mod datafile;
pub mod entry;
pub mod error;
pub mod keydir;
pub mod shard;
pub mod store;

pub use error::{Error, Result};
pub use shard::ShardedEngine;
pub use store::Store;
