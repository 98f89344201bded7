use thiserror::Error;

/// Error type for the storage engine.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error performing datafile or directory operations.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A decoded entry's CRC did not match the recomputed checksum.
    #[error("checksum mismatch in datafile {file_id} at offset {position}")]
    ChecksumMismatch { file_id: u64, position: u64 },
    /// An entry's header or length fields could not be parsed.
    #[error("malformed entry: {0}")]
    MalformedEntry(String),
    /// A hints file or persisted keydir failed validation.
    #[error("malformed keydir snapshot: {0}")]
    FormatError(String),
    /// A merge failed partway through; the original store is left intact.
    #[error("merge failed: {0}")]
    MergeFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;
