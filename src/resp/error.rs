use thiserror::Error;

/// Error type for the RESP codec.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The first byte of a frame did not match any recognized RESP type tag.
    #[error("invalid RESP type byte {0:#x}")]
    InvalidType(u8),
    /// The caller asserted a frame was complete but no terminating CRLF
    /// was found.
    #[error("malformed line: missing CRLF terminator")]
    MalformedLine,
    /// A length or count field expected to be an ASCII integer wasn't one.
    #[error("invalid integer in frame")]
    InvalidInteger,
    /// A bulk string or array length was negative and not the designated
    /// `-1` null sentinel.
    #[error("invalid length (negative, not -1)")]
    InvalidLength,
    /// A declared bulk string length exceeds what remains in the buffer.
    #[error("insufficient data for declared length")]
    InsufficientData,
    /// Streaming decode ran out of bytes mid-frame; not a format error,
    /// just a signal to wait for more bytes.
    #[error("need more data")]
    NeedMoreData,
    /// The encoder was given a value it cannot represent.
    #[error("encode failure: {0}")]
    EncodeFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;
