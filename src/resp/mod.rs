//! RESP (REdis Serialization Protocol) codec: a deterministic encoder and
//! a streaming decoder over a shared abstract value universe ([`Frame`]).

pub mod decode;
pub mod encode;
pub mod error;
pub mod frame;

pub use decode::{decode, decode_complete};
pub use encode::encode;
pub use error::{Error, Result};
pub use frame::Frame;
