//! The value universe stored inside a log entry's value blob.
//!
//! Every entry's value is an opaque, self-describing blob produced by this
//! module's codec. The storage engine never looks inside it; the codec just
//! has to be deterministic so that re-encoding the same logical value always
//! produces the same bytes (required for CRC stability across merges).

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A tagged value that can be stored as the payload of a log entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
}

/// Sentinel value that marks a tombstone (deleted key) on disk.
///
/// A single `0x00` byte string, per spec.md section 3. Application code
/// should never legitimately store this exact blob as a live value; callers
/// wanting to store one arbitrary byte should prefer `Value::Bytes(vec![1])`
/// style payloads or accept the (documented) collision.
pub fn tombstone() -> Value {
    Value::Bytes(vec![0x00])
}

/// Returns true if `value` is the designated tombstone sentinel.
pub fn is_tombstone(value: &Value) -> bool {
    matches!(value, Value::Bytes(b) if b.as_slice() == [0x00])
}

impl Value {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(bytes.into())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

// Tag bytes for the on-disk encoding. Stable across versions; do not reorder.
const TAG_NULL: u8 = 0;
const TAG_BOOL_FALSE: u8 = 1;
const TAG_BOOL_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_SEQ: u8 = 6;
const TAG_MAP: u8 = 7;
const TAG_SET: u8 = 8;

/// Serializes a `Value` into its deterministic on-disk representation.
///
/// Maps and sets are sorted by their canonically-encoded key/member bytes
/// before being written, so insertion order never leaks into the CRC.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_BOOL_FALSE),
        Value::Bool(true) => out.push(TAG_BOOL_TRUE),
        Value::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            // Canonicalize -0.0 to 0.0 and all NaN bit patterns to one
            // representative so that equal floats always encode identically.
            let bits = if *f == 0.0 {
                0u64
            } else if f.is_nan() {
                u64::MAX
            } else {
                f.to_bits()
            };
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(b.len() as u32).to_be_bytes());
            out.extend_from_slice(b);
        }
        Value::Seq(items) => {
            out.push(TAG_SEQ);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(pairs) => {
            out.push(TAG_MAP);
            let mut encoded: Vec<(Vec<u8>, Vec<u8>)> = pairs
                .iter()
                .map(|(k, v)| (encode(k), encode(v)))
                .collect();
            encoded.sort_by(|a, b| a.0.cmp(&b.0));
            encoded.dedup_by(|a, b| a.0 == b.0);
            out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
            for (k, v) in encoded {
                out.extend_from_slice(&(k.len() as u32).to_be_bytes());
                out.extend_from_slice(&k);
                out.extend_from_slice(&(v.len() as u32).to_be_bytes());
                out.extend_from_slice(&v);
            }
        }
        Value::Set(items) => {
            out.push(TAG_SET);
            let mut encoded: Vec<Vec<u8>> = items.iter().map(encode).collect();
            encoded.sort();
            encoded.dedup();
            out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
            for item in encoded {
                out.extend_from_slice(&(item.len() as u32).to_be_bytes());
                out.extend_from_slice(&item);
            }
        }
    }
}

/// Error raised while decoding a value blob.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("value blob ended unexpectedly")]
    UnexpectedEof,
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    #[error("trailing bytes after a complete value")]
    TrailingBytes,
}

/// Deserializes a `Value` previously produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let (value, rest) = decode_prefix(bytes)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

fn decode_prefix(bytes: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    let (&tag, rest) = bytes.split_first().ok_or(DecodeError::UnexpectedEof)?;
    match tag {
        TAG_NULL => Ok((Value::Null, rest)),
        TAG_BOOL_FALSE => Ok((Value::Bool(false), rest)),
        TAG_BOOL_TRUE => Ok((Value::Bool(true), rest)),
        TAG_INT => {
            let (raw, rest) = take(rest, 8)?;
            let n = i64::from_be_bytes(raw.try_into().unwrap());
            Ok((Value::Int(n), rest))
        }
        TAG_FLOAT => {
            let (raw, rest) = take(rest, 8)?;
            let bits = u64::from_be_bytes(raw.try_into().unwrap());
            Ok((Value::Float(f64::from_bits(bits)), rest))
        }
        TAG_BYTES => {
            let (len, rest) = take_u32(rest)?;
            let (data, rest) = take(rest, len as usize)?;
            Ok((Value::Bytes(data.to_vec()), rest))
        }
        TAG_SEQ => {
            let (len, mut rest) = take_u32(rest)?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let (item, next) = decode_prefix(rest)?;
                items.push(item);
                rest = next;
            }
            Ok((Value::Seq(items), rest))
        }
        TAG_MAP => {
            let (len, mut rest) = take_u32(rest)?;
            let mut pairs = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let (klen, r) = take_u32(rest)?;
                let (kbytes, r) = take(r, klen as usize)?;
                let key = decode(kbytes)?;
                let (vlen, r) = take_u32(r)?;
                let (vbytes, r) = take(r, vlen as usize)?;
                let value = decode(vbytes)?;
                pairs.push((key, value));
                rest = r;
            }
            Ok((Value::Map(pairs), rest))
        }
        TAG_SET => {
            let (len, mut rest) = take_u32(rest)?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let (ilen, r) = take_u32(rest)?;
                let (ibytes, r) = take(r, ilen as usize)?;
                items.push(decode(ibytes)?);
                rest = r;
            }
            Ok((Value::Set(items), rest))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn take(bytes: &[u8], n: usize) -> Result<(&[u8], &[u8]), DecodeError> {
    if bytes.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(bytes.split_at(n))
}

fn take_u32(bytes: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    let (raw, rest) = take(bytes, 4)?;
    Ok((u32::from_be_bytes(raw.try_into().unwrap()), rest))
}

/// Total ordering over `Value`, used only to produce the canonical sort order
/// for map keys and set members. Backed by the deterministic byte encoding so
/// it agrees with equality on encoded form.
impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        encode(self).cmp(&encode(other))
    }
}

/// Convenience constructor for building a deterministic mapping from an
/// iterator, deduplicating keys by keeping the last write (mirrors the
/// log's last-writer-wins semantics).
pub fn map_from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
    let mut map: BTreeMap<Vec<u8>, (Value, Value)> = BTreeMap::new();
    for (k, v) in pairs {
        map.insert(encode(&k), (k, v));
    }
    Value::Map(map.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let bytes = encode(&v);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn scalars_roundtrip() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::Int(-42));
        roundtrip(Value::Int(0));
        roundtrip(Value::Float(3.5));
        roundtrip(Value::Float(f64::INFINITY));
        roundtrip(Value::Float(f64::NEG_INFINITY));
        roundtrip(Value::Bytes(b"hello".to_vec()));
    }

    #[test]
    fn nan_canonicalizes() {
        let a = encode(&Value::Float(f64::NAN));
        let b = encode(&Value::Float(-f64::NAN));
        assert_eq!(a, b);
    }

    #[test]
    fn nested_containers_roundtrip() {
        roundtrip(Value::Seq(vec![Value::Int(1), Value::Bytes(b"x".to_vec())]));
        roundtrip(Value::Map(vec![(
            Value::Bytes(b"k".to_vec()),
            Value::Int(7),
        )]));
        roundtrip(Value::Set(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn map_encoding_is_order_independent() {
        let a = Value::Map(vec![
            (Value::Int(1), Value::Int(10)),
            (Value::Int(2), Value::Int(20)),
        ]);
        let b = Value::Map(vec![
            (Value::Int(2), Value::Int(20)),
            (Value::Int(1), Value::Int(10)),
        ]);
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn tombstone_is_recognized() {
        assert!(is_tombstone(&tombstone()));
        assert!(!is_tombstone(&Value::Bytes(b"a".to_vec())));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert_eq!(decode(&[0xFF]), Err(DecodeError::UnknownTag(0xFF)));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert_eq!(decode(&[TAG_BYTES, 0, 0, 0, 5, b'h']), Err(DecodeError::UnexpectedEof));
    }

    // Property-based coverage of spec.md section 8 property 1 (the codec must
    // round-trip every value shape): a recursive `Arbitrary`-style strategy
    // covering every variant, bounded in depth so nested `Seq`/`Map`/`Set`
    // terminate.
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn leaf() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Int),
                any::<f64>().prop_map(Value::Float),
                proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            ]
        }

        fn value_tree() -> impl Strategy<Value = Value> {
            leaf().prop_recursive(3, 16, 4, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Seq),
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Set),
                    proptest::collection::vec((inner.clone(), inner), 0..4).prop_map(Value::Map),
                ]
            })
        }

        proptest! {
            #[test]
            fn decode_of_encode_is_identity(v in value_tree()) {
                let bytes = encode(&v);
                let decoded = decode(&bytes).unwrap();
                // Maps/sets are canonicalized (sorted, deduplicated) on encode,
                // so re-encoding the decoded value must be byte-identical even
                // when the original had duplicate/unsorted members.
                prop_assert_eq!(encode(&decoded), bytes);
            }
        }
    }
}
