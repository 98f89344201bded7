//! RESP encoder: deterministic formatter from a [`Frame`] into wire bytes.

use super::error::{Error, Result};
use super::frame::Frame;

const CRLF: &[u8] = b"\r\n";

/// Encodes a single frame, recursively, per spec.md section 4.F's table.
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(frame, &mut out)?;
    Ok(out)
}

fn encode_into(frame: &Frame, out: &mut Vec<u8>) -> Result<()> {
    match frame {
        Frame::Null => out.extend_from_slice(b"_\r\n"),
        Frame::Simple(s) => encode_line(b'+', s.as_bytes(), out)?,
        Frame::Error(reason) => encode_line(b'-', reason.as_bytes(), out)?,
        Frame::Bool(true) => out.extend_from_slice(b"#t\r\n"),
        Frame::Bool(false) => out.extend_from_slice(b"#f\r\n"),
        Frame::Integer(n) => {
            out.push(b':');
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(CRLF);
        }
        Frame::Float(f) => {
            out.push(b',');
            out.extend_from_slice(format_float(*f).as_bytes());
            out.extend_from_slice(CRLF);
        }
        Frame::Bytes(bytes) => {
            out.push(b'$');
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(bytes);
            out.extend_from_slice(CRLF);
        }
        Frame::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            for item in items {
                encode_into(item, out)?;
            }
        }
        Frame::Map(pairs) => {
            out.push(b'%');
            out.extend_from_slice(pairs.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            for (k, v) in pairs {
                encode_into(k, out)?;
                encode_into(v, out)?;
            }
        }
        Frame::Set(items) => {
            out.push(b'~');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            for item in items {
                encode_into(item, out)?;
            }
        }
    }
    Ok(())
}

fn encode_line(tag: u8, body: &[u8], out: &mut Vec<u8>) -> Result<()> {
    if body.contains(&b'\r') || body.contains(&b'\n') {
        return Err(Error::EncodeFailure(
            "simple string/error body cannot contain CR or LF".to_string(),
        ));
    }
    out.push(tag);
    out.extend_from_slice(body);
    out.extend_from_slice(CRLF);
    Ok(())
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f == f64::INFINITY {
        "inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_scalars() {
        assert_eq!(encode(&Frame::Null).unwrap(), b"_\r\n");
        assert_eq!(encode(&Frame::ok()).unwrap(), b"+OK\r\n");
        assert_eq!(encode(&Frame::Bool(true)).unwrap(), b"#t\r\n");
        assert_eq!(encode(&Frame::Bool(false)).unwrap(), b"#f\r\n");
        assert_eq!(encode(&Frame::error("oops")).unwrap(), b"-oops\r\n");
        assert_eq!(encode(&Frame::Integer(-7)).unwrap(), b":-7\r\n");
    }

    #[test]
    fn encodes_float_specials() {
        assert_eq!(encode(&Frame::Float(f64::INFINITY)).unwrap(), b",inf\r\n");
        assert_eq!(encode(&Frame::Float(f64::NEG_INFINITY)).unwrap(), b",-inf\r\n");
        assert_eq!(encode(&Frame::Float(f64::NAN)).unwrap(), b",nan\r\n");
        assert_eq!(encode(&Frame::Float(1.5)).unwrap(), b",1.5\r\n");
    }

    #[test]
    fn encodes_bulk_string() {
        assert_eq!(encode(&Frame::bulk(*b"v")).unwrap(), b"$1\r\nv\r\n");
    }

    #[test]
    fn encodes_nested_array() {
        let frame = Frame::Array(vec![Frame::Integer(1), Frame::bulk(*b"x")]);
        assert_eq!(encode(&frame).unwrap(), b"*2\r\n:1\r\n$1\r\nx\r\n");
    }

    #[test]
    fn encodes_map_and_set() {
        let map = Frame::Map(vec![(Frame::bulk(*b"k"), Frame::Integer(1))]);
        assert_eq!(encode(&map).unwrap(), b"%1\r\n$1\r\nk\r\n:1\r\n");
        let set = Frame::Set(vec![Frame::Integer(1)]);
        assert_eq!(encode(&set).unwrap(), b"~1\r\n:1\r\n");
    }

    #[test]
    fn rejects_simple_string_containing_crlf() {
        assert!(encode(&Frame::Simple("bad\r\nstring".to_string())).is_err());
    }
}
