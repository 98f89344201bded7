//! RESP streaming decoder: pull as many complete frames as possible out of
//! a byte buffer, leaving a trailing partial frame for the next read.

use super::error::{Error, Result};
use super::frame::Frame;

/// Decodes every complete frame available at the front of `buf`, returning
/// the decoded values in arrival order and whatever bytes were left over
/// (a trailing partial frame, or empty if everything was consumed).
///
/// No frame is emitted until fully present in `buf`; an incomplete trailing
/// frame silently stops the loop rather than erroring, since in a
/// streaming context that's simply "wait for more bytes".
pub fn decode(buf: &[u8]) -> Result<(Vec<Frame>, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        match parse_one(&buf[pos..]) {
            Ok((frame, consumed)) => {
                frames.push(frame);
                pos += consumed;
            }
            Err(Error::NeedMoreData) | Err(Error::InsufficientData) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((frames, buf[pos..].to_vec()))
}

/// Decodes exactly one frame from a buffer the caller asserts holds a
/// complete frame (and nothing else). Any incompleteness that streaming
/// `decode` would treat as "wait for more" becomes a hard `MalformedLine`
/// error here, since there is no more data coming.
pub fn decode_complete(buf: &[u8]) -> Result<Frame> {
    match parse_one(buf) {
        Ok((frame, consumed)) if consumed == buf.len() => Ok(frame),
        Ok(_) => Err(Error::MalformedLine),
        Err(Error::NeedMoreData) | Err(Error::InsufficientData) => Err(Error::MalformedLine),
        Err(e) => Err(e),
    }
}

fn parse_one(buf: &[u8]) -> Result<(Frame, usize)> {
    let (&tag, rest) = buf.split_first().ok_or(Error::NeedMoreData)?;
    let (frame, used) = match tag {
        b'_' => {
            let (line, used) = read_line(rest)?;
            if !line.is_empty() {
                return Err(Error::MalformedLine);
            }
            (Frame::Null, used)
        }
        b'+' => {
            let (line, used) = read_line(rest)?;
            (Frame::Simple(ascii_string(line)?), used)
        }
        b'-' => {
            let (line, used) = read_line(rest)?;
            (Frame::Error(ascii_string(line)?), used)
        }
        b':' | b'(' => {
            let (line, used) = read_line(rest)?;
            (Frame::Integer(parse_int(line)?), used)
        }
        b',' => {
            let (line, used) = read_line(rest)?;
            (Frame::Float(parse_float(line)?), used)
        }
        b'#' => {
            let (line, used) = read_line(rest)?;
            match line {
                b"t" => (Frame::Bool(true), used),
                b"f" => (Frame::Bool(false), used),
                _ => return Err(Error::MalformedLine),
            }
        }
        b'$' | b'!' => parse_bulk(rest)?,
        b'*' => parse_aggregate(rest, Frame::Array as fn(_) -> _)?,
        b'~' => parse_aggregate(rest, Frame::Set as fn(_) -> _)?,
        b'%' => parse_map(rest)?,
        other => return Err(Error::InvalidType(other)),
    };
    Ok((frame, 1 + used))
}

fn read_line(buf: &[u8]) -> Result<(&[u8], usize)> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Ok((&buf[..i], i + 2));
        }
    }
    Err(Error::NeedMoreData)
}

fn ascii_string(line: &[u8]) -> Result<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| Error::MalformedLine)
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::InvalidInteger)
}

fn parse_float(line: &[u8]) -> Result<f64> {
    let s = std::str::from_utf8(line).map_err(|_| Error::MalformedLine)?;
    match s {
        "inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        "nan" => Ok(f64::NAN),
        _ => s.parse().map_err(|_| Error::MalformedLine),
    }
}

/// Parses a bulk string (`$`) or bulk error (`!`) body; both decode to
/// `Frame::Bytes` in the abstract value universe.
fn parse_bulk(rest: &[u8]) -> Result<(Frame, usize)> {
    let (line, header_len) = read_line(rest)?;
    let len = parse_int(line)?;
    if len == -1 {
        return Ok((Frame::Null, header_len));
    }
    if len < -1 {
        return Err(Error::InvalidLength);
    }
    let len = len as usize;
    let total = header_len + len + 2;
    if rest.len() < total {
        return Err(Error::InsufficientData);
    }
    if &rest[header_len + len..total] != b"\r\n" {
        return Err(Error::MalformedLine);
    }
    let data = rest[header_len..header_len + len].to_vec();
    Ok((Frame::Bytes(data), total))
}

fn parse_aggregate(rest: &[u8], build: fn(Vec<Frame>) -> Frame) -> Result<(Frame, usize)> {
    let (line, mut pos) = read_line(rest)?;
    let len = parse_int(line)?;
    if len == -1 {
        return Ok((Frame::Null, pos));
    }
    if len < -1 {
        return Err(Error::InvalidLength);
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let (item, consumed) = parse_one(&rest[pos..])?;
        items.push(item);
        pos += consumed;
    }
    Ok((build(items), pos))
}

fn parse_map(rest: &[u8]) -> Result<(Frame, usize)> {
    let (line, mut pos) = read_line(rest)?;
    let len = parse_int(line)?;
    if len == -1 {
        return Ok((Frame::Null, pos));
    }
    if len < -1 {
        return Err(Error::InvalidLength);
    }
    let mut pairs = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let (key, consumed) = parse_one(&rest[pos..])?;
        pos += consumed;
        let (value, consumed) = parse_one(&rest[pos..])?;
        pos += consumed;
        pairs.push((key, value));
    }
    Ok((Frame::Map(pairs), pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::encode::encode;

    fn roundtrip(frame: Frame) {
        let bytes = encode(&frame).unwrap();
        let (frames, rest) = decode(&bytes).unwrap();
        assert_eq!(frames, vec![frame]);
        assert!(rest.is_empty());
    }

    #[test]
    fn roundtrips_every_shape() {
        roundtrip(Frame::Null);
        roundtrip(Frame::ok());
        roundtrip(Frame::Bool(true));
        roundtrip(Frame::Bool(false));
        roundtrip(Frame::error("ERR bad"));
        roundtrip(Frame::Integer(42));
        roundtrip(Frame::Float(3.5));
        roundtrip(Frame::bulk(*b"hi"));
        roundtrip(Frame::Array(vec![Frame::Integer(1), Frame::bulk(*b"x")]));
        roundtrip(Frame::Map(vec![(Frame::bulk(*b"k"), Frame::Integer(1))]));
        roundtrip(Frame::Set(vec![Frame::Integer(1), Frame::Integer(2)]));
    }

    #[test]
    fn legacy_null_forms_decode_to_null() {
        let (frames, rest) = decode(b"$-1\r\n").unwrap();
        assert_eq!(frames, vec![Frame::Null]);
        assert!(rest.is_empty());

        let (frames, rest) = decode(b"*-1\r\n").unwrap();
        assert_eq!(frames, vec![Frame::Null]);
        assert!(rest.is_empty());
    }

    #[test]
    fn decodes_pipelined_frames_in_one_buffer() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"+OK\r\n");
        bytes.extend_from_slice(b":7\r\n");
        let (frames, rest) = decode(&bytes).unwrap();
        assert_eq!(frames, vec![Frame::ok(), Frame::Integer(7)]);
        assert!(rest.is_empty());
    }

    #[test]
    fn streaming_split_anywhere_yields_same_frames() {
        let whole = b"*2\r\n$3\r\nfoo\r\n:9\r\n".to_vec();
        for split in 0..=whole.len() {
            let (first_frames, leftover) = decode(&whole[..split]).unwrap();
            let mut combined = leftover;
            combined.extend_from_slice(&whole[split..]);
            let (second_frames, rest) = decode(&combined).unwrap();
            let mut all = first_frames;
            all.extend(second_frames);
            assert_eq!(
                all,
                vec![Frame::Array(vec![Frame::bulk(*b"foo"), Frame::Integer(9)])]
            );
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn partial_frame_is_left_unconsumed_not_an_error() {
        let (frames, rest) = decode(b"$5\r\nhel").unwrap();
        assert!(frames.is_empty());
        assert_eq!(rest, b"$5\r\nhel");
    }

    #[test]
    fn unknown_type_byte_is_an_error() {
        assert_eq!(decode(b"?\r\n"), Err(Error::InvalidType(b'?')));
    }

    #[test]
    fn negative_length_other_than_minus_one_is_invalid() {
        assert_eq!(decode(b"$-2\r\n"), Err(Error::InvalidLength));
    }

    #[test]
    fn non_integer_length_is_invalid() {
        assert_eq!(decode(b"$abc\r\n"), Err(Error::InvalidInteger));
    }

    #[test]
    fn big_number_decodes_as_integer() {
        let (frames, _) = decode(b"(12345\r\n").unwrap();
        assert_eq!(frames, vec![Frame::Integer(12345)]);
    }

    #[test]
    fn bulk_error_decodes_as_bytes() {
        let (frames, _) = decode(b"!5\r\nabcde\r\n").unwrap();
        assert_eq!(frames, vec![Frame::Bytes(b"abcde".to_vec())]);
    }

    #[test]
    fn decode_complete_rejects_truncated_frame() {
        assert_eq!(decode_complete(b"$5\r\nhel"), Err(Error::MalformedLine));
    }
}
