//! End-to-end RESP codec tests: encode a frame, decode it back, across the
//! full type universe the wire protocol supports.

use beetle::resp::{decode, decode_complete, encode, Frame};

fn roundtrip(frame: Frame) {
    let bytes = encode(&frame).unwrap();
    assert_eq!(decode_complete(&bytes).unwrap(), frame);
}

#[test]
fn roundtrips_every_scalar_and_aggregate_type() {
    roundtrip(Frame::Null);
    roundtrip(Frame::Simple("OK".to_string()));
    roundtrip(Frame::Error("ERR boom".to_string()));
    roundtrip(Frame::Bool(true));
    roundtrip(Frame::Bool(false));
    roundtrip(Frame::Integer(-42));
    roundtrip(Frame::Float(3.5));
    roundtrip(Frame::Bytes(b"hello world".to_vec()));
    roundtrip(Frame::Array(vec![Frame::Integer(1), Frame::bulk(*b"two")]));
    roundtrip(Frame::Set(vec![Frame::Integer(1), Frame::Integer(2)]));
    roundtrip(Frame::Map(vec![(
        Frame::bulk(*b"key"),
        Frame::Integer(7),
    )]));
}

#[test]
fn pipelined_commands_decode_in_arrival_order() {
    let ping = encode(&Frame::Array(vec![Frame::bulk(*b"PING")])).unwrap();
    let set = encode(&Frame::Array(vec![
        Frame::bulk(*b"SET"),
        Frame::bulk(*b"k"),
        Frame::bulk(*b"v"),
    ]))
    .unwrap();

    let mut buf = Vec::new();
    buf.extend_from_slice(&ping);
    buf.extend_from_slice(&set);

    let (frames, leftover) = decode(&buf).unwrap();
    assert_eq!(frames.len(), 2);
    assert!(leftover.is_empty());
    assert_eq!(frames[0], Frame::Array(vec![Frame::bulk(*b"PING")]));
}

#[test]
fn a_frame_split_across_two_reads_is_not_emitted_until_complete() {
    let full = encode(&Frame::Array(vec![
        Frame::bulk(*b"GET"),
        Frame::bulk(*b"key"),
    ]))
    .unwrap();
    let midpoint = full.len() / 2;

    let (frames, leftover) = decode(&full[..midpoint]).unwrap();
    assert!(frames.is_empty());
    assert_eq!(leftover, &full[..midpoint]);

    let mut rest = leftover;
    rest.extend_from_slice(&full[midpoint..]);
    let (frames, leftover) = decode(&rest).unwrap();
    assert_eq!(frames.len(), 1);
    assert!(leftover.is_empty());
}
