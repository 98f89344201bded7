//! Command dispatcher: takes a parsed RESP command array and an absolute
//! "now" timestamp, routes to a handler by a static match on the
//! upper-cased command name (the command set is small and fixed, so a
//! match reads better than a hashmap of closures), and returns a reply
//! frame. Usage errors never propagate as hard failures — they become
//! `error { reason }` replies, per spec.md section 4.H.

use crate::resp::Frame;
use crate::storage::ShardedEngine;
use crate::value::Value;

use super::error::{Error, Result};

/// Normalizes and executes one command array, returning the reply to hand
/// to the RESP encoder. Never panics on malformed client input.
pub fn dispatch(engine: &ShardedEngine, args: &[Vec<u8>], now_ms: u64) -> Frame {
    match execute(engine, args, now_ms) {
        Ok(frame) => frame,
        Err(e) => Frame::error(reply_reason(&e)),
    }
}

fn reply_reason(e: &Error) -> String {
    match e {
        Error::UnknownCommand(name) => format!("ERR unknown command '{name}'"),
        Error::WrongArity(name) => format!("ERR wrong number of arguments for '{name}' command"),
        Error::SyntaxError => "ERR syntax error".to_string(),
        Error::EmptyKey => "ERR key must not be empty".to_string(),
        Error::TransactionError(msg) => msg.clone(),
        other => format!("ERR {other}"),
    }
}

fn execute(engine: &ShardedEngine, args: &[Vec<u8>], now_ms: u64) -> Result<Frame> {
    let (name, rest) = args.split_first().ok_or(Error::SyntaxError)?;
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();

    match name.as_str() {
        "PING" => ping(rest),
        "TTL" => ttl(engine, rest, now_ms),
        "GET" => get(engine, rest),
        "SET" => set(engine, rest, now_ms),
        "DEL" => del(engine, rest),
        "APPEND" => append(engine, rest, now_ms),
        "GETDEL" => getdel(engine, rest),
        "GETEX" => getex(engine, rest, now_ms),
        "GETRANGE" => getrange(engine, rest),
        "STRLEN" => strlen(engine, rest),
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

fn ping(args: &[Vec<u8>]) -> Result<Frame> {
    match args.len() {
        0 => Ok(Frame::Simple("PONG".to_string())),
        1 => Ok(Frame::bulk(args[0].clone())),
        _ => Err(Error::WrongArity("PING".to_string())),
    }
}

fn ttl(engine: &ShardedEngine, args: &[Vec<u8>], now_ms: u64) -> Result<Frame> {
    let [key] = require_arity(args, "TTL")?;
    match engine.expiration_of(key) {
        None => Ok(Frame::Integer(-2)),
        Some(0) => Ok(Frame::Integer(-1)),
        Some(deadline) => {
            let remaining_ms = deadline.saturating_sub(now_ms);
            let seconds = (remaining_ms + 999) / 1000;
            Ok(Frame::Integer(seconds as i64))
        }
    }
}

fn get(engine: &ShardedEngine, args: &[Vec<u8>]) -> Result<Frame> {
    let [key] = require_arity(args, "GET")?;
    Ok(value_to_frame(engine.get(key)?))
}

fn value_to_frame(value: Option<Value>) -> Frame {
    match value {
        Some(v) => Frame::bulk(v.into_bytes().unwrap_or_default()),
        None => Frame::Null,
    }
}

#[derive(Default)]
struct SetOptions {
    nx: bool,
    xx: bool,
    get: bool,
    expiry: Option<ExpiryOption>,
}

enum ExpiryOption {
    Ex(u64),
    Px(u64),
    ExAt(u64),
    PxAt(u64),
    KeepTtl,
}

fn set(engine: &ShardedEngine, args: &[Vec<u8>], now_ms: u64) -> Result<Frame> {
    if args.len() < 2 {
        return Err(Error::WrongArity("SET".to_string()));
    }
    let key = &args[0];
    require_non_empty_key(key)?;
    let value = args[1].clone();
    let options = parse_set_options(&args[2..])?;

    if options.nx && options.xx {
        return Err(Error::SyntaxError);
    }

    let existing = engine.get(key)?;
    if (options.nx && existing.is_some()) || (options.xx && existing.is_none()) {
        return Ok(if options.get {
            value_to_frame(existing)
        } else {
            Frame::Null
        });
    }

    let expiration_ms = match options.expiry {
        None => 0,
        Some(ExpiryOption::Ex(s)) => now_ms + s * 1000,
        Some(ExpiryOption::Px(ms)) => now_ms + ms,
        Some(ExpiryOption::ExAt(s)) => s * 1000,
        Some(ExpiryOption::PxAt(ms)) => ms,
        Some(ExpiryOption::KeepTtl) => engine.expiration_of(key).unwrap_or(0),
    };

    engine.put(key, &Value::Bytes(value), expiration_ms)?;

    Ok(if options.get {
        value_to_frame(existing)
    } else {
        Frame::ok()
    })
}

fn parse_set_options(args: &[Vec<u8>]) -> Result<SetOptions> {
    let mut options = SetOptions::default();
    let mut i = 0;
    while i < args.len() {
        let token = String::from_utf8_lossy(&args[i]).to_ascii_uppercase();
        match token.as_str() {
            "NX" => options.nx = true,
            "XX" => options.xx = true,
            "GET" => options.get = true,
            "KEEPTTL" => set_expiry(&mut options, ExpiryOption::KeepTtl)?,
            "EX" | "PX" | "EXAT" | "PXAT" => {
                i += 1;
                let raw = args.get(i).ok_or(Error::SyntaxError)?;
                let n: u64 = std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(Error::SyntaxError)?;
                let option = match token.as_str() {
                    "EX" => ExpiryOption::Ex(n),
                    "PX" => ExpiryOption::Px(n),
                    "EXAT" => ExpiryOption::ExAt(n),
                    _ => ExpiryOption::PxAt(n),
                };
                set_expiry(&mut options, option)?;
            }
            _ => return Err(Error::SyntaxError),
        }
        i += 1;
    }
    Ok(options)
}

fn set_expiry(options: &mut SetOptions, option: ExpiryOption) -> Result<()> {
    if options.expiry.is_some() {
        return Err(Error::SyntaxError);
    }
    options.expiry = Some(option);
    Ok(())
}

fn del(engine: &ShardedEngine, args: &[Vec<u8>]) -> Result<Frame> {
    if args.is_empty() {
        return Err(Error::WrongArity("DEL".to_string()));
    }
    let count = engine.delete_many(args)?;
    Ok(Frame::Integer(count as i64))
}

fn append(engine: &ShardedEngine, args: &[Vec<u8>], _now_ms: u64) -> Result<Frame> {
    let [key, suffix] = require_arity2(args, "APPEND")?;
    require_non_empty_key(key)?;
    let existing_expiry = engine.expiration_of(key).unwrap_or(0);
    let mut bytes = engine
        .get(key)?
        .and_then(Value::into_bytes)
        .unwrap_or_default();
    bytes.extend_from_slice(suffix);
    let new_len = bytes.len();
    engine.put(key, &Value::Bytes(bytes), existing_expiry)?;
    Ok(Frame::Integer(new_len as i64))
}

fn getdel(engine: &ShardedEngine, args: &[Vec<u8>]) -> Result<Frame> {
    let [key] = require_arity(args, "GETDEL")?;
    let existing = engine.get(key)?;
    if existing.is_some() {
        engine.delete(key)?;
    }
    Ok(value_to_frame(existing))
}

fn getex(engine: &ShardedEngine, args: &[Vec<u8>], now_ms: u64) -> Result<Frame> {
    if args.is_empty() {
        return Err(Error::WrongArity("GETEX".to_string()));
    }
    let key = &args[0];
    let existing = engine.get(key)?;
    let Some(value) = existing else {
        return Ok(Frame::Null);
    };

    if args.len() > 1 {
        let token = String::from_utf8_lossy(&args[1]).to_ascii_uppercase();
        let expiration_ms = match token.as_str() {
            "PERSIST" => {
                if args.len() > 2 {
                    return Err(Error::SyntaxError);
                }
                0
            }
            "EX" | "PX" | "EXAT" | "PXAT" => {
                if args.len() > 3 {
                    return Err(Error::SyntaxError);
                }
                let raw = args.get(2).ok_or(Error::SyntaxError)?;
                let n: u64 = std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(Error::SyntaxError)?;
                match token.as_str() {
                    "EX" => now_ms + n * 1000,
                    "PX" => now_ms + n,
                    "EXAT" => n * 1000,
                    _ => n,
                }
            }
            _ => return Err(Error::SyntaxError),
        };
        engine.put(key, &value, expiration_ms)?;
    }

    Ok(value_to_frame(Some(value)))
}

fn getrange(engine: &ShardedEngine, args: &[Vec<u8>]) -> Result<Frame> {
    let [key, start, stop] = require_arity3(args, "GETRANGE")?;
    let start: i64 = parse_i64(start)?;
    let stop: i64 = parse_i64(stop)?;

    let bytes = engine
        .get(key)?
        .and_then(Value::into_bytes)
        .unwrap_or_default();

    match clamp_range(bytes.len(), start, stop) {
        Some((s, e)) => Ok(Frame::bulk(bytes[s..=e].to_vec())),
        None => Ok(Frame::bulk(Vec::new())),
    }
}

fn clamp_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len_i + i).max(0)
        } else {
            i
        }
    };
    let s = norm(start);
    let mut e = norm(stop);
    if s >= len_i {
        return None;
    }
    if e >= len_i {
        e = len_i - 1;
    }
    if e < s {
        return None;
    }
    Some((s as usize, e as usize))
}

fn strlen(engine: &ShardedEngine, args: &[Vec<u8>]) -> Result<Frame> {
    let [key] = require_arity(args, "STRLEN")?;
    let len = engine
        .get(key)?
        .and_then(Value::into_bytes)
        .map(|b| b.len())
        .unwrap_or(0);
    Ok(Frame::Integer(len as i64))
}

fn parse_i64(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::SyntaxError)
}

/// The on-disk entry format can't represent a zero-length key, so reject it
/// here rather than let it round-trip into an unreadable record.
fn require_non_empty_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(())
}

fn require_arity<'a>(args: &'a [Vec<u8>], name: &str) -> Result<[&'a Vec<u8>; 1]> {
    match args {
        [a] => Ok([a]),
        _ => Err(Error::WrongArity(name.to_string())),
    }
}

fn require_arity2<'a>(args: &'a [Vec<u8>], name: &str) -> Result<[&'a Vec<u8>; 2]> {
    match args {
        [a, b] => Ok([a, b]),
        _ => Err(Error::WrongArity(name.to_string())),
    }
}

fn require_arity3<'a>(args: &'a [Vec<u8>], name: &str) -> Result<[&'a Vec<u8>; 3]> {
    match args {
        [a, b, c] => Ok([a, b, c]),
        _ => Err(Error::WrongArity(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ShardedEngine;

    fn engine() -> ShardedEngine {
        let dir = tempfile::tempdir().unwrap();
        // leaked on purpose so the tempdir outlives the engine within a test
        let path = Box::leak(Box::new(dir));
        ShardedEngine::open(path.path(), 1).unwrap()
    }

    fn bs(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn ping_without_args() {
        let e = engine();
        assert_eq!(dispatch(&e, &[bs("PING")], 0), Frame::Simple("PONG".to_string()));
    }

    #[test]
    fn ping_echoes_argument() {
        let e = engine();
        assert_eq!(dispatch(&e, &[bs("PING"), bs("hi")], 0), Frame::bulk(*b"hi"));
    }

    #[test]
    fn set_then_get() {
        let e = engine();
        assert_eq!(dispatch(&e, &[bs("SET"), bs("k"), bs("v")], 0), Frame::ok());
        assert_eq!(dispatch(&e, &[bs("GET"), bs("k")], 0), Frame::bulk(*b"v"));
    }

    #[test]
    fn ttl_absent_key_is_minus_two() {
        let e = engine();
        assert_eq!(dispatch(&e, &[bs("TTL"), bs("miss")], 0), Frame::Integer(-2));
    }

    #[test]
    fn ttl_no_expiry_is_minus_one() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("v")], 0);
        assert_eq!(dispatch(&e, &[bs("TTL"), bs("k")], 0), Frame::Integer(-1));
    }

    #[test]
    fn set_nx_on_existing_key_fails() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("v1")], 0);
        let reply = dispatch(&e, &[bs("SET"), bs("k"), bs("v2"), bs("NX")], 0);
        assert_eq!(reply, Frame::Null);
        assert_eq!(dispatch(&e, &[bs("GET"), bs("k")], 0), Frame::bulk(*b"v1"));
    }

    #[test]
    fn set_xx_on_missing_key_fails() {
        let e = engine();
        let reply = dispatch(&e, &[bs("SET"), bs("k"), bs("v"), bs("XX")], 0);
        assert_eq!(reply, Frame::Null);
    }

    #[test]
    fn set_nx_and_xx_together_is_syntax_error() {
        let e = engine();
        let reply = dispatch(&e, &[bs("SET"), bs("k"), bs("v"), bs("NX"), bs("XX")], 0);
        assert!(matches!(reply, Frame::Error(_)));
    }

    #[test]
    fn set_with_ex_sets_ttl() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("v"), bs("EX"), bs("10")], 1_000);
        assert_eq!(dispatch(&e, &[bs("TTL"), bs("k")], 1_000), Frame::Integer(10));
    }

    #[test]
    fn del_counts_removed_keys() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("a"), bs("1")], 0);
        dispatch(&e, &[bs("SET"), bs("b"), bs("2")], 0);
        let reply = dispatch(&e, &[bs("DEL"), bs("a"), bs("b"), bs("c")], 0);
        assert_eq!(reply, Frame::Integer(2));
    }

    #[test]
    fn append_concatenates_and_returns_new_length() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("Hello ")], 0);
        let reply = dispatch(&e, &[bs("APPEND"), bs("k"), bs("World")], 0);
        assert_eq!(reply, Frame::Integer(11));
        assert_eq!(dispatch(&e, &[bs("GET"), bs("k")], 0), Frame::bulk(*b"Hello World"));
    }

    #[test]
    fn getdel_returns_value_then_removes_it() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("v")], 0);
        assert_eq!(dispatch(&e, &[bs("GETDEL"), bs("k")], 0), Frame::bulk(*b"v"));
        assert_eq!(dispatch(&e, &[bs("GET"), bs("k")], 0), Frame::Null);
    }

    #[test]
    fn getrange_handles_negative_indices() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("This is a string")], 0);
        let reply = dispatch(&e, &[bs("GETRANGE"), bs("k"), bs("-3"), bs("-1")], 0);
        assert_eq!(reply, Frame::bulk(*b"ing"));
    }

    #[test]
    fn strlen_of_missing_key_is_zero() {
        let e = engine();
        assert_eq!(dispatch(&e, &[bs("STRLEN"), bs("missing")], 0), Frame::Integer(0));
    }

    #[test]
    fn del_across_multiple_shards() {
        let dir = tempfile::tempdir().unwrap();
        let path = Box::leak(Box::new(dir));
        let e = ShardedEngine::open(path.path(), 4).unwrap();
        for i in 0..20 {
            dispatch(&e, &[bs("SET"), bs(&format!("key-{i}")), bs("v")], 0);
        }
        let keys: Vec<Vec<u8>> = (0..20).map(|i| bs(&format!("key-{i}"))).collect();
        let mut args = vec![bs("DEL")];
        args.extend(keys);
        let reply = dispatch(&e, &args, 0);
        assert_eq!(reply, Frame::Integer(20));
        assert_eq!(e.len(), 0);
    }

    #[test]
    fn getex_rejects_trailing_garbage_after_option() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("v")], 0);
        let reply = dispatch(
            &e,
            &[bs("GETEX"), bs("k"), bs("EX"), bs("10"), bs("garbage")],
            0,
        );
        assert!(matches!(reply, Frame::Error(_)));
    }

    #[test]
    fn getex_rejects_trailing_garbage_after_persist() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("v")], 0);
        let reply = dispatch(&e, &[bs("GETEX"), bs("k"), bs("PERSIST"), bs("garbage")], 0);
        assert!(matches!(reply, Frame::Error(_)));
    }

    #[test]
    fn getex_persist_clears_ttl() {
        let e = engine();
        dispatch(&e, &[bs("SET"), bs("k"), bs("v"), bs("EX"), bs("10")], 1_000);
        dispatch(&e, &[bs("GETEX"), bs("k"), bs("PERSIST")], 1_000);
        assert_eq!(dispatch(&e, &[bs("TTL"), bs("k")], 1_000), Frame::Integer(-1));
    }

    #[test]
    fn set_with_empty_key_is_rejected() {
        let e = engine();
        let reply = dispatch(&e, &[bs("SET"), bs(""), bs("v")], 0);
        assert_eq!(reply, Frame::error("ERR key must not be empty"));
        assert_eq!(e.len(), 0);
    }

    #[test]
    fn append_with_empty_key_is_rejected() {
        let e = engine();
        let reply = dispatch(&e, &[bs("APPEND"), bs(""), bs("v")], 0);
        assert_eq!(reply, Frame::error("ERR key must not be empty"));
        assert_eq!(e.len(), 0);
    }

    #[test]
    fn unknown_command_is_reported() {
        let e = engine();
        let reply = dispatch(&e, &[bs("NOPE")], 0);
        assert_eq!(reply, Frame::error("ERR unknown command 'NOPE'"));
    }
}
