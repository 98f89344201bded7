//! `beetle-cli`: a minimal synchronous RESP client, in the style of
//! `redis-cli` — run one command from the arguments, or drop into an
//! interactive REPL when none are given.

use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use std::process::exit;

use clap::Parser;

use beetle::resp::{self, Frame};

/// Args for beetle-cli.
#[derive(Parser)]
#[clap(author, version, about)]
struct ClientArgs {
    /// Server address, host:port.
    #[clap(long, default_value = "127.0.0.1:6969")]
    addr: String,

    /// Command and arguments to send; omit to enter the interactive REPL.
    command: Vec<String>,
}

fn main() {
    let args = ClientArgs::parse();
    let mut stream = match TcpStream::connect(&args.addr) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("could not connect to {}: {e}", args.addr);
            exit(1);
        }
    };

    if args.command.is_empty() {
        repl(&mut stream);
    } else if let Err(e) = send_command(&mut stream, &args.command) {
        eprintln!("error: {e}");
        exit(1);
    }
}

fn repl(stream: &mut TcpStream) {
    let addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());
    let stdin = io::stdin();
    loop {
        print!("{addr}> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("error reading stdin: {e}");
                break;
            }
        }
        let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            continue;
        }
        if let Err(e) = send_command(stream, &words) {
            eprintln!("error: {e}");
        }
    }
}

fn send_command(stream: &mut TcpStream, words: &[String]) -> io::Result<()> {
    let args: Vec<Frame> = words.iter().map(|w| Frame::bulk(w.as_bytes())).collect();
    let request = resp::encode(&Frame::Array(args))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    stream.write_all(&request)?;

    let reply = read_reply(stream)?;
    print_reply(&reply, 0);
    println!();
    Ok(())
}

/// Reads bytes off the stream until a complete frame is available, growing
/// the buffer as needed. Uses the streaming `decode`, not `decode_complete`,
/// so a frame that merely hasn't fully arrived yet is "read more", never
/// a protocol error.
fn read_reply(stream: &mut TcpStream) -> io::Result<Frame> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let (frames, leftover) = resp::decode(&buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if let Some(frame) = frames.into_iter().next() {
            return Ok(frame);
        }
        buf = leftover;

        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before a full reply arrived",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Pretty-prints a reply the way `redis-cli` would.
fn print_reply(frame: &Frame, depth: usize) {
    match frame {
        Frame::Null => print!("(nil)"),
        Frame::Simple(s) => print!("{s}"),
        Frame::Error(e) => print!("(error) {e}"),
        Frame::Bool(b) => print!("(boolean) {}", if *b { "true" } else { "false" }),
        Frame::Integer(n) => print!("(integer) {n}"),
        Frame::Float(f) => print!("(double) {f}"),
        Frame::Bytes(b) => print!("{:?}", String::from_utf8_lossy(b)),
        Frame::Array(items) | Frame::Set(items) => {
            if items.is_empty() {
                print!("(empty array)");
                return;
            }
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print!("{}{}) ", "   ".repeat(depth), i + 1);
                print_reply(item, depth + 1);
            }
        }
        Frame::Map(pairs) => {
            if pairs.is_empty() {
                print!("(empty map)");
                return;
            }
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print!("{}{}) ", "   ".repeat(depth), i + 1);
                print_reply(k, depth + 1);
                print!(" => ");
                print_reply(v, depth + 1);
            }
        }
    }
}
