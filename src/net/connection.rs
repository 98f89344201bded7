//! Per-connection state machine: decodes pipelined RESP frames off a socket,
//! runs each one either through the transaction queue or straight to the
//! dispatcher, and writes replies back in the order the commands arrived.
//!
//! Generalizes letung3105-opal's `Handler::run` (which reads and applies one
//! frame at a time) with pipelining and `MULTI`/`EXEC`/`DISCARD`. Independent
//! commands in a single read are dispatched concurrently via
//! `spawn_blocking` — the storage engine is synchronous — while the reply
//! order is preserved by resolving the handles in the order the commands
//! were decoded.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::resp::{self, Frame};
use crate::storage::ShardedEngine;

use super::command;
use super::error::Result;
use super::transaction::{self, Outcome, Transaction};

/// Per-connection application-level read buffer (spec.md section 6's
/// "128 KiB application buffer").
const READ_CHUNK: usize = 128 * 1024;
/// A single reply write taking longer than this aborts the connection
/// (spec.md section 4.J's "30 s send timeout closing the socket on exceed").
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns one client socket plus the inbound byte buffer and transaction state
/// that persist across reads for that connection.
pub struct Connection {
    stream: TcpStream,
    inbound: BytesMut,
    transaction: Transaction,
    dispatch_permits: Arc<Semaphore>,
}

impl Connection {
    /// `dispatch_permits` is shared across every live connection and bounds
    /// how many pipelined commands may be running a storage dispatch at
    /// once (spec.md section 4.H: "concurrency limit is approximately
    /// 2 × cores"), independent of how many connections happen to be
    /// pipelining batches at the same moment.
    pub fn new(stream: TcpStream, dispatch_permits: Arc<Semaphore>) -> Self {
        Connection {
            stream,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            transaction: Transaction::new(),
            dispatch_permits,
        }
    }

    /// Drives the connection until the peer disconnects (including a clean
    /// half-close, signalled by a zero-length read) or a protocol/IO error
    /// forces it closed.
    pub async fn run(mut self, engine: Arc<ShardedEngine>) -> Result<()> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            self.inbound.extend_from_slice(&chunk[..n]);

            let (frames, leftover) = resp::decode(&self.inbound)?;
            self.inbound = BytesMut::from(&leftover[..]);
            if frames.is_empty() {
                continue;
            }

            debug!("dispatching {} pipelined frame(s)", frames.len());
            let replies = self.execute_batch(&engine, frames).await;
            self.write_replies(&replies).await?;
        }
    }

    /// Runs one batch of frames decoded from a single read. `MULTI`/
    /// `DISCARD`/queuing resolve immediately in place since they only touch
    /// in-memory transaction state; `EXEC` and every other command perform
    /// storage I/O and are handed to `spawn_blocking` so independent
    /// commands in the batch can run concurrently without reordering
    /// replies or blocking the worker thread.
    async fn execute_batch(&mut self, engine: &Arc<ShardedEngine>, frames: Vec<Frame>) -> Vec<Frame> {
        enum Slot {
            Ready(Frame),
            Pending(JoinHandle<Frame>),
        }

        let mut slots = Vec::with_capacity(frames.len());
        for frame in frames {
            let args = match frame_to_args(frame) {
                Ok(args) => args,
                Err(reply) => {
                    slots.push(Slot::Ready(reply));
                    continue;
                }
            };

            let name = args
                .first()
                .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase());

            if name.as_deref() == Some("EXEC") {
                match self.transaction.take_exec_queue() {
                    Err(frame) => slots.push(Slot::Ready(frame)),
                    Ok(queued) => {
                        let engine = Arc::clone(engine);
                        let permits = Arc::clone(&self.dispatch_permits);
                        let now = now_ms();
                        slots.push(Slot::Pending(tokio::spawn(async move {
                            let _permit = permits.acquire_owned().await.expect("dispatch semaphore never closed");
                            tokio::task::spawn_blocking(move || {
                                transaction::run_queued(&engine, &queued, now)
                            })
                            .await
                            .unwrap_or_else(|e| Frame::error(format!("ERR internal error: {e}")))
                        })));
                    }
                }
                continue;
            }

            match self.transaction.handle(&args) {
                Outcome::Reply(frame) => slots.push(Slot::Ready(frame)),
                Outcome::Queued => slots.push(Slot::Ready(Frame::Simple("QUEUED".to_string()))),
                Outcome::Execute => {
                    let engine = Arc::clone(engine);
                    let permits = Arc::clone(&self.dispatch_permits);
                    let now = now_ms();
                    slots.push(Slot::Pending(tokio::spawn(async move {
                        let _permit = permits.acquire_owned().await.expect("dispatch semaphore never closed");
                        tokio::task::spawn_blocking(move || command::dispatch(&engine, &args, now))
                            .await
                            .unwrap_or_else(|e| Frame::error(format!("ERR internal error: {e}")))
                    })));
                }
            }
        }

        let mut replies = Vec::with_capacity(slots.len());
        for slot in slots {
            replies.push(match slot {
                Slot::Ready(frame) => frame,
                Slot::Pending(handle) => handle
                    .await
                    .unwrap_or_else(|e| Frame::error(format!("ERR internal error: {e}"))),
            });
        }
        replies
    }

    /// Encodes every reply into one buffer and writes it in a single
    /// syscall, per spec.md section 4.I's "single socket write per batch".
    async fn write_replies(&mut self, replies: &[Frame]) -> Result<()> {
        let mut out = Vec::new();
        for reply in replies {
            out.extend(resp::encode(reply)?);
        }
        tokio::time::timeout(WRITE_TIMEOUT, self.stream.write_all(&out))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "reply write timed out"))??;
        Ok(())
    }
}

/// Converts a top-level RESP value into a command's argument vector. Per
/// spec.md section 4.H, a command is always an array of bulk strings.
fn frame_to_args(frame: Frame) -> std::result::Result<Vec<Vec<u8>>, Frame> {
    match frame {
        Frame::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Frame::Bytes(b) => Ok(b),
                _ => Err(Frame::error("ERR protocol error: expected bulk string")),
            })
            .collect(),
        _ => Err(Frame::error("ERR protocol error: expected command array")),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_to_args_requires_array_of_bulk_strings() {
        let ok = frame_to_args(Frame::Array(vec![Frame::bulk(*b"GET"), Frame::bulk(*b"k")]));
        assert_eq!(ok, Ok(vec![b"GET".to_vec(), b"k".to_vec()]));

        assert!(frame_to_args(Frame::Integer(1)).is_err());
        assert!(frame_to_args(Frame::Array(vec![Frame::Integer(1)])).is_err());
    }
}
