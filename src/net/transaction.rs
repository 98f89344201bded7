//! Per-connection transaction state machine: `MULTI` / `EXEC` / `DISCARD`.

use crate::resp::Frame;
use crate::storage::ShardedEngine;

use super::command;
use super::error::Error;

/// Tracks whether a connection is inside a `MULTI` block and the commands
/// queued so far. One of these lives per connection.
#[derive(Debug, Default)]
pub struct Transaction {
    active: bool,
    queue: Vec<Vec<Vec<u8>>>,
}

/// What a connection should do with one parsed command array, decided by
/// the transaction state and the command name alone (spec.md section
/// 4.I's three-branch dispatch).
pub enum Outcome {
    /// Reply immediately with this frame; transaction state already
    /// updated as needed.
    Reply(Frame),
    /// Command was queued; reply `QUEUED`.
    Queued,
    /// Not a transaction-control command and no transaction is active;
    /// the caller should dispatch it immediately.
    Execute,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feeds one command array through the state machine. `args[0]` is
    /// assumed to be the (not yet case-normalized) command name. `EXEC` is
    /// handled by the caller via [`Transaction::run_exec`] instead, since
    /// it needs access to the storage engine to produce its reply.
    pub fn handle(&mut self, args: &[Vec<u8>]) -> Outcome {
        let Some(name) = args.first() else {
            return Outcome::Reply(Frame::error("ERR syntax error"));
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();

        match name.as_str() {
            "MULTI" => Outcome::Reply(self.begin()),
            "DISCARD" => Outcome::Reply(self.discard()),
            _ if self.active => {
                self.queue.push(args.to_vec());
                Outcome::Queued
            }
            _ => Outcome::Execute,
        }
    }

    fn begin(&mut self) -> Frame {
        if self.active {
            return transaction_error("multi calls can not be nested");
        }
        self.active = true;
        self.queue.clear();
        Frame::ok()
    }

    fn discard(&mut self) -> Frame {
        if !self.active {
            return transaction_error("DISCARD without MULTI");
        }
        self.active = false;
        self.queue.clear();
        Frame::ok()
    }

    /// Drains the queue and executes every command sequentially against
    /// `engine`, returning the per-command replies as one array frame. A
    /// failing command's error becomes its array entry; the rest still run.
    ///
    /// Exposed for tests and direct (non-async) callers; `Connection`
    /// instead uses [`Transaction::take_exec_queue`] plus [`run_queued`] so
    /// the storage I/O can run inside `spawn_blocking`.
    pub fn run_exec(&mut self, engine: &ShardedEngine, now_ms: u64) -> Frame {
        match self.take_exec_queue() {
            Ok(queued) => run_queued(engine, &queued, now_ms),
            Err(frame) => frame,
        }
    }

    /// Synchronous half of `EXEC`: validates transaction state and, on
    /// success, takes ownership of the queued commands and marks the
    /// transaction inactive. The caller is responsible for actually
    /// dispatching the returned commands (e.g. via [`run_queued`] inside a
    /// blocking task) and turning them into the `EXEC` reply.
    pub fn take_exec_queue(&mut self) -> std::result::Result<Vec<Vec<Vec<u8>>>, Frame> {
        if !self.active {
            return Err(transaction_error("EXEC without MULTI"));
        }
        self.active = false;
        Ok(std::mem::take(&mut self.queue))
    }
}

/// Dispatches every queued command sequentially against `engine` and
/// collects the replies into one array frame, the reply shape `EXEC`
/// requires.
pub fn run_queued(engine: &ShardedEngine, queued: &[Vec<Vec<u8>>], now_ms: u64) -> Frame {
    let replies = queued
        .iter()
        .map(|cmd| command::dispatch(engine, cmd, now_ms))
        .collect();
    Frame::Array(replies)
}

fn transaction_error(msg: &str) -> Frame {
    Frame::error(Error::TransactionError(msg.to_string()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bs(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    fn engine() -> ShardedEngine {
        let dir = tempfile::tempdir().unwrap();
        let path = Box::leak(Box::new(dir));
        ShardedEngine::open(path.path(), 1).unwrap()
    }

    #[test]
    fn multi_then_exec_runs_queued_commands_in_order() {
        let e = engine();
        let mut tx = Transaction::new();

        assert!(matches!(tx.handle(&[bs("MULTI")]), Outcome::Reply(Frame::Simple(_))));
        assert!(tx.is_active());

        assert!(matches!(
            tx.handle(&[bs("SET"), bs("k"), bs("1")]),
            Outcome::Queued
        ));
        assert!(matches!(
            tx.handle(&[bs("SET"), bs("k"), bs("2")]),
            Outcome::Queued
        ));

        let reply = tx.run_exec(&e, 0);
        match reply {
            Frame::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
        assert!(!tx.is_active());
        assert_eq!(
            command::dispatch(&e, &[bs("GET"), bs("k")], 0),
            Frame::bulk(*b"2")
        );
    }

    #[test]
    fn nested_multi_is_an_error() {
        let mut tx = Transaction::new();
        tx.handle(&[bs("MULTI")]);
        let reply = tx.handle(&[bs("MULTI")]);
        assert!(matches!(reply, Outcome::Reply(Frame::Error(_))));
    }

    #[test]
    fn discard_without_multi_is_an_error() {
        let mut tx = Transaction::new();
        let reply = tx.handle(&[bs("DISCARD")]);
        assert!(matches!(reply, Outcome::Reply(Frame::Error(_))));
    }

    #[test]
    fn discard_drops_the_queue() {
        let mut tx = Transaction::new();
        tx.handle(&[bs("MULTI")]);
        tx.handle(&[bs("SET"), bs("k"), bs("1")]);
        let reply = tx.handle(&[bs("DISCARD")]);
        assert!(matches!(reply, Outcome::Reply(Frame::Simple(_))));
        assert!(!tx.is_active());
    }

    #[test]
    fn exec_without_multi_is_an_error() {
        let e = engine();
        let mut tx = Transaction::new();
        let reply = tx.run_exec(&e, 0);
        assert!(matches!(reply, Frame::Error(_)));
    }

    #[test]
    fn take_exec_queue_hands_off_commands_and_deactivates() {
        let e = engine();
        let mut tx = Transaction::new();
        tx.handle(&[bs("MULTI")]);
        tx.handle(&[bs("SET"), bs("k"), bs("1")]);

        let queued = tx.take_exec_queue().unwrap();
        assert_eq!(queued.len(), 1);
        assert!(!tx.is_active());

        let reply = run_queued(&e, &queued, 0);
        match reply {
            Frame::Array(items) => assert_eq!(items.len(), 1),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn failing_queued_command_does_not_abort_the_rest() {
        let e = engine();
        let mut tx = Transaction::new();
        tx.handle(&[bs("MULTI")]);
        tx.handle(&[bs("NOPE")]);
        tx.handle(&[bs("SET"), bs("k"), bs("1")]);
        let reply = tx.run_exec(&e, 0);
        match reply {
            Frame::Array(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[0], Frame::Error(_)));
                assert_eq!(items[1], Frame::ok());
            }
            other => panic!("expected array, got {other:?}"),
        }
    }
}
