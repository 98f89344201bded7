//! TCP acceptor pool (spec.md section 4.J): binds and tunes the listening
//! socket, then runs `2 × cores` accept loops against the same listener so
//! no single accept loop becomes the bottleneck under heavy connection
//! churn. Generalizes letung3105-opal's `Context`/`Handler` split (one
//! accept loop, a semaphore-bounded connection count) to a pool of accept
//! loops sharing one listener, with connection bookkeeping for shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;

use crate::storage::ShardedEngine;

use super::connection::Connection;

/// Pending-connection backlog passed to `listen(2)`.
const LISTEN_BACKLOG: i32 = 1024;
/// OS-level send/receive buffer size for the listening socket.
const SOCKET_BUFFER_BYTES: usize = 512 * 1024;
/// How long an accept worker waits before retrying after a fatal accept error.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Owns the listening socket and the set of currently-open connection tasks.
/// Shared (via `Arc`) across every accept-loop worker.
pub struct Acceptor {
    engine: Arc<ShardedEngine>,
    listener: TcpListener,
    connections: Arc<AsyncMutex<HashMap<u64, JoinHandle<()>>>>,
    next_conn_id: AtomicU64,
    /// Bounds how many pipelined commands, across every connection, may be
    /// running a storage dispatch at once (spec.md section 4.H's
    /// "concurrency limit is approximately 2 × cores").
    dispatch_permits: Arc<Semaphore>,
}

impl Acceptor {
    /// Binds and tunes the listening socket per spec.md sections 4.J/6
    /// (`SO_REUSEADDR`, generous OS buffers, a deep backlog).
    pub async fn bind(addr: SocketAddr, engine: Arc<ShardedEngine>) -> std::io::Result<Self> {
        let listener = bind_listener(addr)?;
        Ok(Acceptor {
            engine,
            listener,
            connections: Arc::new(AsyncMutex::new(HashMap::new())),
            next_conn_id: AtomicU64::new(0),
            dispatch_permits: Arc::new(Semaphore::new(2 * num_cpus::get())),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs `worker_count` accept loops until `shutdown` resolves, then
    /// stops accepting and tears down every tracked connection.
    pub async fn run(self: Arc<Self>, worker_count: usize, shutdown: impl std::future::Future<Output = ()>) {
        info!(
            "beetle-server listening on {} with {worker_count} acceptor workers",
            self.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );

        let mut workers = Vec::with_capacity(worker_count.max(1));
        for id in 0..worker_count.max(1) {
            let this = Arc::clone(&self);
            workers.push(tokio::spawn(async move { this.accept_loop(id).await }));
        }

        shutdown.await;
        info!("shutdown signal received: closing acceptor and active connections");

        for worker in &workers {
            worker.abort();
        }
        let mut conns = self.connections.lock().await;
        for (_, handle) in conns.drain() {
            handle.abort();
        }
    }

    async fn accept_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = tune_client_socket(&stream) {
                        warn!("failed to tune client socket for {peer}: {e}");
                    }
                    self.spawn_connection(stream, peer).await;
                }
                Err(e) => {
                    error!("acceptor worker {worker_id} failed to accept: {e}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::clone(&self.engine);
        let connections = Arc::clone(&self.connections);
        let dispatch_permits = Arc::clone(&self.dispatch_permits);

        let handle = tokio::spawn(async move {
            info!("connection {id} from {peer} opened");
            if let Err(e) = Connection::new(stream, dispatch_permits).run(engine).await {
                warn!("connection {id} from {peer} terminated: {e}");
            }
            info!("connection {id} from {peer} closed");
        });
        connections.lock().await.insert(id, handle);
        reap_finished(&connections).await;
    }
}

/// Drops join handles for connections that already finished, so the map
/// doesn't grow unbounded over a long-lived server's connection churn.
async fn reap_finished(connections: &AsyncMutex<HashMap<u64, JoinHandle<()>>>) {
    connections.lock().await.retain(|_, h| !h.is_finished());
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_BYTES)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_BYTES)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Per-connection socket options (spec.md section 4.J): disable Nagle for
/// low-latency pipelined replies, enable keepalive to detect dead peers.
fn tune_client_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)?;
    Ok(())
}
