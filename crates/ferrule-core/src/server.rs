//! Engine: listener, accept loop and connection lifecycle
//!
//! One tokio task per accepted connection. The accept loop stops on a
//! oneshot signal; connections already running are left to finish.

use crate::activity::ActivitySink;
use crate::config::ServerConfig;
use crate::connection::{self, Connection, ConnectionContext};
use crate::router::Router;
use crate::{Error, Response, Result};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Listen backlog handed to the kernel
const LISTEN_BACKLOG: i32 = 1024;

/// How long `run_until` waits for in-flight connections after the signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Open-connection registry
#[derive(Debug)]
pub struct ConnectionTracker {
    active: AtomicU64,
    shutting_down: AtomicBool,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            active: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Register a connection; it stays counted until the guard drops
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn start_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.shutting_down.store(false, Ordering::SeqCst);
    }
}

/// Decrements the tracker on drop, including when the connection task panics
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Create a listening socket with SO_REUSEADDR and TCP_NODELAY
pub fn create_listener(addr: &SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    // Required before handing the socket to tokio
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Live listener state, present between `start` and `stop`
struct Running {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// HTTP engine
pub struct Engine {
    config: ServerConfig,
    router: Router,
    sink: Option<Arc<dyn ActivitySink>>,
    tracker: Arc<ConnectionTracker>,
    running: Mutex<Option<Running>>,
}

impl Engine {
    /// Validate the config and take ownership of the route table
    pub fn new(config: ServerConfig, router: Router) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            router,
            sink: None,
            tracker: Arc::new(ConnectionTracker::new()),
            running: Mutex::new(None),
        })
    }

    pub fn activity_sink(mut self, sink: impl ActivitySink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn shared_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.count()
    }

    /// Bind the listener and spawn the accept loop. Must be called inside a
    /// tokio runtime. Returns the bound address, so port 0 works.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(Error::Internal("engine is already running".to_string()));
        }

        let bind = self.config.bind_address();
        let addr = tokio::net::lookup_host(&bind)
            .await
            .map_err(|source| Error::Bind {
                addr: bind.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| Error::Bind {
                addr: bind.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                ),
            })?;

        let listener = create_listener(&addr)
            .and_then(TcpListener::from_std)
            .map_err(|source| Error::Bind {
                addr: bind.clone(),
                source,
            })?;
        let local = listener.local_addr()?;

        let ctx = Arc::new(ConnectionContext {
            router: self.router.clone(),
            sink: self.sink.clone(),
            service_name: Arc::from(self.config.service_name()),
            max_message_bytes: self.config.max_message_bytes,
        });

        self.tracker.reset();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            ctx,
            self.tracker.clone(),
            self.config.max_connections,
            shutdown_rx,
        ));

        let mut running = self.running.lock();
        if running.is_some() {
            // Lost a race with a concurrent start
            accept_task.abort();
            return Err(Error::Internal("engine is already running".to_string()));
        }
        *running = Some(Running {
            addr: local,
            shutdown_tx,
            accept_task,
        });

        tracing::info!(
            addr = %local,
            service = %self.config.service_name(),
            max_connections = ?self.config.max_connections,
            "listening"
        );
        Ok(local)
    }

    /// Stop accepting. In-flight connections keep running.
    pub fn stop(&self) {
        self.tracker.start_shutdown();
        if let Some(running) = self.running.lock().take() {
            let _ = running.shutdown_tx.send(());
            tracing::info!(addr = %running.addr, "stopped accepting connections");
        }
    }

    /// Stop accepting, wait for the listener to close, then wait up to
    /// `timeout` for open connections to finish. Returns whether they all did.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.start_shutdown();
        let running = self.running.lock().take();
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(());
            let _ = running.accept_task.await;
            tracing::info!(addr = %running.addr, "listener closed");
        }

        let drained = tokio::time::timeout(timeout, async {
            while self.tracker.count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                active = self.tracker.count(),
                "connections still open after shutdown timeout"
            );
        }
        drained
    }

    /// Start, serve until `signal` resolves, then shut down
    pub async fn run_until<F>(&self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        tracing::info!("shutdown signal received");
        self.shutdown(DRAIN_TIMEOUT).await;
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown_tx.send(());
        }
    }
}

/// Pause after the `failures`-th consecutive accept error: 10ms doubling up to 1s
fn accept_backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(7);
    (ACCEPT_BACKOFF_BASE * 2u32.pow(exp)).min(ACCEPT_BACKOFF_MAX)
}

/// Answer an accepted connection with 503 off the accept loop
fn spawn_reject(stream: TcpStream, peer: SocketAddr, message: &'static str) {
    tokio::spawn(async move {
        let res = Response::service_unavailable(message);
        if let Err(e) = connection::reject(stream, &res).await {
            tracing::debug!(peer = %peer, error = %e, "failed to send 503");
        }
    });
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    tracker: Arc<ConnectionTracker>,
    max_connections: Option<usize>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut failures = 0u32;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let pause = accept_backoff(failures);
                        tracing::error!(error = %e, failures, ?pause, "accept failed");
                        tokio::time::sleep(pause).await;
                        continue;
                    }
                };
                failures = 0;

                if tracker.is_shutting_down() {
                    tracing::debug!(peer = %peer, "shutting down, sending 503");
                    spawn_reject(stream, peer, "Server is shutting down");
                    break;
                }
                let _ = stream.set_nodelay(true);

                if max_connections.is_some_and(|max| tracker.count() >= max as u64) {
                    tracing::warn!(peer = %peer, active = tracker.count(), "at capacity, sending 503");
                    spawn_reject(stream, peer, "Server at capacity");
                    continue;
                }

                let guard = tracker.track();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    Connection::new(stream, Some(peer), ctx).run().await;
                });
            }
            _ = &mut shutdown_rx => {
                break;
            }
        }
    }
    tracing::debug!("accept loop exited");
}
