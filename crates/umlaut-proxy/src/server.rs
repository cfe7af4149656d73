//! Proxy server: TCP listener, connection dispatch, and lifecycle.
//!
//! The server binds to the configured address (default `0.0.0.0:5006`),
//! accepts TCP connections, classifies the first segment of each one, and
//! dispatches to the appropriate handler on its own task.
//!
//! CONNECT method -> [`connect`] handler (opaque tunnel)
//! Other methods  -> [`forward`] handler (rewrite to the gateway)

use crate::classify::{self, Classified};
use crate::config::ProxyConfig;
use crate::connect;
use crate::error::{ProxyError, Result};
use crate::forward;
use crate::gateway::GatewayClient;
use crate::registry::HostRegistry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle returned when the proxy server starts.
///
/// Call [`ProxyHandle::shutdown`] or [`ProxyHandle::stop`], or drop the
/// handle, to stop accepting. Connections already accepted keep running
/// unless `cancel_on_shutdown` was configured.
pub struct ProxyHandle {
    /// The actual port the proxy is listening on
    pub port: u16,
    state: Arc<ProxyState>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl ProxyHandle {
    /// Signal the accept loop to end without waiting for it.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signal the accept loop to end and wait until the listening socket is
    /// closed.
    pub async fn stop(self) {
        self.shutdown();
        if let Err(e) = self.accept_task.await {
            warn!("Accept loop ended abnormally: {}", e);
        }
    }

    /// Registry of hosts reached over plain HTTP, shared with the server.
    #[must_use]
    pub fn registry(&self) -> HostRegistry {
        self.state.registry.clone()
    }

    /// Number of connections currently being handled.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.state.active_connections.load(Ordering::Relaxed)
    }
}

/// Shared state for the proxy server.
struct ProxyState {
    config: ProxyConfig,
    registry: HostRegistry,
    gateway: GatewayClient,
    /// Active connection count for connection limiting.
    active_connections: AtomicUsize,
}

/// Start the proxy server.
///
/// Binds to `config.bind_addr:config.bind_port` (port 0 = OS-assigned),
/// seeds the host registry, and begins accepting connections on a task
/// spawned on the current tokio runtime. Returns once the socket is bound.
pub async fn start(config: ProxyConfig) -> Result<ProxyHandle> {
    if config.gateway.host.trim().is_empty() {
        return Err(ProxyError::Config("gateway host must not be empty".to_string()));
    }

    // Bind listener
    let bind_addr = SocketAddr::new(config.bind_addr, config.bind_port);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ProxyError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;

    let local_addr = listener.local_addr().map_err(|e| ProxyError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;
    let port = local_addr.port();

    info!(
        "Proxy server listening on {}, forwarding to gateway {}",
        local_addr,
        config.gateway.authority()
    );

    let registry = HostRegistry::with_hosts(config.known_hosts.iter().cloned());
    let gateway = GatewayClient::new(
        &config.gateway,
        config.connect_timeout(),
        config.io_timeout(),
    );

    // Shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(ProxyState {
        config,
        registry,
        gateway,
        active_connections: AtomicUsize::new(0),
    });

    let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&state), shutdown_rx));

    Ok(ProxyHandle {
        port,
        state,
        shutdown_tx,
        accept_task,
    })
}

/// Accept loop: listen for connections until shutdown.
///
/// The listener is dropped (and the port released) when this returns.
async fn accept_loop(
    listener: TcpListener,
    state: Arc<ProxyState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        // Connection limit enforcement
                        let max = state.config.max_connections;
                        if max > 0 {
                            let current = state.active_connections.load(Ordering::Relaxed);
                            if current >= max {
                                warn!(
                                    "Connection limit reached ({}/{}), rejecting {}",
                                    current, max, addr
                                );
                                drop(stream);
                                continue;
                            }
                        }
                        let slot = ConnectionSlot::acquire(Arc::clone(&state));

                        debug!("Accepted connection from {}", addr);
                        tokio::spawn(serve_connection(stream, addr, slot, shutdown_rx.clone()));
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                // A dropped handle counts as a shutdown request.
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Proxy server shutting down");
                    return;
                }
            }
        }
    }
}

/// One counted entry in `active_connections`, released on drop.
///
/// Dropping also happens when the connection task panics or is aborted,
/// so the limit never loses a slot.
struct ConnectionSlot {
    state: Arc<ProxyState>,
}

impl ConnectionSlot {
    fn acquire(state: Arc<ProxyState>) -> Self {
        state.active_connections.fetch_add(1, Ordering::Relaxed);
        Self { state }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Run one connection to completion and release it.
///
/// Errors stop at this boundary; they are logged and never reach the
/// accept loop or other connections.
async fn serve_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    slot: ConnectionSlot,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let state = &slot.state;
    let result = if state.config.cancel_on_shutdown {
        tokio::select! {
            result = handle_connection(&mut stream, state) => result,
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                debug!("Connection from {} cancelled by shutdown", addr);
                Ok(())
            }
        }
    } else {
        handle_connection(&mut stream, state).await
    };

    if let Err(e) = result {
        debug!("Connection handler error for {}: {}", addr, e);
    }
    let _ = stream.shutdown().await;
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *shutdown_rx.borrow();
        if stopped || shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Handle a single client connection.
///
/// Reads the first segment to determine the path:
/// - CONNECT method -> tunnel
/// - Other methods  -> rewrite and forward
async fn handle_connection(stream: &mut TcpStream, state: &ProxyState) -> Result<()> {
    let io_timeout = state.config.io_timeout();
    let Some(classified) = classify::read_and_classify(stream, io_timeout).await? else {
        return Ok(()); // Client disconnected
    };

    match classified {
        Classified::Tunnel { request } => {
            let ctx = connect::TunnelCtx {
                registry: &state.registry,
                connect_timeout: state.config.connect_timeout(),
                io_timeout,
            };
            connect::handle_connect(&request, stream, &ctx).await
        }
        Classified::Forward { request, raw } => {
            let ctx = forward::ForwardCtx {
                registry: &state.registry,
                gateway: &state.gateway,
                io_timeout,
            };
            forward::handle_forward(&request, &raw, stream, &ctx).await
        }
    }
}
