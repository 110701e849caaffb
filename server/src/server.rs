//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! AMI test server
//!
//! [`AmiServer`] owns the listening socket. It applies the connection
//! limit, wires every accepted socket into the registry, an auth timer, a
//! session and a worker task, fans broadcasts out to authenticated clients
//! and tears everything down on [`close`](AmiServer::close).

use crate::registry::{ClientHandle, ClientRegistry};
use crate::session::AuthSession;
use crate::timer::AuthTimer;
use crate::worker::{ConnectionWorker, ControlMessage, WorkerContext};
use crate::{
    ActionDispatcher, AmiConnection, ConnectionId, ConnectionInfo, NoopHandler, Result,
    ServerConfig, ServerError, ServerHandler, ServerMetrics, ServerSnapshot,
};
use bytes::Bytes;
use metrics::counter;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// Result of a broadcast operation
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Number of authenticated clients targeted
    pub total: usize,
    /// Number of clients the payload was queued for
    pub succeeded: usize,
    /// Number of clients the payload could not be queued for
    pub failed: usize,
    /// Errors that occurred (ConnectionId and error message)
    pub errors: Vec<(ConnectionId, String)>,
}

impl BroadcastResult {
    /// Check if all broadcasts succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Get the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }
}

/// Asterisk Manager Interface test server
///
/// # Example
///
/// ```no_run
/// use amitest_server::{AmiServer, Credentials, NoopHandler, ServerConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::default().with_credentials(Credentials::new("test", "test"));
///     let server = AmiServer::new(config, Arc::new(NoopHandler));
///
///     let addr = server.listen(0).await?;
///     println!("listening on {}", addr);
///
///     server.broadcast("Event: TestEvent\r\n\r\n");
///     server.close().await?;
///     Ok(())
/// }
/// ```
pub struct AmiServer {
    /// Server configuration
    config: Arc<ServerConfig>,
    /// State shared with connection workers
    ctx: WorkerContext,
    /// Next connection id
    next_id: Arc<AtomicU64>,
    /// Connection worker tasks
    tasks: TaskTracker,
    /// Cancelled on close; parent of every connection's token
    shutdown: CancellationToken,
    /// Set while the accept loop runs
    running: AtomicBool,
    /// Set once `close` has started
    closed: AtomicBool,
    /// Bound address
    local_addr: OnceLock<SocketAddr>,
    /// Accept loop task handle
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    /// Server creation time
    started_at: Instant,
}

impl AmiServer {
    /// Create a server; nothing is bound until [`listen`](Self::listen)
    pub fn new(config: ServerConfig, handler: Arc<dyn ServerHandler>) -> Self {
        let dispatcher = Arc::new(ActionDispatcher::new(config.banner.clone()));

        Self {
            config: Arc::new(config),
            ctx: WorkerContext {
                dispatcher,
                registry: Arc::new(ClientRegistry::new()),
                handler,
                metrics: Arc::new(ServerMetrics::new()),
            },
            next_id: Arc::new(AtomicU64::new(1)),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            local_addr: OnceLock::new(),
            accept_handle: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    /// Create a server without a notification handler
    pub fn with_config(config: ServerConfig) -> Self {
        Self::new(config, Arc::new(NoopHandler))
    }

    /// Bind `port` on the configured host and start accepting connections
    ///
    /// Pass `0` to let the OS pick a port. Returns the bound address. A bind
    /// failure leaves the server idle; `listen` may be called again.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr> {
        self.config.validate()?;

        if self.closed.load(Ordering::SeqCst) {
            return Err(ServerError::ServerNotRunning);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(self.config.host, port);
        let (listener, local_addr) = match bind(addr).await {
            Ok(bound) => bound,
            Err(source) => {
                self.running.store(false, Ordering::SeqCst);
                error!(%addr, error = %source, "Failed to bind listener");
                return Err(ServerError::Bind { addr, source });
            }
        };
        let _ = self.local_addr.set(local_addr);

        if !self.config.silent {
            info!("Asterisk AMI Test Server listening on {} port", local_addr.port());
        }

        let acceptor = Acceptor {
            listener,
            config: self.config.clone(),
            ctx: self.ctx.clone(),
            next_id: self.next_id.clone(),
            tasks: self.tasks.clone(),
            shutdown: self.shutdown.clone(),
        };
        *self.accept_handle.lock().await = Some(tokio::spawn(acceptor.run()));

        self.ctx.handler.on_listening(local_addr).await;
        Ok(local_addr)
    }

    /// Queue a pre-serialized payload for every authenticated client
    ///
    /// Never waits on a client. A client whose queue is full or which is
    /// already closing is skipped and reported in the result.
    pub fn broadcast(&self, payload: impl Into<Bytes>) -> BroadcastResult {
        let payload = payload.into();
        let targets = self.ctx.registry.authenticated_list();

        let mut result = BroadcastResult {
            total: targets.len(),
            ..Default::default()
        };

        for client in targets {
            match client.try_broadcast(payload.clone()) {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push((client.id(), e.to_string()));
                }
            }
        }

        self.ctx.metrics.broadcast();
        counter!("amitest.broadcasts").increment(1);
        trace!(
            bytes = payload.len(),
            total = result.total,
            failed = result.failed,
            "Broadcast queued"
        );

        result
    }

    /// Close every client connection and stop listening
    ///
    /// Waits up to the configured shutdown timeout for connection workers to
    /// finish. Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Server already closed");
            return Ok(());
        }

        info!("Shutting down AMI test server");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        if let Some(handle) = self.accept_handle.lock().await.take() {
            let abort = handle.abort_handle();
            if timeout(self.config.shutdown_timeout, handle).await.is_err() {
                warn!("Accept loop did not stop in time");
                abort.abort();
            }
        }

        for client in self.ctx.registry.all_list() {
            client.cancel_timer();
            client.close();
        }

        self.tasks.close();
        if timeout(self.config.shutdown_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tasks.len(),
                "Connection workers did not finish in time"
            );
        }

        self.ctx.registry.clear();
        self.ctx.handler.on_close().await;

        info!("AMI test server shut down");
        Ok(())
    }

    /// Check if the server is accepting connections
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Get the bound address, once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of connected clients, authenticated or not
    pub fn connection_count(&self) -> usize {
        self.ctx.registry.count()
    }

    /// Snapshots of logged in clients
    pub fn authenticated_clients(&self) -> Vec<ConnectionInfo> {
        infos(self.ctx.registry.authenticated_list())
    }

    /// Snapshots of clients still waiting to log in
    pub fn unauthenticated_clients(&self) -> Vec<ConnectionInfo> {
        infos(self.ctx.registry.unauthenticated_list())
    }

    /// Snapshots of every connected client
    pub fn clients(&self) -> Vec<ConnectionInfo> {
        infos(self.ctx.registry.all_list())
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            authenticated: self.ctx.registry.authenticated_count(),
            unauthenticated: self.ctx.registry.unauthenticated_count(),
            total_connections: self.ctx.metrics.total_connections(),
            local_addr: self.local_addr(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Get the client registry
    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.ctx.registry.clone()
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.ctx.metrics.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl std::fmt::Debug for AmiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiServer")
            .field("local_addr", &self.local_addr())
            .field("running", &self.is_running())
            .field("connection_count", &self.connection_count())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl Drop for AmiServer {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) && self.running.load(Ordering::SeqCst) {
            warn!("AmiServer dropped while still running");
            self.shutdown.cancel();
        }
    }
}

async fn bind(addr: SocketAddr) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

fn infos(clients: Vec<ClientHandle>) -> Vec<ConnectionInfo> {
    clients.iter().map(ClientHandle::info).collect()
}

/// Accept loop state, moved into its own task
struct Acceptor {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    ctx: WorkerContext,
    next_id: Arc<AtomicU64>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Acceptor {
    async fn run(self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                result = self.listener.accept() => result,
            };

            match accepted {
                Ok((socket, peer_addr)) => match self.accept_connection(socket, peer_addr) {
                    Ok(id) => {
                        debug!(connection_id = %id, %peer_addr, "Client connection established");
                    }
                    Err(ServerError::CapacityExceeded(current)) => {
                        debug!(
                            %peer_addr,
                            current,
                            max = ?self.config.max_connections,
                            "Connection rejected"
                        );
                    }
                    Err(e) => {
                        error!(%peer_addr, error = %e, "Failed to set up connection");
                        self.ctx.metrics.connection_error();
                        self.ctx.handler.on_error(None, &e).await;
                    }
                },
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    self.ctx.metrics.connection_error();
                    self.ctx.handler.on_error(None, &ServerError::Io(e)).await;

                    // Back off on errors to avoid tight loop
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Register an accepted socket and spawn its worker
    ///
    /// Runs on the accept loop only, so the capacity check and the
    /// registration cannot interleave with another accept.
    fn accept_connection(&self, socket: TcpStream, peer_addr: SocketAddr) -> Result<ConnectionId> {
        let current = self.ctx.registry.count();
        if !self.config.allows_connection(current) {
            self.ctx.metrics.connection_rejected();
            counter!("amitest.connections.rejected").increment(1);
            drop(socket);
            return Err(ServerError::CapacityExceeded(current));
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (connection, reader) = AmiConnection::wrap(socket, id, &self.config)?;
        let (control_tx, control_rx) = mpsc::channel(self.config.control_buffer_size);
        let cancel = self.shutdown.child_token();

        let timer = {
            let connection = connection.clone();
            let control_tx = control_tx.clone();
            AuthTimer::arm(self.config.auth_timeout, move || {
                connection.begin_close();
                let _ = control_tx.try_send(ControlMessage::AuthTimeout);
            })
        };

        let handle = ClientHandle::new(
            connection.clone(),
            control_tx,
            timer.clone(),
            cancel.clone(),
        );
        if let Err(e) = self.ctx.registry.add_unauthenticated(id, handle) {
            timer.cancel();
            return Err(e);
        }

        let session = AuthSession::new(
            connection.state_cell(),
            timer,
            self.config.credentials.clone(),
        );
        let worker = ConnectionWorker::new(
            connection,
            reader,
            session,
            control_rx,
            cancel,
            self.ctx.clone(),
        );

        self.ctx.metrics.connection_opened();
        trace!(connection_id = %id, %peer_addr, "Spawning connection worker");
        self.tasks.spawn(worker.run());

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn config() -> ServerConfig {
        ServerConfig::default().with_shutdown_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_server_lifecycle() {
        let server = AmiServer::with_config(config());
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());

        let addr = server.listen(0).await.unwrap();
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));
        assert_ne!(addr.port(), 0);

        server.close().await.unwrap();
        assert!(!server.is_running());
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_twice_fails() {
        let server = AmiServer::with_config(config());
        server.listen(0).await.unwrap();

        assert!(matches!(
            server.listen(0).await,
            Err(ServerError::AlreadyRunning)
        ));
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_after_close_fails() {
        let server = AmiServer::with_config(config());
        server.close().await.unwrap();

        assert!(matches!(
            server.listen(0).await,
            Err(ServerError::ServerNotRunning)
        ));
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_server_idle() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = AmiServer::with_config(config());
        let err = server.listen(port).await.unwrap_err();
        assert!(err.is_startup_error());
        assert!(matches!(err, ServerError::Bind { addr, .. } if addr.port() == port));
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());

        server.listen(0).await.unwrap();
        assert!(server.is_running());
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let server = AmiServer::with_config(config().with_control_buffer_size(0));
        assert!(matches!(
            server.listen(0).await,
            Err(ServerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_without_clients() {
        let server = AmiServer::with_config(config());
        let result = server.broadcast("Event: Nothing\r\n\r\n");
        assert_eq!(result.total, 0);
        assert!(result.all_succeeded());
        assert_eq!(result.success_rate(), 100.0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_startup_line_logged() {
        let server = AmiServer::with_config(config());
        let addr = server.listen(0).await.unwrap();
        server.close().await.unwrap();

        assert!(logs_contain(&format!(
            "Asterisk AMI Test Server listening on {} port",
            addr.port()
        )));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_silent_suppresses_startup_line() {
        let server = AmiServer::with_config(config().with_silent(true));
        server.listen(0).await.unwrap();
        server.close().await.unwrap();

        assert!(!logs_contain("Asterisk AMI Test Server listening"));
    }
}
