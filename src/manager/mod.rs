//! Per-tenant transport manager: owns the live sockets, allocates
//! connection identifiers and forwards lifecycle notifications upward.

mod context;
mod io;
mod stats;

pub use stats::ManagerStatsSnapshot;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::{TcpSocket, TcpStream};
use tokio::runtime::{self, Runtime};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;

use crate::config::SocketConfig;
use crate::error::{ConnectorError, Result};
use crate::events::{DisconnectNotification, InboundMessage, ListenerSet};
use crate::{ConnectionId, TenantId};

use context::ConnectionContext;
use io::ChannelEvents;
use stats::ManagerStats;

const SHUTDOWN_TIMEOUT_SECS: u64 = 60;

/// Owns every socket of one tenant.
///
/// Identifiers come from a single monotonically increasing counter and are
/// never reused while the manager is alive. Every physical connection gets
/// its own: the listening socket itself, each accepted inbound connection
/// and each established outbound connection.
///
/// Sockets are driven on two dedicated runtimes (an acceptor pool and a
/// worker pool) sized by the tenant's configuration, so tearing a tenant
/// down cannot stall unrelated tenants.
pub struct TcpManager {
    tenant_id: TenantId,
    config: SocketConfig,
    connections: DashMap<ConnectionId, ConnectionContext>,
    ids: AtomicU64,
    listeners: Arc<ListenerSet>,
    acceptor_pool: Mutex<Option<Runtime>>,
    worker_pool: Mutex<Option<Runtime>>,
    acceptor_handle: runtime::Handle,
    worker_handle: runtime::Handle,
    stats: ManagerStats,
    closing: AtomicBool,
    weak: Weak<TcpManager>,
}

impl TcpManager {
    /// Build a manager for `tenant_id`, spinning up its acceptor and worker
    /// pools. The configuration is validated first.
    pub fn new(
        tenant_id: TenantId,
        config: SocketConfig,
        listeners: Arc<ListenerSet>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let acceptor_pool = pool_runtime("acceptor", tenant_id, config.acceptor_threads)?;
        let worker_pool = pool_runtime("worker", tenant_id, config.worker_threads)?;
        let acceptor_handle = acceptor_pool.handle().clone();
        let worker_handle = worker_pool.handle().clone();

        tracing::info!(
            tenant_id,
            acceptor_threads = config.acceptor_threads,
            worker_threads = config.worker_threads,
            "Transport manager started"
        );

        Ok(Arc::new_cyclic(|weak| Self {
            tenant_id,
            config,
            connections: DashMap::new(),
            ids: AtomicU64::new(0),
            listeners,
            acceptor_pool: Mutex::new(Some(acceptor_pool)),
            worker_pool: Mutex::new(Some(worker_pool)),
            acceptor_handle,
            worker_handle,
            stats: ManagerStats::default(),
            closing: AtomicBool::new(false),
            weak: weak.clone(),
        }))
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Open an outbound connection, suspending the caller until the attempt
    /// resolves. Bounded only by the configured connect timeout, if any.
    pub async fn connect(&self, target: SocketAddr) -> Result<ConnectionId> {
        let socket = self.socket_for(&target)?;
        let stream = match self.config.connect_timeout() {
            Some(limit) => timeout(limit, socket.connect(target)).await.map_err(|_| {
                ConnectorError::Establishment(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {target} timed out after {limit:?}"),
                ))
            })??,
            None => socket.connect(target).await?,
        };
        stream.set_nodelay(true)?;

        let id = self.register_stream(stream)?;
        tracing::info!(
            tenant_id = self.tenant_id,
            connection_id = id,
            remote = %target,
            "Outbound connection established"
        );
        Ok(id)
    }

    /// Bind a listening socket; returns as soon as the bind resolves with
    /// the identifier of the listening socket itself. Ids for accepted
    /// inbound connections are allocated independently as they arrive.
    pub async fn listen(&self, local: SocketAddr) -> Result<ConnectionId> {
        let socket = self.socket_for(&local)?;
        socket.set_reuseaddr(true)?;
        socket.bind(local)?;
        let listener = socket.listen(self.config.backlog)?;
        let bound = listener.local_addr()?;

        let id = self.next_id();
        let shutdown = Arc::new(Notify::new());
        self.connections
            .insert(id, ConnectionContext::listener(bound, shutdown.clone()));
        self.stats.record_opened();

        let events = self.shared()?;
        self.acceptor_handle
            .spawn(io::drive_acceptor(events, listener, id, shutdown));

        tracing::info!(
            tenant_id = self.tenant_id,
            connection_id = id,
            local = %bound,
            "Listening socket bound"
        );
        Ok(id)
    }

    /// Queue bytes for asynchronous transmission; does not wait for
    /// delivery.
    pub fn send(&self, id: ConnectionId, data: Vec<u8>) -> Result<()> {
        let ctx = self
            .connections
            .get(&id)
            .ok_or(ConnectorError::ConnectionClosed(id))?;
        let outbound = ctx
            .outbound
            .as_ref()
            .ok_or(ConnectorError::ConnectionClosed(id))?;
        let len = data.len();
        outbound
            .send(data)
            .map_err(|_| ConnectorError::ConnectionClosed(id))?;
        self.stats.record_sent(len);
        Ok(())
    }

    /// Request disconnection of one socket. Returns false for an unknown
    /// identifier; otherwise teardown proceeds asynchronously and completes
    /// with a disconnect notification.
    pub fn close(&self, id: ConnectionId) -> bool {
        match self.connections.get(&id) {
            Some(ctx) => {
                tracing::debug!(
                    tenant_id = self.tenant_id,
                    connection_id = id,
                    "Disconnection requested"
                );
                ctx.shutdown.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_listening(&self, id: ConnectionId) -> Result<bool> {
        self.connections
            .get(&id)
            .map(|ctx| ctx.listening)
            .ok_or(ConnectorError::ConnectionClosed(id))
    }

    /// Local address of a connection or listening socket; lets callers
    /// learn an ephemeral listen port.
    pub fn local_address(&self, id: ConnectionId) -> Result<SocketAddr> {
        self.connections
            .get(&id)
            .map(|ctx| ctx.local)
            .ok_or(ConnectorError::ConnectionClosed(id))
    }

    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> ManagerStatsSnapshot {
        let mut active = 0;
        let mut listening = 0;
        for entry in self.connections.iter() {
            if entry.listening {
                listening += 1;
            } else {
                active += 1;
            }
        }
        self.stats.snapshot(active, listening)
    }

    /// Tear the whole manager down: stop both pools with a bounded graceful
    /// wait and drop every context without per-connection notifications
    /// (the owning tenant is gone, nobody is listening).
    pub async fn shutdown(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            tenant_id = self.tenant_id,
            active = self.connections.len(),
            "Shutting down transport manager"
        );

        for entry in self.connections.iter() {
            entry.value().shutdown.notify_one();
        }

        let acceptor = self.acceptor_pool.lock().await.take();
        let worker = self.worker_pool.lock().await.take();
        let joined = tokio::task::spawn_blocking(move || {
            let wait = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
            if let Some(pool) = acceptor {
                pool.shutdown_timeout(wait);
            }
            if let Some(pool) = worker {
                pool.shutdown_timeout(wait);
            }
        })
        .await;
        if joined.is_err() {
            tracing::warn!(tenant_id = self.tenant_id, "Pool shutdown task panicked");
        }

        self.connections.clear();
        tracing::info!(tenant_id = self.tenant_id, "Transport manager closed");
    }

    fn next_id(&self) -> ConnectionId {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn socket_for(&self, addr: &SocketAddr) -> Result<TcpSocket> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_keepalive(self.config.keepalive)?;
        Ok(socket)
    }

    /// Allocate an id and start the pump task for an established stream.
    fn register_stream(&self, stream: TcpStream) -> std::io::Result<ConnectionId> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        let id = self.next_id();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        self.connections.insert(
            id,
            ConnectionContext::stream(outbound_tx, local, remote, shutdown.clone()),
        );
        self.stats.record_opened();

        let events = self
            .shared()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "manager is gone"))?;
        self.worker_handle
            .spawn(io::drive_connection(events, id, stream, outbound_rx, shutdown));
        Ok(id)
    }

    fn shared(&self) -> Result<Arc<TcpManager>> {
        self.weak
            .upgrade()
            .ok_or_else(|| ConnectorError::Internal("transport manager already dropped".into()))
    }
}

#[async_trait]
impl ChannelEvents for TcpManager {
    fn inbound_accepted(&self, stream: TcpStream) -> std::io::Result<ConnectionId> {
        stream.set_nodelay(true)?;
        self.register_stream(stream)
    }

    async fn data_received(&self, id: ConnectionId, data: Vec<u8>) {
        let addresses = self.connections.get(&id).map(|ctx| (ctx.local, ctx.remote));
        let Some((local, remote)) = addresses else {
            // Socket already torn down, drop the bytes
            tracing::debug!(
                tenant_id = self.tenant_id,
                connection_id = id,
                "Dropping data for unknown connection"
            );
            return;
        };
        self.stats.record_received(data.len());
        let message = InboundMessage {
            connection_id: id,
            data,
            local,
            remote,
        };
        self.listeners.notify_message(&message).await;
    }

    async fn channel_closed(&self, id: ConnectionId, cause: Option<std::io::Error>) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let Some((_, ctx)) = self.connections.remove(&id) else {
            tracing::debug!(
                tenant_id = self.tenant_id,
                connection_id = id,
                "Shutdown callback for unknown connection"
            );
            return;
        };
        self.stats.record_closed();

        let notification = DisconnectNotification {
            connection_id: id,
            local: ctx.local,
            remote: ctx.remote,
            cause: cause.map(Arc::new),
        };
        if notification.is_error() {
            tracing::warn!(
                tenant_id = self.tenant_id,
                connection_id = id,
                cause = %notification.cause.as_ref().map(|c| c.to_string()).unwrap_or_default(),
                "Connection closed by error"
            );
        } else {
            let lifetime = chrono::Utc::now().signed_duration_since(ctx.established_at);
            tracing::debug!(
                tenant_id = self.tenant_id,
                connection_id = id,
                lifetime_ms = lifetime.num_milliseconds(),
                "Connection closed"
            );
        }
        self.listeners.notify_disconnected(&notification).await;
    }
}

impl Drop for TcpManager {
    fn drop(&mut self) {
        // shutdown() normally ran already; shutdown_background keeps a
        // stray drop from blocking inside an async context
        for pool in [&self.acceptor_pool, &self.worker_pool] {
            if let Ok(mut slot) = pool.try_lock() {
                if let Some(runtime) = slot.take() {
                    runtime.shutdown_background();
                }
            }
        }
    }
}

fn pool_runtime(kind: &str, tenant_id: TenantId, threads: usize) -> Result<Runtime> {
    runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name(format!("tcp-mux-{kind}-{tenant_id}"))
        .enable_all()
        .build()
        .map_err(|e| ConnectorError::Internal(format!("failed to start {kind} pool: {e}")))
}
