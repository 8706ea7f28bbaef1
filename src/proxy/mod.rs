//! Physical-connection proxies and the detachable handles issued to
//! callers.
//!
//! A [`ConnectionProxy`] owns the identity of one physical connection
//! (tenant and connection identifiers) across its lifetime and can be
//! rebound to a different connection between uses. The [`TcpConnection`]
//! handles it issues are thin facades routing to whichever proxy currently
//! owns them; swapping in a new handle invalidates the previous one
//! without touching the socket.

mod handle;
mod request;

pub use handle::TcpConnection;
pub use request::{ConnectionRequest, ExistingConnectionRequest, NewConnectionRequest};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;

use crate::error::{ConnectorError, Result};
use crate::registry::TenantRegistry;
use crate::validation;
use crate::{ConnectionId, TenantId};

/// Observer of handle lifecycle transitions raised by a proxy; the
/// integration surface for a surrounding handle pool.
pub trait HandleEventListener: Send + Sync {
    /// A caller closed its handle. The physical connection stays up; the
    /// handle is available for reclamation.
    fn connection_closed(&self, handle: &Arc<TcpConnection>);
}

struct HandleEventListeners {
    listeners: DashMap<usize, Arc<dyn HandleEventListener>>,
}

impl HandleEventListeners {
    fn new() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }

    fn key(listener: &Arc<dyn HandleEventListener>) -> usize {
        Arc::as_ptr(listener) as *const () as usize
    }

    fn add(&self, listener: Arc<dyn HandleEventListener>) {
        self.listeners.insert(Self::key(&listener), listener);
    }

    fn remove(&self, listener: &Arc<dyn HandleEventListener>) {
        self.listeners.remove(&Self::key(listener));
    }

    fn clear(&self) {
        self.listeners.clear();
    }

    fn notify_closed(&self, handle: &Arc<TcpConnection>) {
        if self.listeners.is_empty() {
            tracing::warn!("Raising connection-closed event with no registered listeners");
            return;
        }
        for listener in self.listeners.iter() {
            listener.value().connection_closed(handle);
        }
    }
}

/// Owner of one physical connection's identity and state.
///
/// `idle → running` on a successful `reset_*`; `cleanup`/`destroy` return
/// it to idle so it can be rebound. Resetting a proxy that is still
/// running is a contract violation surfaced to the caller.
pub struct ConnectionProxy {
    registry: Arc<TenantRegistry>,
    tenant_id: AtomicU64,
    connection_id: AtomicU64,
    listening: AtomicBool,
    running: AtomicBool,
    handle: Mutex<Option<Arc<TcpConnection>>>,
    handle_listeners: HandleEventListeners,
    weak: Weak<ConnectionProxy>,
}

impl std::fmt::Debug for ConnectionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProxy")
            .field("tenant_id", &self.tenant_id.load(Ordering::Relaxed))
            .field("connection_id", &self.connection_id.load(Ordering::Relaxed))
            .field("listening", &self.listening.load(Ordering::Relaxed))
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ConnectionProxy {
    /// Allocate a proxy for a brand-new connection (outbound or listening,
    /// per the request).
    pub async fn new_connection(
        registry: Arc<TenantRegistry>,
        request: &NewConnectionRequest,
    ) -> Result<Arc<Self>> {
        let proxy = Self::idle(registry);
        proxy.reset_new(request).await?;
        Ok(proxy)
    }

    /// Allocate a proxy re-attached to an already-live connection.
    pub fn existing_connection(
        registry: Arc<TenantRegistry>,
        request: &ExistingConnectionRequest,
    ) -> Result<Arc<Self>> {
        let proxy = Self::idle(registry);
        proxy.reset_existing(request)?;
        Ok(proxy)
    }

    fn idle(registry: Arc<TenantRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registry,
            tenant_id: AtomicU64::new(0),
            connection_id: AtomicU64::new(0),
            listening: AtomicBool::new(false),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
            handle_listeners: HandleEventListeners::new(),
            weak: weak.clone(),
        })
    }

    /// Bind this proxy to a freshly established connection described by
    /// `request`: validate, connect or bind, store the returned identifier.
    pub async fn reset_new(&self, request: &NewConnectionRequest) -> Result<()> {
        tracing::debug!(
            tenant_id = request.tenant_id,
            address = %request.address,
            port = request.port,
            listening = request.listening,
            "Resetting proxy for new connection"
        );

        let violations = validation::validate_new_request(request);
        if !violations.is_empty() {
            for violation in &violations {
                tracing::warn!(violation = %violation, "Connection request rejected");
            }
            return Err(ConnectorError::Validation(violations.join("; ")));
        }

        self.acquire_running()?;
        let established = async {
            let target = request.resolve().await?;
            if request.listening {
                self.registry.listen(request.tenant_id, target).await
            } else {
                self.registry.connect(request.tenant_id, target).await
            }
        }
        .await;

        match established {
            Ok(id) => {
                self.tenant_id.store(request.tenant_id, Ordering::SeqCst);
                self.connection_id.store(id, Ordering::SeqCst);
                self.listening.store(request.listening, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Bind this proxy to an already-live connection. The listening flag is
    /// refreshed best-effort; a failed lookup leaves it unset.
    pub fn reset_existing(&self, request: &ExistingConnectionRequest) -> Result<()> {
        tracing::debug!(
            tenant_id = request.tenant_id,
            connection_id = request.connection_id,
            "Resetting proxy for existing connection"
        );

        self.acquire_running()?;
        self.tenant_id.store(request.tenant_id, Ordering::SeqCst);
        self.connection_id
            .store(request.connection_id, Ordering::SeqCst);
        match self
            .registry
            .is_listening(request.tenant_id, request.connection_id)
        {
            Ok(listening) => self.listening.store(listening, Ordering::SeqCst),
            Err(e) => {
                self.listening.store(false, Ordering::SeqCst);
                tracing::debug!(
                    tenant_id = request.tenant_id,
                    connection_id = request.connection_id,
                    error = %e,
                    "Could not refresh listening flag for adopted connection"
                );
            }
        }
        Ok(())
    }

    fn acquire_running(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConnectorError::ContractViolation(
                "proxy reset while still running".to_string(),
            ));
        }
        Ok(())
    }

    /// Issue a fresh handle bound to this proxy, invalidating whichever
    /// handle was previously bound. `request` must be consistent with the
    /// proxy's identity.
    pub fn connection(&self, request: &ConnectionRequest) -> Result<Arc<TcpConnection>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ConnectorError::ContractViolation(
                "connection requested from a proxy that is not running".to_string(),
            ));
        }
        self.check_request(request)?;

        let handle = Arc::new(TcpConnection::bound(self.weak.clone()));
        self.replace_active_handle(Some(handle.clone()));
        Ok(handle)
    }

    /// Re-parent an externally supplied handle to this proxy and make it
    /// the currently-bound one.
    pub fn associate(&self, handle: Arc<TcpConnection>) {
        tracing::debug!(
            connection_id = self.connection_id(),
            "Handle association replacement requested"
        );
        handle.reassign(self.weak.clone());
        self.replace_active_handle(Some(handle));
    }

    /// Detach the current handle without closing the socket and return the
    /// proxy to idle.
    pub fn cleanup(&self) {
        self.replace_active_handle(None);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Detach and request disconnection of the physical connection.
    pub fn disconnect(&self) -> Result<()> {
        tracing::debug!(
            tenant_id = self.tenant_id(),
            connection_id = self.connection_id(),
            "Proxy disconnect requested"
        );
        self.cleanup();
        self.registry.close(self.tenant_id(), self.connection_id())?;
        Ok(())
    }

    /// Disconnect and tear down the proxy's bookkeeping.
    pub fn destroy(&self) -> Result<()> {
        let result = self.disconnect();
        self.handle_listeners.clear();
        result
    }

    /// A caller closed its handle: tell the registered handle-event
    /// listeners, carrying the current handle, without closing the socket.
    pub fn request_cleanup(&self) {
        let current = self
            .handle
            .lock()
            .expect("handle slot lock poisoned")
            .clone();
        let Some(handle) = current else {
            tracing::warn!("Cleanup requested without a bound connection handle");
            return;
        };
        self.handle_listeners.notify_closed(&handle);
    }

    pub fn add_handle_listener(&self, listener: Arc<dyn HandleEventListener>) {
        self.handle_listeners.add(listener);
    }

    pub fn remove_handle_listener(&self, listener: &Arc<dyn HandleEventListener>) {
        self.handle_listeners.remove(listener);
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id.load(Ordering::SeqCst)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn send(&self, data: Vec<u8>) -> Result<()> {
        if self.listening.load(Ordering::SeqCst) {
            return Err(ConnectorError::Unsupported(
                "sending data through a listening socket".to_string(),
            ));
        }
        self.registry
            .send(self.tenant_id(), self.connection_id(), data)
    }

    fn check_request(&self, request: &ConnectionRequest) -> Result<()> {
        match request {
            ConnectionRequest::Existing(info) => {
                if info.tenant_id != self.tenant_id() || info.connection_id != self.connection_id()
                {
                    return Err(ConnectorError::Validation(
                        "incompatible tenant and connection id supplied to proxy".to_string(),
                    ));
                }
            }
            ConnectionRequest::New(info) => {
                if info.tenant_id != self.tenant_id() {
                    return Err(ConnectorError::Validation(
                        "incompatible tenant id supplied to proxy".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Swap the currently-bound handle; only the swapping thread ever
    /// invalidates the handle it displaced.
    fn replace_active_handle(&self, new: Option<Arc<TcpConnection>>) {
        let old = {
            let mut slot = self.handle.lock().expect("handle slot lock poisoned");
            std::mem::replace(&mut *slot, new)
        };
        if let Some(old) = old {
            old.invalidate_if_routed_to(self);
        }
    }
}
