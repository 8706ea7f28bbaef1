//! Caller-facing connection handle.

use std::sync::{Arc, Mutex, Weak};

use crate::error::{ConnectorError, Result};
use crate::ConnectionId;

use super::ConnectionProxy;

/// Detachable facade over a proxy's physical connection.
///
/// The handle routes every operation through whichever proxy currently
/// owns it. The routing reference is not an ownership edge: the proxy
/// clears it when a newer handle displaces this one, after which every
/// operation fails with a detached error.
#[derive(Debug)]
pub struct TcpConnection {
    proxy: Mutex<Option<Weak<ConnectionProxy>>>,
}

impl TcpConnection {
    pub(crate) fn bound(proxy: Weak<ConnectionProxy>) -> Self {
        Self {
            proxy: Mutex::new(Some(proxy)),
        }
    }

    /// Identifier of the underlying connection.
    pub fn id(&self) -> Result<ConnectionId> {
        Ok(self.resolve()?.connection_id())
    }

    /// Queue bytes for transmission on the underlying connection.
    /// Listening sockets cannot send, only accept.
    pub fn send(&self, data: Vec<u8>) -> Result<()> {
        self.resolve()?.send(data)
    }

    /// Request disconnection of the underlying physical connection.
    pub fn disconnect(&self) -> Result<()> {
        self.resolve()?.disconnect()
    }

    /// Close this handle: the owning proxy raises a connection-closed event
    /// so a surrounding pool can reclaim it. The physical connection stays
    /// up.
    pub fn close(&self) -> Result<()> {
        self.resolve()?.request_cleanup();
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.resolve().is_ok()
    }

    pub(crate) fn reassign(&self, proxy: Weak<ConnectionProxy>) {
        *self.proxy.lock().expect("handle routing lock poisoned") = Some(proxy);
    }

    /// Clear the routing reference, but only while it still points at the
    /// displacing proxy: a handle that was re-parented elsewhere in the
    /// meantime stays attached to its new owner.
    pub(crate) fn invalidate_if_routed_to(&self, proxy: &ConnectionProxy) {
        let mut slot = self.proxy.lock().expect("handle routing lock poisoned");
        let routed_here = slot
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), proxy as *const ConnectionProxy));
        if routed_here {
            *slot = None;
        }
    }

    fn resolve(&self) -> Result<Arc<ConnectionProxy>> {
        self.proxy
            .lock()
            .expect("handle routing lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(ConnectorError::Detached)
    }
}
