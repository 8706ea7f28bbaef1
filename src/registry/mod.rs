//! Tenant registry: creates, shares and tears down per-tenant transport
//! managers as listener endpoints come and go.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::SocketConfig;
use crate::error::{ConnectorError, Result};
use crate::events::{ListenerSet, MessageListener};
use crate::manager::TcpManager;
use crate::{ConnectionId, TenantId};

#[derive(Clone)]
struct TenantEntry {
    manager: Arc<TcpManager>,
    listeners: Arc<ListenerSet>,
}

/// Maps each tenant to its transport manager and registered listener
/// endpoints.
///
/// A tenant's manager exists exactly while the tenant has at least one
/// registered endpoint: the first activation constructs it, the last
/// deactivation closes it.
///
/// Structural transitions (create on first activation, destroy on last
/// deactivation, shutdown-all) are serialized by one registry-wide lock so
/// concurrent activations can never construct two managers for the same
/// tenant. Steady-state per-connection operations only touch the
/// concurrent tenant map and the manager's own identifier map.
pub struct TenantRegistry {
    tenants: DashMap<TenantId, TenantEntry>,
    structural: Mutex<()>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            structural: Mutex::new(()),
        }
    }

    /// Register a listener endpoint for `tenant_id`, constructing the
    /// tenant's transport manager from `config` if this is the first
    /// endpoint. The endpoint's `initialized()` is delivered
    /// asynchronously once registration completes.
    pub async fn activate(
        &self,
        tenant_id: TenantId,
        listener: Arc<dyn MessageListener>,
        config: SocketConfig,
    ) -> Result<()> {
        let _structural = self.structural.lock().await;

        let entry = match self.tenants.get(&tenant_id) {
            Some(existing) => existing.value().clone(),
            None => {
                let listeners = Arc::new(ListenerSet::new());
                let manager = TcpManager::new(tenant_id, config, listeners.clone())?;
                let entry = TenantEntry { manager, listeners };
                self.tenants.insert(tenant_id, entry.clone());
                tracing::info!(tenant_id, "Tenant activated");
                entry
            }
        };

        if !entry.listeners.add(listener.clone()) {
            tracing::debug!(tenant_id, "Listener endpoint already registered");
        }

        tokio::spawn(async move {
            if let Err(e) = listener.initialized().await {
                tracing::warn!(tenant_id, error = %e, "Listener initialization callback failed");
            }
        });
        Ok(())
    }

    /// Deregister a listener endpoint; the last removal tears the tenant's
    /// manager down, forcibly closing every connection it still owns.
    pub async fn deactivate(&self, tenant_id: TenantId, listener: &Arc<dyn MessageListener>) {
        let _structural = self.structural.lock().await;

        let Some(entry) = self.tenants.get(&tenant_id).map(|e| e.value().clone()) else {
            tracing::warn!(tenant_id, "Deactivation for unknown tenant");
            return;
        };

        entry.listeners.remove(listener);
        if entry.listeners.is_empty() {
            self.tenants.remove(&tenant_id);
            entry.manager.shutdown().await;
            tracing::info!(tenant_id, "Last listener endpoint removed, tenant deactivated");
        }
    }

    /// Close every manager and clear the registry (process-wide stop).
    pub async fn shutdown_all(&self) {
        let _structural = self.structural.lock().await;

        let entries: Vec<(TenantId, TenantEntry)> = self
            .tenants
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        self.tenants.clear();

        futures::future::join_all(entries.into_iter().map(|(tenant_id, entry)| async move {
            entry.manager.shutdown().await;
            tracing::info!(tenant_id, "Tenant shut down");
        }))
        .await;
    }

    /// Resolve a tenant's transport manager; unknown tenants fail
    /// explicitly.
    pub fn manager(&self, tenant_id: TenantId) -> Result<Arc<TcpManager>> {
        self.tenants
            .get(&tenant_id)
            .map(|e| e.manager.clone())
            .ok_or(ConnectorError::UnknownTenant(tenant_id))
    }

    pub async fn connect(&self, tenant_id: TenantId, target: SocketAddr) -> Result<ConnectionId> {
        self.manager(tenant_id)?.connect(target).await
    }

    pub async fn listen(&self, tenant_id: TenantId, local: SocketAddr) -> Result<ConnectionId> {
        self.manager(tenant_id)?.listen(local).await
    }

    pub fn send(&self, tenant_id: TenantId, id: ConnectionId, data: Vec<u8>) -> Result<()> {
        self.manager(tenant_id)?.send(id, data)
    }

    pub fn close(&self, tenant_id: TenantId, id: ConnectionId) -> Result<bool> {
        Ok(self.manager(tenant_id)?.close(id))
    }

    pub fn is_listening(&self, tenant_id: TenantId, id: ConnectionId) -> Result<bool> {
        self.manager(tenant_id)?.is_listening(id)
    }

    pub fn local_address(&self, tenant_id: TenantId, id: ConnectionId) -> Result<SocketAddr> {
        self.manager(tenant_id)?.local_address(id)
    }

    pub fn active_tenants(&self) -> usize {
        self.tenants.len()
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}
