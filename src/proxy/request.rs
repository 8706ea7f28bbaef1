//! Connection-request parameter carriers.

use std::io;
use std::net::SocketAddr;

use tokio::net::lookup_host;

use crate::error::{ConnectorError, Result};
use crate::{ConnectionId, TenantId};

/// Parameters for establishing a brand-new connection (outbound or
/// listening).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnectionRequest {
    pub tenant_id: TenantId,
    /// Hostname or IP literal.
    pub address: String,
    pub port: u16,
    pub listening: bool,
}

impl NewConnectionRequest {
    pub fn outbound(tenant_id: TenantId, address: impl Into<String>, port: u16) -> Self {
        Self {
            tenant_id,
            address: address.into(),
            port,
            listening: false,
        }
    }

    pub fn listening(tenant_id: TenantId, address: impl Into<String>, port: u16) -> Self {
        Self {
            tenant_id,
            address: address.into(),
            port,
            listening: true,
        }
    }

    /// Resolve the address/port pair to a socket address.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        lookup_host((self.address.as_str(), self.port))
            .await
            .map_err(ConnectorError::Establishment)?
            .next()
            .ok_or_else(|| {
                ConnectorError::Establishment(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve to any address", self.address),
                ))
            })
    }
}

/// Parameters for re-attaching to an already-live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingConnectionRequest {
    pub tenant_id: TenantId,
    pub connection_id: ConnectionId,
}

impl ExistingConnectionRequest {
    pub fn new(tenant_id: TenantId, connection_id: ConnectionId) -> Self {
        Self {
            tenant_id,
            connection_id,
        }
    }
}

/// Either kind of connection request, as checked against a proxy's
/// identity when a handle is issued.
#[derive(Debug, Clone)]
pub enum ConnectionRequest {
    New(NewConnectionRequest),
    Existing(ExistingConnectionRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let request = NewConnectionRequest::outbound(1, "127.0.0.1", 4000);
        let addr = request.resolve().await.unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:4000");
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let request = NewConnectionRequest::listening(1, "localhost", 4000);
        let addr = request.resolve().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 4000);
    }
}
