use thiserror::Error;

use crate::{ConnectionId, TenantId};

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No active transport manager for tenant {0}")]
    UnknownTenant(TenantId),

    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("Connection establishment failed: {0}")]
    Establishment(#[from] std::io::Error),

    #[error("Connection is detached")]
    Detached,

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
