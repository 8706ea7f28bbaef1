// Infrastructure layer (shared components)
pub mod config;
pub mod error;

// Domain layer (connection management)
pub mod events;
pub mod manager;
pub mod proxy;
pub mod registry;
pub mod validation;

pub use self::config::SocketConfig;
pub use error::{ConnectorError, Result};
pub use events::{
    DisconnectNotification, InboundMessage, ListenerError, ListenerSet, MessageListener,
};
pub use manager::TcpManager;
pub use proxy::{
    ConnectionProxy, ConnectionRequest, ExistingConnectionRequest, HandleEventListener,
    NewConnectionRequest, TcpConnection,
};
pub use registry::TenantRegistry;

/// Identifier of an isolated multiplexing domain; supplied by the caller.
pub type TenantId = u64;

/// Identifier of a single connection, unique within one transport manager's lifetime.
pub type ConnectionId = u64;
