//! Live-socket bookkeeping records.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};

/// Bookkeeping record for one live socket, exclusively owned by the
/// transport manager's identifier map.
pub(crate) struct ConnectionContext {
    /// Writer side of the connection's outbound queue; `None` for listening
    /// sockets, which have no output path.
    pub outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
    pub listening: bool,
    /// Signals the driving task to tear the socket down.
    pub shutdown: Arc<Notify>,
    pub established_at: DateTime<Utc>,
}

impl ConnectionContext {
    pub fn stream(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        local: SocketAddr,
        remote: SocketAddr,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            local,
            remote: Some(remote),
            listening: false,
            shutdown,
            established_at: Utc::now(),
        }
    }

    pub fn listener(local: SocketAddr, shutdown: Arc<Notify>) -> Self {
        Self {
            outbound: None,
            local,
            remote: None,
            listening: true,
            shutdown,
            established_at: Utc::now(),
        }
    }
}
