//! Transport manager statistics (thread-safe with atomic counters).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct ManagerStats {
    pub total_opened: AtomicU64,
    pub total_closed: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl ManagerStats {
    pub fn record_opened(&self) {
        self.total_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.total_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_connections: usize, listening_sockets: usize) -> ManagerStatsSnapshot {
        ManagerStatsSnapshot {
            active_connections,
            listening_sockets,
            total_opened: self.total_opened.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a transport manager's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatsSnapshot {
    pub active_connections: usize,
    pub listening_sockets: usize,
    pub total_opened: u64,
    pub total_closed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
