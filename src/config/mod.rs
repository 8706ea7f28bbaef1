use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::ConnectorError;
use crate::validation::NetAddressPolicy;

/// Per-tenant socket configuration, supplied at tenant activation.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// TCP keepalive enablement
    #[serde(default = "default_keepalive")]
    pub keepalive: bool,
    /// IP address to bind to
    #[serde(default = "default_local_address")]
    pub local_address: String,
    /// Local port to bind to (0 = ephemeral)
    #[serde(default)]
    pub local_port: u16,
    /// Acceptor pool thread count
    #[serde(default = "default_acceptor_threads")]
    pub acceptor_threads: usize,
    /// Worker pool thread count
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// TCP listening backlog size
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Upper bound for outbound connect attempts; `None` leaves the attempt unbounded
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

fn default_keepalive() -> bool {
    true
}

fn default_local_address() -> String {
    "0.0.0.0".to_string()
}

fn default_acceptor_threads() -> usize {
    2
}

fn default_worker_threads() -> usize {
    4
}

fn default_backlog() -> u32 {
    50
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            keepalive: default_keepalive(),
            local_address: default_local_address(),
            local_port: 0,
            acceptor_threads: default_acceptor_threads(),
            worker_threads: default_worker_threads(),
            backlog: default_backlog(),
            connect_timeout_secs: None,
        }
    }
}

impl SocketConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("keepalive", true)?
            .set_default("local_address", "0.0.0.0")?
            .set_default("local_port", 0)?
            .set_default("acceptor_threads", 2)?
            .set_default("worker_threads", 4)?
            .set_default("backlog", 50)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SOCKET_KEEPALIVE, SOCKET_LOCAL_ADDRESS, SOCKET_BACKLOG, etc.
            .add_source(Environment::with_prefix("socket").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Check option values before a transport manager is built from them.
    pub fn validate(&self) -> crate::Result<()> {
        let policy = NetAddressPolicy::addresses_only();
        if !policy.is_valid(&self.local_address) {
            return Err(ConnectorError::Validation(format!(
                "invalid local IP address {}",
                self.local_address
            )));
        }
        if self.acceptor_threads == 0 {
            return Err(ConnectorError::Validation(
                "acceptor thread count must be at least 1".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(ConnectorError::Validation(
                "worker thread count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Default bind address assembled from `local_address` and `local_port`.
    pub fn local_socket_addr(&self) -> crate::Result<SocketAddr> {
        let ip: IpAddr = self.local_address.parse().map_err(|_| {
            ConnectorError::Validation(format!("invalid local IP address {}", self.local_address))
        })?;
        Ok(SocketAddr::new(ip, self.local_port))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SocketConfig::default();
        assert!(config.keepalive);
        assert_eq!(config.local_address, "0.0.0.0");
        assert_eq!(config.local_port, 0);
        assert_eq!(config.acceptor_threads, 2);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.backlog, 50);
        assert!(config.connect_timeout_secs.is_none());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SocketConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.local_socket_addr().unwrap().to_string(),
            "0.0.0.0:0"
        );
    }

    #[test]
    fn test_rejects_hostname_as_local_address() {
        let config = SocketConfig {
            local_address: "example.org".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConnectorError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_zero_sized_pools() {
        let config = SocketConfig {
            worker_threads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_timeout_mapping() {
        let config = SocketConfig {
            connect_timeout_secs: Some(15),
            ..Default::default()
        };
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(SocketConfig::default().connect_timeout(), None);
    }
}
