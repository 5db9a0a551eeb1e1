//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::time::Duration;

use bery_shared::constants::DEFAULT_HTTP_PORT;

use crate::router::RelayTimings;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket listener.
    /// Env: `HTTP_ADDR`, or `PORT` to change only the port.
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Human-readable name for this relay instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Bery Chat Relay"`
    pub instance_name: String,

    /// Delivered / read / assistant delays.
    /// Env: `DELIVERED_DELAY_MS`, `READ_DELAY_MS`, `ASSISTANT_DELAY_MS`
    pub timings: RelayTimings,

    /// Maximum number of concurrent connections (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    /// Default: `0`
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: "Bery Chat Relay".to_string(),
            timings: RelayTimings::default(),
            max_connections: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(delay) = parse_millis(&lookup, "DELIVERED_DELAY_MS") {
            config.timings.delivered = delay;
        }
        if let Some(delay) = parse_millis(&lookup, "READ_DELAY_MS") {
            config.timings.read = delay;
        }
        if let Some(delay) = parse_millis(&lookup, "ASSISTANT_DELAY_MS") {
            config.timings.assistant = delay;
        }

        // read must land after delivered
        if config.timings.read <= config.timings.delivered {
            tracing::warn!(
                delivered = ?config.timings.delivered,
                read = ?config.timings.read,
                "READ_DELAY_MS must exceed DELIVERED_DELAY_MS, using defaults"
            );
            let defaults = RelayTimings::default();
            config.timings.delivered = defaults.delivered;
            config.timings.read = defaults.read;
        }

        if let Some(val) = lookup("MAX_CONNECTIONS") {
            match val.trim().parse::<usize>() {
                Ok(n) => config.max_connections = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_CONNECTIONS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid delay, using default");
            None
        }
    }
}
