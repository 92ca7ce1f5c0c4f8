//! Client configuration loaded from environment variables.
//!
//! Every setting has a default pointing at the local development services,
//! so a client can start with zero configuration.

use std::time::Duration;

use parley_net::{Backoff, ConnectionConfig};
use parley_shared::constants::{
    DEFAULT_HEARTBEAT_SECS, DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_CAP_MS,
    DEFAULT_RECONNECT_MAX_ATTEMPTS,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Push-delivery WebSocket endpoint. `?user_id=` is appended on connect.
    /// Env: `PARLEY_PUSH_URL`
    /// Default: `ws://localhost:5004/ws`
    pub push_url: String,

    /// Base URL of the chat listing service.
    /// Env: `PARLEY_CHATS_URL`
    /// Default: `http://localhost:5002`
    pub chats_url: String,

    /// Base URL of the message history service.
    /// Env: `PARLEY_MESSAGES_URL`
    /// Default: `http://localhost:5003`
    pub messages_url: String,

    /// Base URL of the users directory service.
    /// Env: `PARLEY_USERS_URL`
    /// Default: `http://localhost:5001`
    pub users_url: String,

    /// Env: `PARLEY_HEARTBEAT_SECS`
    /// Default: `30`
    pub heartbeat_period: Duration,

    /// Env: `PARLEY_RECONNECT_BASE_MS`
    /// Default: `1000`
    pub reconnect_base: Duration,

    /// Env: `PARLEY_RECONNECT_CAP_MS`
    /// Default: `30000`
    pub reconnect_cap: Duration,

    /// Env: `PARLEY_RECONNECT_MAX_ATTEMPTS`
    /// Default: `5`
    pub reconnect_max_attempts: u32,

    /// Drop a channel that has been silent for this long.
    /// Env: `PARLEY_LIVENESS_TIMEOUT_SECS`
    /// Default: unset (disabled).
    pub liveness_timeout: Option<Duration>,

    /// Env: `PARLEY_HTTP_TIMEOUT_SECS`
    /// Default: `10`
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            push_url: "ws://localhost:5004/ws".to_string(),
            chats_url: "http://localhost:5002".to_string(),
            messages_url: "http://localhost:5003".to_string(),
            users_url: "http://localhost:5001".to_string(),
            heartbeat_period: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            reconnect_base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            reconnect_cap: Duration::from_millis(DEFAULT_RECONNECT_CAP_MS),
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            liveness_timeout: None,
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLEY_PUSH_URL") {
            config.push_url = url;
        }
        if let Some(url) = lookup("PARLEY_CHATS_URL") {
            config.chats_url = url;
        }
        if let Some(url) = lookup("PARLEY_MESSAGES_URL") {
            config.messages_url = url;
        }
        if let Some(url) = lookup("PARLEY_USERS_URL") {
            config.users_url = url;
        }

        if let Some(secs) = parse_number(&lookup, "PARLEY_HEARTBEAT_SECS") {
            if secs == 0 {
                tracing::warn!("PARLEY_HEARTBEAT_SECS must be positive, using default");
            } else {
                config.heartbeat_period = Duration::from_secs(secs);
            }
        }
        if let Some(ms) = parse_number(&lookup, "PARLEY_RECONNECT_BASE_MS") {
            config.reconnect_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "PARLEY_RECONNECT_CAP_MS") {
            config.reconnect_cap = Duration::from_millis(ms);
        }
        if let Some(n) = parse_number(&lookup, "PARLEY_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect_max_attempts = n;
        }
        if let Some(secs) = parse_number::<u64>(&lookup, "PARLEY_LIVENESS_TIMEOUT_SECS") {
            config.liveness_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parse_number(&lookup, "PARLEY_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(secs);
        }

        if config.reconnect_cap < config.reconnect_base {
            tracing::warn!(
                base_ms = config.reconnect_base.as_millis() as u64,
                cap_ms = config.reconnect_cap.as_millis() as u64,
                "Reconnect cap below base delay, raising cap to base"
            );
            config.reconnect_cap = config.reconnect_base;
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            backoff: Backoff::new(
                self.reconnect_base,
                self.reconnect_cap,
                self.reconnect_max_attempts,
            ),
            heartbeat_period: self.heartbeat_period,
            liveness_timeout: self.liveness_timeout,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number in environment, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.push_url, "ws://localhost:5004/ws");
        assert_eq!(config.users_url, "http://localhost:5001");
        assert_eq!(config.heartbeat_period, Duration::from_secs(30));
        assert_eq!(config.reconnect_max_attempts, 5);
        assert!(config.liveness_timeout.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = from_pairs(&[
            ("PARLEY_PUSH_URL", "wss://push.example.com/ws"),
            ("PARLEY_USERS_URL", "https://users.example.com"),
            ("PARLEY_HEARTBEAT_SECS", "15"),
            ("PARLEY_RECONNECT_MAX_ATTEMPTS", "8"),
            ("PARLEY_LIVENESS_TIMEOUT_SECS", "90"),
        ]);
        assert_eq!(config.push_url, "wss://push.example.com/ws");
        assert_eq!(config.users_url, "https://users.example.com");
        assert_eq!(config.heartbeat_period, Duration::from_secs(15));
        assert_eq!(config.reconnect_max_attempts, 8);
        assert_eq!(config.liveness_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("PARLEY_HEARTBEAT_SECS", "soon"),
            ("PARLEY_RECONNECT_BASE_MS", "-1"),
        ]);
        assert_eq!(config.heartbeat_period, Duration::from_secs(30));
        assert_eq!(config.reconnect_base, Duration::from_millis(1000));

        let config = from_pairs(&[("PARLEY_HEARTBEAT_SECS", "0")]);
        assert_eq!(config.heartbeat_period, Duration::from_secs(30));
    }

    #[test]
    fn test_cap_never_below_base() {
        let config = from_pairs(&[
            ("PARLEY_RECONNECT_BASE_MS", "5000"),
            ("PARLEY_RECONNECT_CAP_MS", "2000"),
        ]);
        assert_eq!(config.reconnect_cap, Duration::from_millis(5000));
        let backoff = config.connection_config().backoff;
        assert_eq!(backoff.delay(0), Duration::from_millis(5000));
    }
}
