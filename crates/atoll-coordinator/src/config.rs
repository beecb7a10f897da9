//! Startup configuration, read once from the environment.

use std::time::Duration;

/// Configuration errors are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot parse {var}={value:?}: {reason}")]
    BadValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Listen address, `host:port`.
    pub bind: String,
    /// How long an unauthenticated peer may stay connected.
    pub auth_timeout: Duration,
    /// Per-peer outbound queue capacity; overflow disconnects the peer.
    pub queue_size: usize,
    /// Authentication method names accepted at registration.
    pub auth_methods: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9090".into(),
            auth_timeout: Duration::from_secs(60),
            queue_size: 256,
            auth_methods: vec!["allow-all".into()],
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var("ATOLL_COORDINATOR_BIND") {
            config.bind = bind;
        }
        if let Ok(raw) = std::env::var("ATOLL_AUTH_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|e| ConfigError::BadValue {
                var: "ATOLL_AUTH_TIMEOUT_SECS",
                value: raw.clone(),
                reason: format!("{e}"),
            })?;
            config.auth_timeout = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("ATOLL_QUEUE_SIZE") {
            config.queue_size = raw.parse().map_err(|e| ConfigError::BadValue {
                var: "ATOLL_QUEUE_SIZE",
                value: raw.clone(),
                reason: format!("{e}"),
            })?;
        }
        if let Ok(raw) = std::env::var("ATOLL_AUTH_METHODS") {
            config.auth_methods = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        Ok(config)
    }
}
