//! Startup configuration, read once from the environment.

use std::time::Duration;

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
pub struct ServerConfig {
    /// Base coordinator URL; the auth method appends its query.
    pub coordinator_url: String,
    /// Authentication method used both toward the coordinator and on the
    /// data channels.
    pub auth_method: String,
    /// STUN/TURN server URLs for ICE.
    pub ice_servers: Vec<String>,
    pub reliable_queue_size: usize,
    pub unreliable_queue_size: usize,
    pub report_period: Duration,
    /// Deadline for a peer's first AUTH frame after its channels open.
    pub auth_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "ws://127.0.0.1:9090".into(),
            auth_method: "allow-all".into(),
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
            reliable_queue_size: 256,
            unreliable_queue_size: 256,
            report_period: Duration::from_secs(1),
            auth_timeout: Duration::from_secs(10),
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| ConfigError::BadValue {
        var,
        value: raw.clone(),
        reason: format!("{e}"),
    })
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ATOLL_COORDINATOR_URL") {
            config.coordinator_url = url;
        }
        if let Ok(method) = std::env::var("ATOLL_AUTH_METHOD") {
            config.auth_method = method;
        }
        if let Ok(raw) = std::env::var("ATOLL_ICE_SERVERS") {
            config.ice_servers = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Ok(raw) = std::env::var("ATOLL_RELIABLE_QUEUE_SIZE") {
            config.reliable_queue_size = parse_var("ATOLL_RELIABLE_QUEUE_SIZE", raw)?;
        }
        if let Ok(raw) = std::env::var("ATOLL_UNRELIABLE_QUEUE_SIZE") {
            config.unreliable_queue_size = parse_var("ATOLL_UNRELIABLE_QUEUE_SIZE", raw)?;
        }
        if let Ok(raw) = std::env::var("ATOLL_REPORT_PERIOD_MS") {
            config.report_period = Duration::from_millis(parse_var("ATOLL_REPORT_PERIOD_MS", raw)?);
        }
        if let Ok(raw) = std::env::var("ATOLL_AUTH_TIMEOUT_SECS") {
            config.auth_timeout = Duration::from_secs(parse_var("ATOLL_AUTH_TIMEOUT_SECS", raw)?);
        }
        Ok(config)
    }

    /// URL of the coordinator's comm-server endpoint, before auth decoration.
    pub fn discover_url(&self) -> String {
        format!("{}/discover", self.coordinator_url.trim_end_matches('/'))
    }
}
