//! Server configuration.

use std::time::Duration;

use mutclip_clipboard::ClipConfig;

use crate::MutclipError;

/// Everything the server needs to know before it binds.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: String,

    /// Hostnames allowed in a WebSocket `Origin` header. Empty admits
    /// every origin.
    pub allowed_origins: Vec<String>,

    /// A socket that sends nothing for this long is closed.
    pub conn_idle_timeout: Duration,

    /// Capacity of each connection's outbound queue.
    pub sink_capacity: usize,

    pub clip: ClipConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            allowed_origins: Vec::new(),
            conn_idle_timeout: Duration::from_secs(60),
            sink_capacity: 15,
            clip: ClipConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads overrides from the process environment.
    ///
    /// | variable                 | meaning                                  |
    /// |--------------------------|------------------------------------------|
    /// | `MUTCLIP_BIND`           | listen address                           |
    /// | `ORIGINS`                | space-separated allowed origin hostnames |
    /// | `MUTCLIP_IDLE_SECS`      | clip idle timeout                        |
    /// | `MUTCLIP_CONN_IDLE_SECS` | connection idle timeout                  |
    ///
    /// # Errors
    /// `MutclipError::Config` if a duration isn't a whole number of seconds.
    pub fn from_env() -> Result<Self, MutclipError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MutclipError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("MUTCLIP_BIND") {
            config.bind_addr = bind;
        }
        if let Some(origins) = lookup("ORIGINS") {
            config.allowed_origins = origins.split_whitespace().map(str::to_string).collect();
        }
        if let Some(secs) = lookup("MUTCLIP_IDLE_SECS") {
            config.clip.idle_timeout = parse_secs("MUTCLIP_IDLE_SECS", &secs)?;
        }
        if let Some(secs) = lookup("MUTCLIP_CONN_IDLE_SECS") {
            config.conn_idle_timeout = parse_secs("MUTCLIP_CONN_IDLE_SECS", &secs)?;
        }

        Ok(config)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, MutclipError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| MutclipError::Config(format!("{key}={value:?}: {e}")))
}
