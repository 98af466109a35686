//! Client configuration (strict parsing).

use crate::error::{Result, SpeakerBusError};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Settings shared by the bus connection and the state synchronizer
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// WebSocket URL of the NATS server (`ws://` or `wss://`)
    pub server_url: String,

    /// Name announced in the NATS `CONNECT` handshake
    pub client_name: String,

    /// Seek poll period while a playlist is non-empty
    pub poll_interval_ms: u64,

    /// How long `Connection::connect` waits for the first handshake
    pub connect_timeout_ms: u64,

    /// Upper bound for the reconnect backoff
    pub max_reconnect_backoff_secs: u64,

    /// Client keepalive PING period
    pub ping_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            client_name: format!("speaker-bus-{}", uuid::Uuid::new_v4()),
            poll_interval_ms: 500,
            connect_timeout_ms: 5000,
            max_reconnect_backoff_secs: 60,
            ping_interval_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Config pointing at the given server, everything else defaulted
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)
            .map_err(|e| SpeakerBusError::Config(format!("read config failed: {e}")))?;
        Self::from_yaml_str(&s)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: ClientConfig = serde_yaml::from_str(s)
            .map_err(|e| SpeakerBusError::Config(format!("invalid yaml: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(SpeakerBusError::Config(format!(
                "server_url must use ws:// or wss://, got {:?}",
                self.server_url
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(SpeakerBusError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.ping_interval_secs == 0 {
            return Err(SpeakerBusError::Config("ping_interval_secs must be > 0".into()));
        }
        if self.max_reconnect_backoff_secs == 0 {
            return Err(SpeakerBusError::Config(
                "max_reconnect_backoff_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn max_reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_backoff_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}
