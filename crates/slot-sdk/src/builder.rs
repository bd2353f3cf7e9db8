//! Builder pattern for constructing a [`SlotClient`].

use std::sync::Arc;
use std::time::Duration;

use crate::client::SlotClient;
use crate::config::SlotConfig;
use crate::connection::{Connection, Settings};
use crate::endpoint;
use crate::handler::{CommandHandler, LoggingHandler};
use crate::reconnect::ReconnectBackoff;
use crate::types::SlotSdkError;

/// Fluent builder for [`SlotClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use slot_sdk::SlotClientBuilder;
/// let client = SlotClientBuilder::new()
///     .relay_url("ws://relay.local:8081/ws")
///     .slot_id("bridge-1")
///     .heartbeat_interval(std::time::Duration::from_secs(10))
///     .build()
///     .unwrap();
/// ```
pub struct SlotClientBuilder {
    relay_url: String,
    slot_id: String,
    protocol_version: String,
    heartbeat_interval: Duration,
    heartbeat_tick: Duration,
    register_timeout: Duration,
    pull_timeout: Duration,
    reconnect_backoff: ReconnectBackoff,
    handler: Arc<dyn CommandHandler>,
}

impl SlotClientBuilder {
    pub fn new() -> Self {
        Self::from_config(&SlotConfig::default())
    }

    /// Start from a loaded [`SlotConfig`].
    pub fn from_config(config: &SlotConfig) -> Self {
        Self {
            relay_url: config.relay_url.clone(),
            slot_id: config.slot_id.clone(),
            protocol_version: config.protocol_version.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_tick: config.heartbeat_tick(),
            register_timeout: config.register_timeout(),
            pull_timeout: config.pull_timeout(),
            reconnect_backoff: ReconnectBackoff::from(&config.backoff),
            handler: Arc::new(LoggingHandler),
        }
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Set the registration endpoint (e.g. `wss://relay.example.com/ws`).
    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Set the slot identity sent with `SLOT_REGISTER` and every message.
    pub fn slot_id(mut self, id: impl Into<String>) -> Self {
        self.slot_id = id.into();
        self
    }

    /// Version string reported in `SLOT_REGISTER`.
    pub fn protocol_version(mut self, v: impl Into<String>) -> Self {
        self.protocol_version = v.into();
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Override the heartbeat interval (default 10s).
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    /// How often the heartbeat scheduler wakes up (default 1s).
    pub fn heartbeat_tick(mut self, d: Duration) -> Self {
        self.heartbeat_tick = d;
        self
    }

    /// Default timeout of [`SlotClient::register_agent_default`] (default 10s).
    pub fn register_timeout(mut self, d: Duration) -> Self {
        self.register_timeout = d;
        self
    }

    /// Default timeout of [`SlotClient::pull_commands_default`] (default 5s).
    pub fn pull_timeout(mut self, d: Duration) -> Self {
        self.pull_timeout = d;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn reconnect_backoff(mut self, cfg: ReconnectBackoff) -> Self {
        self.reconnect_backoff = cfg;
        self
    }

    /// Handler for unsolicited `COMMAND` messages (default: log and ignore).
    pub fn handler(mut self, handler: impl CommandHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Build the [`SlotClient`].
    pub fn build(self) -> Result<SlotClient, SlotSdkError> {
        endpoint::validate(&self.relay_url)?;
        if self.slot_id.trim().is_empty() {
            return Err(SlotSdkError::Config("slot_id is required".into()));
        }
        if self.heartbeat_tick.is_zero() {
            return Err(SlotSdkError::Config("heartbeat_tick must be non-zero".into()));
        }

        let settings = Settings {
            slot_id: self.slot_id,
            relay_url: self.relay_url,
            protocol_version: self.protocol_version,
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_tick: self.heartbeat_tick,
            register_timeout: self.register_timeout,
            pull_timeout: self.pull_timeout,
        };
        Ok(SlotClient::new(
            Connection::new(settings, self.handler),
            self.reconnect_backoff,
        ))
    }
}

impl Default for SlotClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_websocket_url() {
        let err = SlotClientBuilder::new()
            .relay_url("http://relay:8081/ws")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, SlotSdkError::Config(_)));
    }

    #[test]
    fn rejects_url_with_invalid_port() {
        for url in ["ws://relay:abc/ws", "ws://relay:99999/ws"] {
            let err = SlotClientBuilder::new().relay_url(url).build().err().unwrap();
            assert!(matches!(err, SlotSdkError::Config(_)), "{url}");
        }
    }

    #[test]
    fn rejects_empty_slot_id() {
        let err = SlotClientBuilder::new().slot_id("  ").build().err().unwrap();
        assert!(matches!(err, SlotSdkError::Config(m) if m.contains("slot_id")));
    }

    #[test]
    fn rejects_zero_tick() {
        let result = SlotClientBuilder::new()
            .heartbeat_tick(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn from_config_carries_settings() {
        let config: SlotConfig = toml::from_str(
            r#"
            relay_url = "wss://relay.example.com/ws"
            slot_id = "bridge-7"
            pull_timeout_secs = 2
            "#,
        )
        .unwrap();
        let client = SlotClientBuilder::from_config(&config).build().unwrap();
        assert_eq!(client.slot_id(), "bridge-7");
        assert_eq!(client.conn.settings.pull_timeout, Duration::from_secs(2));
        assert_eq!(client.conn.settings.relay_url, "wss://relay.example.com/ws");
        assert_eq!(client.backoff.max_delay, Duration::from_secs(300));
    }
}
