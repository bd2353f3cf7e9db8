use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client configuration, usually loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Registration endpoint, e.g. `ws://relay:8081/ws`.
    #[serde(default = "d_relay_url")]
    pub relay_url: String,
    /// Identity of this slot.
    #[serde(default = "d_slot_id")]
    pub slot_id: String,
    #[serde(default = "d_10")]
    pub heartbeat_interval_secs: u64,
    /// How often the heartbeat scheduler checks whether one is due.
    #[serde(default = "d_1000")]
    pub heartbeat_tick_ms: u64,
    #[serde(default = "d_10")]
    pub register_timeout_secs: u64,
    #[serde(default = "d_5")]
    pub pull_timeout_secs: u64,
    #[serde(default = "d_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            relay_url: d_relay_url(),
            slot_id: d_slot_id(),
            heartbeat_interval_secs: 10,
            heartbeat_tick_ms: 1000,
            register_timeout_secs: 10,
            pull_timeout_secs: 5,
            protocol_version: d_version(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SlotConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_tick(&self) -> Duration {
        Duration::from_millis(self.heartbeat_tick_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconnect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First delay after the dedicated connection drops.
    #[serde(default = "d_1000")]
    pub initial_ms: u64,
    /// Cap on the dedicated-connection delay.
    #[serde(default = "d_300000")]
    pub max_ms: u64,
    #[serde(default = "d_factor")]
    pub factor: f64,
    /// Constant delay while the registration handshake has not completed.
    #[serde(default = "d_1000")]
    pub registration_retry_ms: u64,
    /// A dedicated connection that stays up this long resets the backoff.
    #[serde(default = "d_60")]
    pub reset_after_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1000,
            max_ms: 300_000,
            factor: 2.0,
            registration_retry_ms: 1000,
            reset_after_secs: 60,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_relay_url() -> String {
    "ws://localhost:8081/ws".into()
}
fn d_slot_id() -> String {
    format!("slot-{}", crate::hostname())
}
fn d_version() -> String {
    slot_protocol::PROTOCOL_VERSION.into()
}
fn d_factor() -> f64 {
    2.0
}
fn d_5() -> u64 {
    5
}
fn d_10() -> u64 {
    10
}
fn d_60() -> u64 {
    60
}
fn d_1000() -> u64 {
    1000
}
fn d_300000() -> u64 {
    300_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config: SlotConfig = toml::from_str("").unwrap();
        assert_eq!(config.relay_url, "ws://localhost:8081/ws");
        assert!(config.slot_id.starts_with("slot-"));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_tick(), Duration::from_secs(1));
        assert_eq!(config.register_timeout(), Duration::from_secs(10));
        assert_eq!(config.pull_timeout(), Duration::from_secs(5));
        assert_eq!(config.backoff.max_ms, 300_000);
        assert_eq!(config.protocol_version, "1.0.0");
    }

    #[test]
    fn partial_toml_overrides() {
        let config: SlotConfig = toml::from_str(
            r#"
            relay_url = "ws://10.0.0.5:8081/ws"
            slot_id = "bridge-1"
            heartbeat_interval_secs = 60

            [backoff]
            max_ms = 30000
            "#,
        )
        .unwrap();
        assert_eq!(config.relay_url, "ws://10.0.0.5:8081/ws");
        assert_eq!(config.slot_id, "bridge-1");
        assert_eq!(config.heartbeat_interval_secs, 60);
        assert_eq!(config.backoff.max_ms, 30_000);
        assert_eq!(config.backoff.initial_ms, 1000);
        assert_eq!(config.backoff.factor, 2.0);
    }
}
