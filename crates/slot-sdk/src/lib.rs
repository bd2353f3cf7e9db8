//! `slot-sdk` — client side of the relay slot protocol.
//!
//! A "slot" is one long-lived connection identity registered with a relay.
//! The SDK keeps that connection alive, performs the registration handshake
//! and turns the relay's asynchronous message stream into plain async calls.
//!
//! # Connection flow
//!
//! 1. Connect to the registration endpoint and send `SLOT_REGISTER`
//! 2. Relay answers `ACK { assigned_port }`; the SDK closes the socket on
//!    purpose and reconnects to the same URL with that port
//! 3. On the dedicated connection:
//!    - send `SLOT_HEARTBEAT` immediately, then every heartbeat interval
//!    - callers issue `AGENT_REGISTER` / `GET_COMMANDS` requests and wait for
//!      the correlated `ACK` / `COMMAND`
//! 4. Dedicated connection lost: back off exponentially, then start over at
//!    step 1
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), slot_sdk::SlotSdkError> {
//! use std::time::Duration;
//! use slot_sdk::{AgentIdentity, SlotClientBuilder};
//!
//! let client = SlotClientBuilder::new()
//!     .relay_url("ws://relay.local:8081/ws")
//!     .slot_id("bridge-1")
//!     .build()?;
//! let runner = client.spawn();
//!
//! if client.wait_ready(Duration::from_secs(30)).await {
//!     let identity = AgentIdentity::local("build box");
//!     if let Some(reg) = client.register_agent_default(&identity).await? {
//!         if let Some(agent_id) = reg.agent_id() {
//!             let command = client.pull_commands(agent_id, 1, Duration::from_secs(5)).await?;
//!             println!("{command:?}");
//!         }
//!     }
//! }
//!
//! client.stop();
//! let _ = runner.await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod handler;
pub mod pending;
pub mod reconnect;
pub mod state;
pub mod types;

mod connection;
mod heartbeat;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::SlotClientBuilder;
pub use client::SlotClient;
pub use config::{BackoffConfig, SlotConfig};
pub use handler::{handler_fn, CommandHandler, LoggingHandler};
pub use pending::{PendingRequests, Waiter};
pub use reconnect::ReconnectBackoff;
pub use state::ConnectionState;
pub use types::{AgentIdentity, AgentRegistration, CommandPayload, SlotSdkError};

pub use slot_protocol::{CommandResult, Message, MessageType, PROTOCOL_VERSION};

/// Local hostname, lossily converted to UTF-8.
pub fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
