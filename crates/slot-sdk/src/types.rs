//! Public result and error types.

use slot_protocol::{Payload, ProtocolError};

/// Payload of a pulled `COMMAND`.
pub type CommandPayload = Payload;

/// Answer to an `AGENT_REGISTER` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRegistration {
    /// The relay assigned this agent id.
    Registered(i64),
    /// The relay refused the registration.
    Rejected { error: String },
}

impl AgentRegistration {
    /// The assigned id, if registration succeeded.
    pub fn agent_id(&self) -> Option<i64> {
        match self {
            Self::Registered(id) => Some(*id),
            Self::Rejected { .. } => None,
        }
    }
}

/// Identity fields sent with `AGENT_REGISTER`.
///
/// Only the fields that are set go on the wire; `version` is always sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub description: Option<String>,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub domain: Option<String>,
    pub version: String,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            description: None,
            hostname: None,
            os: None,
            arch: None,
            domain: None,
            version: slot_protocol::PROTOCOL_VERSION.into(),
        }
    }
}

impl AgentIdentity {
    /// Identity of the local machine (hostname, OS, architecture).
    pub fn local(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            hostname: Some(crate::hostname()),
            os: Some(std::env::consts::OS.into()),
            arch: Some(std::env::consts::ARCH.into()),
            ..Default::default()
        }
    }
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum SlotSdkError {
    #[error("config: {0}")]
    Config(String),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("request id already pending: {0}")]
    DuplicateRequest(String),
    #[error("shutdown")]
    Shutdown,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
