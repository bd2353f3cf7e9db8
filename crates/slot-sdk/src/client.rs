//! Slot client: reconnection supervisor plus the caller-facing request API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slot_protocol::{
    AgentRegisterPayload, CommandResult, GetCommandsPayload, Message, MessageType,
};

use crate::connection::{Connection, Response};
use crate::heartbeat;
use crate::reconnect::{ReconnectBackoff, RetryTracker};
use crate::state::ConnectionState;
use crate::types::{AgentIdentity, AgentRegistration, CommandPayload, SlotSdkError};

/// A configured slot client.
///
/// Create via [`SlotClientBuilder`](crate::builder::SlotClientBuilder). Cloning
/// is cheap; every clone drives the same connection, so one task can
/// [`run`](Self::run) the client while others issue requests.
#[derive(Clone)]
pub struct SlotClient {
    pub(crate) conn: Arc<Connection>,
    pub(crate) backoff: ReconnectBackoff,
    running: Arc<AtomicBool>,
}

impl SlotClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::SlotClientBuilder {
        crate::builder::SlotClientBuilder::new()
    }

    pub(crate) fn new(conn: Connection, backoff: ReconnectBackoff) -> Self {
        Self {
            conn: Arc::new(conn),
            backoff,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Supervisor ───────────────────────────────────────────────────

    /// Connect, register and stay connected until [`stop`](Self::stop).
    ///
    /// Reconnects after every close: immediately after a port switch, with
    /// exponential back-off after losing the dedicated connection, and with a
    /// short constant delay while registration keeps failing.
    ///
    /// Always returns `Err(SlotSdkError::Shutdown)` once stopped. A client
    /// runs at most once.
    pub async fn run(&self) -> Result<(), SlotSdkError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SlotSdkError::Config("client is already running".into()));
        }

        let conn = &self.conn;
        let slot_id = conn.settings.slot_id.as_str();
        let heartbeat_task = tokio::spawn(heartbeat::run(Arc::clone(conn)));
        let mut retry = RetryTracker::new(self.backoff.clone());

        tracing::info!(
            slot_id = %slot_id,
            relay_url = %conn.settings.relay_url,
            "slot client starting"
        );

        loop {
            if conn.shutdown.is_cancelled() {
                break;
            }

            let url = conn.state.lock().begin_connect();
            let end = conn.connect_and_run(&url).await;

            if conn.shutdown.is_cancelled() {
                break;
            }

            let delay = retry.next_delay(&end);
            tracing::info!(
                slot_id = %slot_id,
                reason = ?end.kind,
                delay_ms = delay.as_millis() as u64,
                "connection closed"
            );
            if delay.is_zero() {
                continue;
            }

            conn.state.lock().set_phase(ConnectionState::Reconnecting);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = conn.shutdown.cancelled() => break,
            }
        }

        let _ = heartbeat_task.await;
        conn.state.lock().set_phase(ConnectionState::Disconnected);
        tracing::info!(slot_id = %slot_id, "slot client stopped");
        Err(SlotSdkError::Shutdown)
    }

    /// Same as [`run`](Self::run), on a spawned task.
    pub fn spawn(&self) -> tokio::task::JoinHandle<Result<(), SlotSdkError>> {
        let client = self.clone();
        tokio::spawn(async move { client.run().await })
    }

    /// Stop reconnecting and close the open socket. In-flight requests end
    /// at their own timeout.
    pub fn stop(&self) {
        self.conn.shutdown.cancel();
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Register an agent behind this slot and wait for the relay's answer.
    ///
    /// `Ok(None)` means no answer arrived within `timeout`.
    pub async fn register_agent(
        &self,
        identity: &AgentIdentity,
        timeout: Duration,
    ) -> Result<Option<AgentRegistration>, SlotSdkError> {
        let payload = AgentRegisterPayload {
            slot_id: self.conn.settings.slot_id.clone(),
            version: identity.version.clone(),
            description: identity.description.clone(),
            hostname: identity.hostname.clone(),
            os: identity.os.clone(),
            arch: identity.arch.clone(),
            domain: identity.domain.clone(),
        };
        let message = Message::new(
            MessageType::AgentRegister,
            self.conn.settings.slot_id.as_str(),
            &payload,
        )?;

        match self.request(&message, timeout).await? {
            Some(Response::Agent(answer)) => Ok(Some(answer)),
            Some(other) => {
                tracing::warn!(
                    message_id = %message.id,
                    response = ?other,
                    "unexpected answer to AGENT_REGISTER"
                );
                Ok(None)
            }
            None => {
                tracing::warn!(message_id = %message.id, "agent registration timed out");
                Ok(None)
            }
        }
    }

    /// [`register_agent`](Self::register_agent) with the configured timeout.
    pub async fn register_agent_default(
        &self,
        identity: &AgentIdentity,
    ) -> Result<Option<AgentRegistration>, SlotSdkError> {
        self.register_agent(identity, self.conn.settings.register_timeout)
            .await
    }

    /// Ask the relay for pending commands for `agent_id`.
    ///
    /// `Ok(None)` when the relay has nothing pending or did not answer within
    /// `timeout`.
    pub async fn pull_commands(
        &self,
        agent_id: i64,
        count: u32,
        timeout: Duration,
    ) -> Result<Option<CommandPayload>, SlotSdkError> {
        let payload = GetCommandsPayload { agent_id, count };
        let message = Message::new(MessageType::GetCommands, agent_id.to_string(), &payload)?;
        tracing::debug!(message_id = %message.id, agent_id, count, "requesting commands");

        match self.request(&message, timeout).await? {
            Some(Response::Commands(commands)) => Ok(commands),
            Some(other) => {
                tracing::warn!(
                    message_id = %message.id,
                    response = ?other,
                    "unexpected answer to GET_COMMANDS"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// [`pull_commands`](Self::pull_commands) with the configured timeout.
    pub async fn pull_commands_default(
        &self,
        agent_id: i64,
        count: u32,
    ) -> Result<Option<CommandPayload>, SlotSdkError> {
        self.pull_commands(agent_id, count, self.conn.settings.pull_timeout)
            .await
    }

    /// Report a command result. Dropped if not connected.
    pub fn send_result(&self, command_id: &str, result: CommandResult) -> bool {
        self.conn.send_result(command_id, result)
    }

    /// Report command progress. Dropped if not connected.
    pub fn send_status_update(&self, command_id: &str, status: &str) -> bool {
        self.conn.send_status_update(command_id, status)
    }

    async fn request(
        &self,
        message: &Message,
        timeout: Duration,
    ) -> Result<Option<Response>, SlotSdkError> {
        let waiter = self.conn.pending.register(&message.id)?;
        if !self.conn.send(message) {
            // Never left the process; nothing can answer it.
            self.conn.pending.cancel(waiter);
            return Ok(None);
        }
        Ok(self.conn.pending.wait(waiter, timeout).await)
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Wait until the dedicated connection is up. `false` on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.conn.ready.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state.lock().phase()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.state.lock().is_connected()
    }

    pub fn is_registered(&self) -> bool {
        self.conn.state.lock().is_registered()
    }

    /// Registered and connected on the dedicated endpoint.
    pub fn is_ready(&self) -> bool {
        self.conn.state.lock().is_ready()
    }

    /// Dedicated endpoint assigned by the relay, while registered.
    pub fn assigned_endpoint(&self) -> Option<String> {
        self.conn.state.lock().assigned_endpoint().map(str::to_string)
    }

    /// Number of requests still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.conn.pending.len()
    }

    pub fn slot_id(&self) -> &str {
        &self.conn.settings.slot_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SlotClientBuilder;

    fn client() -> SlotClient {
        SlotClientBuilder::new()
            .relay_url("ws://127.0.0.1:1/ws")
            .slot_id("s1")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn requests_without_connection_return_none() {
        let client = client();
        let got = client
            .pull_commands(5, 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(got, None);
        assert_eq!(client.pending_count(), 0);

        let got = client
            .register_agent(&AgentIdentity::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(got, None);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn wait_ready_times_out_when_never_connected() {
        let client = client();
        assert!(!client.wait_ready(Duration::from_millis(20)).await);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(!client.is_registered());
        assert_eq!(client.assigned_endpoint(), None);
    }

    #[tokio::test]
    async fn stop_before_run_returns_shutdown() {
        let client = client();
        client.stop();
        let err = client.run().await.unwrap_err();
        assert!(matches!(err, SlotSdkError::Shutdown));
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let client = client();
        let handle = client.spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = client.run().await.unwrap_err();
        assert!(matches!(err, SlotSdkError::Config(_)));

        client.stop();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SlotSdkError::Shutdown));
    }
}
