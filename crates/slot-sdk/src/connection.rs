//! One relay session: open the socket, run the handshake step for the
//! current phase, dispatch inbound messages until the socket closes.
//!
//! Outbound frames go through a single writer task fed by an unbounded
//! channel. Whoever holds the sender may send; the writer serialises them.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use slot_protocol::{
    AckPayload, CommandResult, Message, MessageType, ResultPayload, SlotHeartbeatPayload,
    SlotRegisterPayload, StatusUpdatePayload,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_util::sync::CancellationToken;

use crate::handler::CommandHandler;
use crate::pending::PendingRequests;
use crate::state::{OpenAction, SessionEnd, SlotState};
use crate::types::{AgentRegistration, CommandPayload, SlotSdkError};

/// How long a closing session waits for queued frames to flush.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Answer delivered through the correlation registry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Response {
    Agent(AgentRegistration),
    Commands(Option<CommandPayload>),
}

/// What the read loop does after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Close the socket on purpose (port switch).
    Close,
}

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub slot_id: String,
    pub relay_url: String,
    pub protocol_version: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_tick: Duration,
    pub register_timeout: Duration,
    pub pull_timeout: Duration,
}

/// State shared by the supervisor, the heartbeat ticker, the dispatch loop
/// and callers.
pub(crate) struct Connection {
    pub settings: Settings,
    pub state: Mutex<SlotState>,
    pub pending: PendingRequests<Response>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    handler: Arc<dyn CommandHandler>,
    pub shutdown: CancellationToken,
    pub ready: watch::Sender<bool>,
    started_at: Instant,
}

impl Connection {
    pub fn new(settings: Settings, handler: Arc<dyn CommandHandler>) -> Self {
        let state = SlotState::new(settings.relay_url.clone());
        let (ready, _) = watch::channel(false);
        Self {
            settings,
            state: Mutex::new(state),
            pending: PendingRequests::new(),
            outbound: Mutex::new(None),
            handler,
            shutdown: CancellationToken::new(),
            ready,
            started_at: Instant::now(),
        }
    }

    // ── Session ──────────────────────────────────────────────────────

    /// Run one connection to `url` until it closes, then apply the close
    /// transition. A failed connect counts as a close.
    pub async fn connect_and_run(self: &Arc<Self>, url: &str) -> SessionEnd {
        let writer = match self.session(url).await {
            Ok(writer) => writer,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "relay connection failed");
                None
            }
        };
        self.finish_session(writer).await
    }

    /// Apply the close transition, then give the writer [`WRITER_DRAIN`] to
    /// flush. The state reads disconnected while the writer drains.
    async fn finish_session(&self, writer: Option<JoinHandle<()>>) -> SessionEnd {
        // Dropping the sender ends the writer once queued frames are out.
        drop(self.outbound.lock().take());
        self.ready.send_replace(false);
        let end = self.state.lock().on_close(Instant::now());

        if let Some(mut writer) = writer {
            if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        end
    }

    /// Returns the writer task once the read loop is over, or `None` when
    /// shutdown interrupted the connect.
    async fn session(
        self: &Arc<Self>,
        url: &str,
    ) -> Result<Option<JoinHandle<()>>, SlotSdkError> {
        tracing::info!(url = %url, slot_id = %self.settings.slot_id, "connecting to relay");

        let connect = tokio_tungstenite::connect_async_with_config(url, Some(ws_config()), false);
        let (ws, _response) = tokio::select! {
            r = connect => r.map_err(|e| SlotSdkError::WebSocket(e.to_string()))?,
            _ = self.shutdown.cancelled() => return Ok(None),
        };
        let (mut sink, mut stream) = ws.split();

        // Writer task: the only place frames reach the socket.
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let closing = matches!(frame, Frame::Close(_));
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        *self.outbound.lock() = Some(tx);

        let action = self.state.lock().on_open(Instant::now());
        match action {
            OpenAction::Register => {
                tracing::info!(url = %url, "connected, registering slot");
                self.send_slot_register();
            }
            OpenAction::Heartbeat => {
                tracing::info!(url = %url, "connected to dedicated endpoint");
                self.send_heartbeat();
                self.ready.send_replace(true);
            }
        }

        loop {
            let frame = tokio::select! {
                f = stream.next() => f,
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown requested, closing connection");
                    self.close_socket();
                    break;
                }
            };
            let text = match frame {
                Some(Ok(Frame::Text(text))) => text,
                Some(Ok(Frame::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        tracing::warn!("dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Frame::Close(reason))) => {
                    tracing::info!(reason = ?reason, "relay closed connection");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "websocket error");
                    break;
                }
                None => break,
            };
            if self.dispatch(&text) == Flow::Close {
                self.close_socket();
                break;
            }
        }

        Ok(Some(writer))
    }

    fn close_socket(&self) {
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(Frame::Close(None));
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Route one inbound text frame.
    pub fn dispatch(self: &Arc<Self>, text: &str) -> Flow {
        let message = match slot_protocol::decode(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed message");
                return Flow::Continue;
            }
        };
        tracing::debug!(
            message_id = %message.id,
            msg_type = %message.msg_type,
            "received message"
        );

        match message.msg_type {
            MessageType::Ack => self.handle_ack(&message),
            MessageType::Command => {
                self.handle_command(message);
                Flow::Continue
            }
            _ => {
                tracing::warn!(
                    message_id = %message.id,
                    msg_type = %message.msg_type,
                    "ignoring unexpected message type"
                );
                Flow::Continue
            }
        }
    }

    fn handle_ack(&self, message: &Message) -> Flow {
        let ack: AckPayload = match message.payload_as() {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "dropping ACK");
                return Flow::Continue;
            }
        };

        // Agent registration answer.
        if let Some(original) = ack.original_message_id.as_deref() {
            if !original.is_empty() && self.pending.contains(original) {
                let answer = match ack.agent_id {
                    Some(id) if ack.success && id != 0 => AgentRegistration::Registered(id),
                    _ => AgentRegistration::Rejected {
                        error: ack.error.unwrap_or_else(|| "Unknown error".into()),
                    },
                };
                tracing::info!(
                    original_message_id = %original,
                    answer = ?answer,
                    "agent registration answered"
                );
                self.pending.resolve(original, Response::Agent(answer));
                return Flow::Continue;
            }
        }

        if !ack.success {
            tracing::warn!(
                message_id = %message.id,
                original_message_id = ?ack.original_message_id,
                error = ?ack.error,
                "relay reported failure"
            );
            return Flow::Continue;
        }

        if let Some(port) = ack.assigned_port.filter(|p| *p > 0) {
            let Ok(port) = u16::try_from(port) else {
                tracing::warn!(port, "assigned port out of range, ignoring");
                return Flow::Continue;
            };
            return match self.state.lock().assign_port(port) {
                Ok(Some(url)) => {
                    tracing::info!(
                        port,
                        url = %url,
                        "port assigned, switching to dedicated endpoint"
                    );
                    Flow::Close
                }
                Ok(None) => {
                    tracing::debug!(port, "already registered, ignoring port assignment");
                    Flow::Continue
                }
                Err(e) => {
                    tracing::warn!(port, error = %e, "cannot build dedicated endpoint");
                    Flow::Continue
                }
            };
        }
        Flow::Continue
    }

    fn handle_command(self: &Arc<Self>, message: Message) {
        if self.pending.contains(&message.id) {
            let answer = if message.payload_flag("no_command") {
                None
            } else {
                Some(message.payload.clone())
            };
            self.pending.resolve(&message.id, Response::Commands(answer));
            return;
        }

        let command_id = message
            .payload
            .get("command_id")
            .and_then(id_string)
            .unwrap_or_else(|| message.id.clone());
        tracing::warn!(
            message_id = %message.id,
            command_id = %command_id,
            "unsolicited command, forwarding to handler"
        );

        let conn = Arc::clone(self);
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.handle(message)).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => "command handler panicked".to_string(),
            };
            tracing::error!(command_id = %command_id, error = %error, "command handler failed");
            conn.send_result(&command_id, CommandResult::failure(error));
        });
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Queue `message` on the open socket. Returns `false` (and logs) when
    /// there is no connection to send on.
    pub fn send(&self, message: &Message) -> bool {
        let text = match slot_protocol::encode(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    msg_type = %message.msg_type,
                    error = %e,
                    "failed to encode message"
                );
                return false;
            }
        };
        if !self.state.lock().is_connected() {
            tracing::warn!(msg_type = %message.msg_type, "not connected, dropping message");
            return false;
        }
        let sent = match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(Frame::Text(text)).is_ok(),
            None => false,
        };
        if !sent {
            tracing::warn!(msg_type = %message.msg_type, "connection closing, dropping message");
        }
        sent
    }

    /// Build a message from `payload` and send it.
    pub fn send_payload<P: serde::Serialize>(&self, msg_type: MessageType, payload: &P) -> bool {
        match Message::new(msg_type, self.settings.slot_id.as_str(), payload) {
            Ok(message) => self.send(&message),
            Err(e) => {
                tracing::error!(error = %e, "failed to build message");
                false
            }
        }
    }

    fn send_slot_register(&self) -> bool {
        let payload = SlotRegisterPayload {
            agent_id: self.settings.slot_id.clone(),
            relay_id: String::new(),
            hostname: crate::hostname(),
            os: std::env::consts::OS.into(),
            arch: std::env::consts::ARCH.into(),
            version: self.settings.protocol_version.clone(),
        };
        self.send_payload(MessageType::SlotRegister, &payload)
    }

    pub fn send_heartbeat(&self) -> bool {
        let payload = SlotHeartbeatPayload {
            agent_id: self.settings.slot_id.clone(),
            hostname: crate::hostname(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            cpu_percent: 0.0,
            memory_mb: 0,
            disk_free_gb: 0,
        };
        let sent = self.send_payload(MessageType::SlotHeartbeat, &payload);
        if sent {
            tracing::trace!(slot_id = %self.settings.slot_id, "heartbeat sent");
        }
        sent
    }

    pub fn send_result(&self, command_id: &str, result: CommandResult) -> bool {
        let exit_code = result.exit_code;
        let payload = ResultPayload {
            command_id: command_id.to_string(),
            result,
        };
        let sent = self.send_payload(MessageType::Result, &payload);
        tracing::info!(command_id = %command_id, exit_code, sent, "result sent");
        sent
    }

    pub fn send_status_update(&self, command_id: &str, status: &str) -> bool {
        let payload = StatusUpdatePayload {
            command_id: command_id.to_string(),
            agent_id: self.settings.slot_id.clone(),
            status: status.to_string(),
        };
        let sent = self.send_payload(MessageType::CommandStatusUpdate, &payload);
        tracing::debug!(command_id = %command_id, status = %status, sent, "status update sent");
        sent
    }
}

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = None;
    config.max_frame_size = None;
    config
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
