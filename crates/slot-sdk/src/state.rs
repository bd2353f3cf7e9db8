//! Connection state machine.
//!
//! `SlotState` holds the flags shared by the dispatch loop, the heartbeat
//! ticker and the supervisor. Every transition goes through one of the
//! methods below, called with the state lock held; nothing else mutates
//! the fields.

use std::fmt;
use std::time::{Duration, Instant};

use crate::endpoint;
use crate::types::SlotSdkError;

/// Externally visible phase of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Open on the registration endpoint, `SLOT_REGISTER` sent.
    Registering,
    /// Port assigned; the registration socket is being closed on purpose.
    Switching,
    ConnectedDedicated,
    /// Waiting out a retry delay.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Registering => "registering",
            Self::Switching => "switching",
            Self::ConnectedDedicated => "connected_dedicated",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// What to send right after a socket opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenAction {
    Register,
    Heartbeat,
}

/// Why a session ended, from the supervisor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseKind {
    /// Intentional close after a port assignment.
    PortSwitch,
    /// The dedicated connection dropped, or could not be opened.
    DedicatedLost,
    /// Closed or failed before a port was assigned.
    RegistrationIncomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionEnd {
    pub kind: CloseKind,
    /// How long the dedicated connection was up, if it was.
    pub dedicated_for: Option<Duration>,
}

#[derive(Debug)]
pub(crate) struct SlotState {
    registration_endpoint: String,
    assigned_endpoint: Option<String>,
    connected: bool,
    registered: bool,
    switching: bool,
    phase: ConnectionState,
    last_heartbeat: Option<Instant>,
    dedicated_since: Option<Instant>,
}

impl SlotState {
    pub fn new(registration_endpoint: impl Into<String>) -> Self {
        Self {
            registration_endpoint: registration_endpoint.into(),
            assigned_endpoint: None,
            connected: false,
            registered: false,
            switching: false,
            phase: ConnectionState::Disconnected,
            last_heartbeat: None,
            dedicated_since: None,
        }
    }

    pub fn phase(&self) -> ConnectionState {
        self.phase
    }

    pub fn set_phase(&mut self, phase: ConnectionState) {
        self.phase = phase;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// On the dedicated connection and able to carry requests.
    pub fn is_ready(&self) -> bool {
        self.registered && self.connected
    }

    pub fn assigned_endpoint(&self) -> Option<&str> {
        self.assigned_endpoint.as_deref()
    }

    /// Pick the endpoint for the next connection attempt.
    pub fn begin_connect(&mut self) -> String {
        self.phase = ConnectionState::Connecting;
        match (&self.assigned_endpoint, self.registered) {
            (Some(url), true) => url.clone(),
            _ => self.registration_endpoint.clone(),
        }
    }

    pub fn on_open(&mut self, now: Instant) -> OpenAction {
        self.connected = true;
        if self.registered {
            self.phase = ConnectionState::ConnectedDedicated;
            self.dedicated_since = Some(now);
            self.last_heartbeat = Some(now);
            OpenAction::Heartbeat
        } else {
            self.phase = ConnectionState::Registering;
            OpenAction::Register
        }
    }

    /// Apply a port assignment from the relay.
    ///
    /// Returns the new dedicated endpoint, or `None` when already registered
    /// (a repeated assignment never triggers a second switch).
    pub fn assign_port(&mut self, port: u16) -> Result<Option<String>, SlotSdkError> {
        if self.registered || self.switching {
            return Ok(None);
        }
        let url = endpoint::with_port(&self.registration_endpoint, port)?;
        self.assigned_endpoint = Some(url.clone());
        self.registered = true;
        self.switching = true;
        self.connected = false;
        self.phase = ConnectionState::Switching;
        Ok(Some(url))
    }

    /// Claim the next heartbeat slot if one is due.
    ///
    /// Only ever true while registered and connected on the dedicated
    /// endpoint; a `true` return records `now` as the last heartbeat.
    pub fn claim_heartbeat(&mut self, interval: Duration, now: Instant) -> bool {
        if !self.registered || !self.connected || self.switching {
            return false;
        }
        let due = match self.last_heartbeat {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        };
        if due {
            self.last_heartbeat = Some(now);
        }
        due
    }

    /// The socket closed, or never opened.
    pub fn on_close(&mut self, now: Instant) -> SessionEnd {
        self.connected = false;
        self.last_heartbeat = None;
        let dedicated_for = self
            .dedicated_since
            .take()
            .map(|since| now.saturating_duration_since(since));

        let kind = if self.switching {
            self.switching = false;
            CloseKind::PortSwitch
        } else if self.registered {
            self.registered = false;
            self.assigned_endpoint = None;
            self.phase = ConnectionState::Disconnected;
            CloseKind::DedicatedLost
        } else {
            self.phase = ConnectionState::Disconnected;
            CloseKind::RegistrationIncomplete
        };

        SessionEnd {
            kind,
            dedicated_for,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REG: &str = "ws://relay:8081/ws";

    fn switched(state: &mut SlotState, now: Instant) {
        state.begin_connect();
        assert_eq!(state.on_open(now), OpenAction::Register);
        state.assign_port(9001).unwrap();
        assert_eq!(state.on_close(now).kind, CloseKind::PortSwitch);
    }

    #[test]
    fn first_connect_targets_registration_endpoint() {
        let mut state = SlotState::new(REG);
        assert_eq!(state.begin_connect(), REG);
        assert_eq!(state.phase(), ConnectionState::Connecting);
        assert_eq!(state.on_open(Instant::now()), OpenAction::Register);
        assert_eq!(state.phase(), ConnectionState::Registering);
        assert!(!state.is_ready());
    }

    #[test]
    fn port_switch_then_dedicated() {
        let now = Instant::now();
        let mut state = SlotState::new(REG);
        state.begin_connect();
        state.on_open(now);

        let url = state.assign_port(9001).unwrap();
        assert_eq!(url.as_deref(), Some("ws://relay:9001/ws"));
        assert_eq!(state.phase(), ConnectionState::Switching);
        assert!(state.is_registered());
        assert!(!state.is_connected());

        let end = state.on_close(now);
        assert_eq!(end.kind, CloseKind::PortSwitch);
        assert!(state.is_registered(), "switch keeps registration");

        assert_eq!(state.begin_connect(), "ws://relay:9001/ws");
        assert_eq!(state.on_open(now), OpenAction::Heartbeat);
        assert_eq!(state.phase(), ConnectionState::ConnectedDedicated);
        assert!(state.is_ready());
    }

    #[test]
    fn second_assignment_is_ignored() {
        let now = Instant::now();
        let mut state = SlotState::new(REG);
        switched(&mut state, now);
        state.begin_connect();
        state.on_open(now);

        assert_eq!(state.assign_port(9555).unwrap(), None);
        assert_eq!(state.assigned_endpoint(), Some("ws://relay:9001/ws"));
        assert!(state.is_connected());
        assert_eq!(state.phase(), ConnectionState::ConnectedDedicated);
    }

    #[test]
    fn assignment_during_switch_is_ignored() {
        let mut state = SlotState::new(REG);
        state.begin_connect();
        state.on_open(Instant::now());
        state.assign_port(9001).unwrap();
        assert_eq!(state.assign_port(9002).unwrap(), None);
        assert_eq!(state.assigned_endpoint(), Some("ws://relay:9001/ws"));
    }

    #[test]
    fn dedicated_loss_restarts_handshake() {
        let now = Instant::now();
        let mut state = SlotState::new(REG);
        switched(&mut state, now);
        state.begin_connect();
        state.on_open(now);

        let end = state.on_close(now + Duration::from_secs(3));
        assert_eq!(end.kind, CloseKind::DedicatedLost);
        assert_eq!(end.dedicated_for, Some(Duration::from_secs(3)));
        assert!(!state.is_registered());
        assert_eq!(state.assigned_endpoint(), None);
        assert_eq!(state.begin_connect(), REG);
    }

    #[test]
    fn failed_dedicated_connect_counts_as_loss() {
        let now = Instant::now();
        let mut state = SlotState::new(REG);
        switched(&mut state, now);
        state.begin_connect();

        let end = state.on_close(now);
        assert_eq!(end.kind, CloseKind::DedicatedLost);
        assert_eq!(end.dedicated_for, None);
        assert_eq!(state.begin_connect(), REG);
    }

    #[test]
    fn close_before_assignment_is_registration_failure() {
        let mut state = SlotState::new(REG);
        state.begin_connect();
        state.on_open(Instant::now());
        let end = state.on_close(Instant::now());
        assert_eq!(end.kind, CloseKind::RegistrationIncomplete);
        assert_eq!(state.phase(), ConnectionState::Disconnected);
    }

    #[test]
    fn no_heartbeat_while_unregistered() {
        let now = Instant::now();
        let mut state = SlotState::new(REG);
        state.begin_connect();
        state.on_open(now);
        for secs in 0..30 {
            assert!(!state.claim_heartbeat(Duration::ZERO, now + Duration::from_secs(secs)));
        }
    }

    #[test]
    fn heartbeat_respects_interval() {
        let now = Instant::now();
        let interval = Duration::from_secs(10);
        let mut state = SlotState::new(REG);
        switched(&mut state, now);
        state.begin_connect();
        state.on_open(now);

        // on_open counts as the first heartbeat
        assert!(!state.claim_heartbeat(interval, now + Duration::from_secs(9)));
        assert!(state.claim_heartbeat(interval, now + Duration::from_secs(10)));
        assert!(!state.claim_heartbeat(interval, now + Duration::from_secs(11)));
        assert!(state.claim_heartbeat(interval, now + Duration::from_secs(20)));

        state.on_close(now + Duration::from_secs(21));
        assert!(!state.claim_heartbeat(interval, now + Duration::from_secs(60)));
    }
}
