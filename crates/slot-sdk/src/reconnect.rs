//! Reconnect policy: exponential back-off after a lost dedicated connection,
//! a short constant delay while the registration handshake is still failing.

use std::time::Duration;

use crate::config::BackoffConfig;
use crate::state::{CloseKind, SessionEnd};

/// Controls how the slot client reconnects after a connection drop.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay after the first dedicated-connection loss.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each consecutive loss.
    pub backoff_factor: f64,
    /// Constant delay between registration attempts.
    pub registration_retry: Duration,
    /// A dedicated connection that stays up this long resets the back-off.
    pub reset_after: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for ReconnectBackoff {
    fn from(cfg: &BackoffConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_ms),
            max_delay: Duration::from_millis(cfg.max_ms),
            backoff_factor: cfg.factor,
            registration_retry: Duration::from_millis(cfg.registration_retry_ms),
            reset_after: Duration::from_secs(cfg.reset_after_secs),
        }
    }
}

impl ReconnectBackoff {
    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

/// Tracks consecutive dedicated-connection losses for the supervisor.
///
/// The counter resets once a dedicated connection has stayed up for
/// `reset_after`, not on each successful re-registration: every loss is
/// followed by a re-registration, so resetting there would pin the delay at
/// `initial_delay`.
#[derive(Debug)]
pub(crate) struct RetryTracker {
    policy: ReconnectBackoff,
    attempt: u32,
}

impl RetryTracker {
    pub fn new(policy: ReconnectBackoff) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next connection attempt.
    pub fn next_delay(&mut self, end: &SessionEnd) -> Duration {
        if end
            .dedicated_for
            .is_some_and(|up| up >= self.policy.reset_after)
        {
            self.attempt = 0;
        }
        match end.kind {
            CloseKind::PortSwitch => Duration::ZERO,
            CloseKind::RegistrationIncomplete => self.policy.registration_retry,
            CloseKind::DedicatedLost => {
                let delay = self.policy.delay_for_attempt(self.attempt);
                self.attempt = self.attempt.saturating_add(1);
                delay
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lost(up: Option<u64>) -> SessionEnd {
        SessionEnd {
            kind: CloseKind::DedicatedLost,
            dedicated_for: up.map(Duration::from_secs),
        }
    }

    fn kind(kind: CloseKind) -> SessionEnd {
        SessionEnd {
            kind,
            dedicated_for: None,
        }
    }

    #[test]
    fn default_policy_values() {
        let p = ReconnectBackoff::default();
        assert_eq!(p.initial_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(300));
        assert_eq!(p.registration_retry, Duration::from_secs(1));
        assert_eq!(p.reset_after, Duration::from_secs(60));
    }

    #[test]
    fn delay_doubles_up_to_cap() {
        let p = ReconnectBackoff::default();
        let secs: Vec<u64> = (0..11).map(|n| p.delay_for_attempt(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300]);
        assert_eq!(p.delay_for_attempt(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn consecutive_losses_back_off() {
        let mut t = RetryTracker::new(ReconnectBackoff::default());
        let delays: Vec<u64> = (0..4).map(|_| t.next_delay(&lost(Some(2))).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn registration_failures_use_constant_delay() {
        let mut t = RetryTracker::new(ReconnectBackoff::default());
        t.next_delay(&lost(None));
        t.next_delay(&lost(None));
        for _ in 0..5 {
            assert_eq!(
                t.next_delay(&kind(CloseKind::RegistrationIncomplete)),
                Duration::from_secs(1)
            );
        }
        // counter untouched by registration failures
        assert_eq!(t.next_delay(&lost(None)), Duration::from_secs(4));
    }

    #[test]
    fn port_switch_is_immediate() {
        let mut t = RetryTracker::new(ReconnectBackoff::default());
        t.next_delay(&lost(None));
        assert_eq!(t.next_delay(&kind(CloseKind::PortSwitch)), Duration::ZERO);
        assert_eq!(t.next_delay(&lost(None)), Duration::from_secs(2));
    }

    #[test]
    fn reregistration_does_not_reset_backoff() {
        let mut t = RetryTracker::new(ReconnectBackoff::default());
        let mut delays = Vec::new();
        for _ in 0..3 {
            // Re-register, switch, then lose the short-lived dedicated socket.
            assert_eq!(t.next_delay(&kind(CloseKind::PortSwitch)), Duration::ZERO);
            delays.push(t.next_delay(&lost(Some(5))).as_secs());
        }
        assert_eq!(delays, vec![1, 2, 4]);
    }

    #[test]
    fn long_lived_connection_resets_backoff() {
        let mut t = RetryTracker::new(ReconnectBackoff::default());
        for _ in 0..5 {
            t.next_delay(&lost(Some(1)));
        }
        assert_eq!(t.next_delay(&lost(Some(120))), Duration::from_secs(1));
        assert_eq!(t.next_delay(&lost(Some(1))), Duration::from_secs(2));
    }
}
