//! Heartbeat scheduler.
//!
//! Ticks at a fixed rate for the lifetime of the client and sends
//! `SLOT_HEARTBEAT` whenever the dedicated connection is up and the
//! interval has elapsed since the last one.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::MissedTickBehavior;

use crate::connection::Connection;

pub(crate) async fn run(conn: Arc<Connection>) {
    let mut ticker = tokio::time::interval(conn.settings.heartbeat_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = conn.shutdown.cancelled() => break,
        }

        let due = conn
            .state
            .lock()
            .claim_heartbeat(conn.settings.heartbeat_interval, Instant::now());
        if due {
            conn.send_heartbeat();
        }
    }
    tracing::debug!("heartbeat scheduler stopped");
}
