//! Periodic no-op query that keeps idle connections open.

use crate::session::{wait_shutdown, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tsquery_protocol::{Command, KEEPALIVE_COMMAND};

/// Sends the keepalive command every `period` while the queue is idle.
///
/// Failures are logged and never surfaced to callers.
pub(crate) async fn run_keepalive(session: Arc<Session>, period: Duration) {
    let mut shutdown = session.shutdown_signal();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        // Real traffic already resets the server's idle timer.
        if !session.queue.is_empty() {
            continue;
        }

        match session.submit(&Command::new(KEEPALIVE_COMMAND)) {
            Ok(handle) => {
                let session_id = session.id();
                let _ = handle.on_failure(move |err| {
                    tracing::warn!(session = session_id, "keepalive failed: {}", err);
                });
            }
            Err(e) => {
                tracing::debug!(session = session.id(), "keepalive stopped: {}", e);
                break;
            }
        }
    }
}
