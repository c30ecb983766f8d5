//! Connection writer: drains the queue onto the socket in lock-step.

use crate::envelope::Envelope;
use crate::error::ClientError;
use crate::session::{wait_shutdown, Session};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Waits until a command may be sent: one is queued and none is in flight.
async fn next_sendable(session: &Session) -> Arc<Envelope> {
    loop {
        let notified = session.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(envelope) = session.queue.next_to_send() {
            return envelope;
        }
        notified.await;
    }
}

/// Runs until shutdown or a write failure.
///
/// Consecutive sends are at least `flood_interval` apart. A write failure
/// fails the command being written and reports the session lost.
pub(crate) async fn run_writer<W>(mut io: W, session: Arc<Session>, flood_interval: Duration)
where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = session.shutdown_signal();
    let mut last_sent: Option<Instant> = None;
    tracing::debug!(session = session.id(), "writer started");

    loop {
        let envelope = tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            envelope = next_sendable(&session) => envelope,
        };

        if let Some(last) = last_sent {
            let ready = last + flood_interval;
            if ready > Instant::now() {
                tokio::select! {
                    _ = wait_shutdown(&mut shutdown) => break,
                    _ = tokio::time::sleep_until(ready.into()) => {}
                }
            }
        }

        // Marked before the write so the reader can attribute a fast reply.
        let now = Instant::now();
        if !envelope.mark_sent_at(now) {
            continue;
        }
        last_sent = Some(now);

        let mut line = String::with_capacity(envelope.text().len() + 1);
        line.push_str(envelope.text());
        line.push('\n');

        tracing::debug!(
            session = session.id(),
            envelope = envelope.id(),
            "> {}",
            envelope.text()
        );
        if let Err(e) = io.write_all(line.as_bytes()).await {
            tracing::warn!(session = session.id(), "write failed: {}", e);
            envelope.fail(ClientError::Io(io::Error::new(e.kind(), e.to_string())));
            session.signal_lost(ClientError::Io(e));
            break;
        }
    }

    let _ = io.shutdown().await;
    tracing::debug!(session = session.id(), "writer stopped");
}
