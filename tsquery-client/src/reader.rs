//! Connection reader: classifies incoming lines and routes them.

use crate::dispatcher::RawEvent;
use crate::error::ClientError;
use crate::session::{wait_shutdown, Session};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tsquery_protocol::{classify, Line};

/// Routes one line.
///
/// Events go to the dispatch task. Error trailers and response fragments
/// belong to the oldest unanswered command, provided it has been sent;
/// anything else is unsolicited and dropped.
pub(crate) fn route_line(session: &Session, events: &mpsc::UnboundedSender<RawEvent>, line: &str) {
    match classify(line) {
        Line::Empty => {}
        Line::Event { name, body } => {
            tracing::debug!(session = session.id(), "< event {}", name);
            if events
                .send(RawEvent {
                    name: name.to_string(),
                    body: body.to_string(),
                })
                .is_err()
            {
                tracing::debug!("event dispatcher gone, dropping {}", name);
            }
        }
        Line::Error(text) => match session.queue.first_not_answered() {
            Some(envelope) if envelope.is_sent() => {
                tracing::debug!(
                    session = session.id(),
                    envelope = envelope.id(),
                    "< {}",
                    text
                );
                envelope.feed_error(text);
                session.queue.remove(&envelope);
                session.wake.notify_one();
            }
            _ => tracing::warn!("discarding unsolicited error line: {}", text),
        },
        Line::Response(text) => match session.queue.first_not_answered() {
            Some(envelope) if envelope.is_sent() => {
                tracing::debug!(
                    session = session.id(),
                    envelope = envelope.id(),
                    "< {}",
                    text
                );
                envelope.feed(text);
            }
            _ => tracing::warn!("discarding unsolicited line: {}", text),
        },
    }
}

/// Runs until shutdown, end of stream or a read failure.
pub(crate) async fn run_reader<R>(
    mut io: R,
    session: Arc<Session>,
    events: mpsc::UnboundedSender<RawEvent>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut shutdown = session.shutdown_signal();
    let mut buf = Vec::with_capacity(4096);
    tracing::debug!(session = session.id(), "reader started");

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            read = io.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::info!(session = session.id(), "server closed the connection");
                session.signal_lost(ClientError::ConnectionClosed);
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                route_line(&session, &events, &line);
            }
            Err(e) => {
                tracing::warn!(session = session.id(), "read failed: {}", e);
                session.signal_lost(ClientError::Io(e));
                break;
            }
        }
    }

    tracing::debug!(session = session.id(), "reader stopped");
}
