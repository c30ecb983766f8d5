//! Per-connection state shared by the reader, writer and keepalive tasks.
//!
//! A session lives exactly as long as one socket. Reconnecting creates a
//! new session with an empty queue.

use crate::envelope::Envelope;
use crate::error::ClientError;
use crate::handle::ResultHandle;
use crate::queue::CommandQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify};
use tsquery_protocol::{Command, Record};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Session {
    id: u64,
    pub(crate) queue: CommandQueue,
    /// Wakes the writer when a command is queued or answered.
    pub(crate) wake: Notify,
    shutdown: watch::Sender<bool>,
    lost: Mutex<Option<oneshot::Sender<ClientError>>>,
    closed_by_user: AtomicBool,
    torn_down: AtomicBool,
}

impl Session {
    /// Creates a session and the receiver that fires when it is lost.
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<ClientError>) {
        let (shutdown, _) = watch::channel(false);
        let (lost_tx, lost_rx) = oneshot::channel();
        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            queue: CommandQueue::new(),
            wake: Notify::new(),
            shutdown,
            lost: Mutex::new(Some(lost_tx)),
            closed_by_user: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        });
        (session, lost_rx)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Queues a command and wakes the writer.
    pub(crate) fn submit(
        &self,
        command: &Command,
    ) -> Result<ResultHandle<Vec<Record>>, ClientError> {
        let envelope = Arc::new(Envelope::new(command));
        let handle = envelope.handle();
        tracing::debug!(
            session = self.id,
            envelope = envelope.id(),
            "queueing command {}",
            envelope.name()
        );
        self.queue.push(envelope)?;
        self.wake.notify_one();
        Ok(handle)
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Reports that the socket failed. Only the first report is delivered.
    pub(crate) fn signal_lost(&self, err: ClientError) {
        if let Some(tx) = self.lost.lock().take() {
            tracing::debug!(session = self.id, "session lost: {}", err);
            let _ = tx.send(err);
        }
    }

    pub(crate) fn mark_closed_by_user(&self) {
        self.closed_by_user.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed_by_user(&self) -> bool {
        self.closed_by_user.load(Ordering::SeqCst)
    }

    /// Stops every task of this session and fails all pending commands.
    ///
    /// Idempotent. Returns the number of commands failed.
    pub(crate) fn teardown(&self, err: ClientError) -> usize {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _ = self.shutdown.send(true);
        // Releases the supervisor if nothing reported a loss.
        drop(self.lost.lock().take());
        let failed = self.queue.drain(&err);
        tracing::debug!(
            session = self.id,
            "session torn down, {} pending command(s) failed",
            failed
        );
        failed
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

/// Resolves once `signal` reports shutdown (or its sender is gone).
pub(crate) async fn wait_shutdown(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stopped| *stopped).await;
}
