//! Pending-command queue.
//!
//! Responses carry no request id, so correlation is purely positional: the
//! oldest unanswered envelope is always the one the next error trailer
//! belongs to. The queue has no blocking operations; waiting happens on an
//! envelope's result handle.

use crate::envelope::Envelope;
use crate::error::ClientError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct QueueState {
    entries: VecDeque<Arc<Envelope>>,
    closed: bool,
}

/// Ordered collection of envelopes not yet answered.
pub struct CommandQueue {
    state: Mutex<QueueState>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Appends an envelope. Fails once the queue has been drained.
    pub fn push(&self, envelope: Arc<Envelope>) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::NotConnected);
        }
        state.entries.push_back(envelope);
        Ok(())
    }

    /// Removes an envelope by identity.
    pub fn remove(&self, envelope: &Arc<Envelope>) -> bool {
        let mut state = self.state.lock();
        match state.entries.iter().position(|e| Arc::ptr_eq(e, envelope)) {
            Some(pos) => {
                state.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn first_not_sent(&self) -> Option<Arc<Envelope>> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| !e.is_sent())
            .cloned()
    }

    pub fn first_not_answered(&self) -> Option<Arc<Envelope>> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| !e.is_answered())
            .cloned()
    }

    /// The envelope the writer may send now, if any.
    ///
    /// Only when no command is awaiting its answer, i.e. the first not
    /// answered envelope is also the first not sent.
    pub fn next_to_send(&self) -> Option<Arc<Envelope>> {
        let state = self.state.lock();
        let first = state.entries.iter().find(|e| !e.is_answered())?;
        if first.is_sent() {
            None
        } else {
            Some(first.clone())
        }
    }

    /// Closes the queue and fails every remaining envelope with `err`.
    ///
    /// Returns the number of envelopes failed.
    pub fn drain(&self, err: &ClientError) -> usize {
        let drained: Vec<Arc<Envelope>> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.entries.drain(..).collect()
        };

        for envelope in &drained {
            envelope.fail(err.clone());
        }
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Snapshot of the queued envelopes, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Envelope>> {
        self.state.lock().entries.iter().cloned().collect()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
