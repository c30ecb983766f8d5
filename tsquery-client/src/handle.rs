//! Single-assignment result handle.
//!
//! A [`ResultHandle`] moves from pending to exactly one of succeeded, failed
//! or cancelled. The first completion wins; later attempts return `false`.
//! Waiters can await it, block a plain thread on it, poll it, or attach one
//! success and one failure callback. Callbacks run on the thread that
//! completes the handle (the reader task for network responses).

use crate::error::ClientError;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send>;
type FailureCallback = Box<dyn FnOnce(&ClientError) + Send>;

enum Outcome<T> {
    Pending,
    Succeeded(T),
    Failed(ClientError),
    Cancelled,
}

struct Slot<T> {
    outcome: Outcome<T>,
    on_success: Option<SuccessCallback<T>>,
    on_failure: Option<FailureCallback>,
    success_registered: bool,
    failure_registered: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
    notify: Notify,
}

/// Handle to a result that is assigned at most once.
pub struct ResultHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> Default for ResultHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.slot.lock().outcome {
            Outcome::Pending => "pending",
            Outcome::Succeeded(_) => "succeeded",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled => "cancelled",
        };
        f.debug_struct("ResultHandle").field("state", &state).finish()
    }
}

pub(crate) fn run_guarded(kind: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("{} callback panicked", kind);
    }
}

fn result_of<T: Clone>(outcome: &Outcome<T>) -> Option<Result<T, ClientError>> {
    match outcome {
        Outcome::Pending => None,
        Outcome::Succeeded(value) => Some(Ok(value.clone())),
        Outcome::Failed(err) => Some(Err(err.clone())),
        Outcome::Cancelled => Some(Err(ClientError::Cancelled)),
    }
}

impl<T: Clone> ResultHandle<T> {
    /// Creates a pending handle.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    outcome: Outcome::Pending,
                    on_success: None,
                    on_failure: None,
                    success_registered: false,
                    failure_registered: false,
                }),
                done: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolves the handle with a value. Returns `false` if already done.
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Outcome::Succeeded(value))
    }

    /// Fails the handle. Returns `false` if already done.
    pub fn fail(&self, err: ClientError) -> bool {
        self.complete(Outcome::Failed(err))
    }

    /// Cancels the handle. Returns `false` if already done.
    ///
    /// Only the client side is affected: a command already queued is still
    /// answered by the server, and that answer is ignored.
    pub fn cancel(&self) -> bool {
        self.complete(Outcome::Cancelled)
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        let (success, failure) = {
            let mut guard = self.shared.slot.lock();
            let slot = &mut *guard;
            if !matches!(slot.outcome, Outcome::Pending) {
                return false;
            }
            slot.outcome = outcome;

            match &slot.outcome {
                Outcome::Succeeded(value) => {
                    slot.on_failure = None;
                    let success = slot.on_success.take().map(|cb| (cb, value.clone()));
                    (success, None)
                }
                Outcome::Failed(err) => {
                    slot.on_success = None;
                    let failure = slot.on_failure.take().map(|cb| (cb, err.clone()));
                    (None, failure)
                }
                Outcome::Cancelled => {
                    slot.on_success = None;
                    let failure = slot
                        .on_failure
                        .take()
                        .map(|cb| (cb, ClientError::Cancelled));
                    (None, failure)
                }
                Outcome::Pending => (None, None),
            }
        };

        self.shared.done.notify_all();
        self.shared.notify.notify_waiters();

        if let Some((cb, value)) = success {
            run_guarded("success", move || cb(&value));
        }
        if let Some((cb, err)) = failure {
            run_guarded("failure", move || cb(&err));
        }
        true
    }

    pub fn is_done(&self) -> bool {
        !matches!(self.shared.slot.lock().outcome, Outcome::Pending)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.slot.lock().outcome, Outcome::Cancelled)
    }

    /// Non-blocking poll. `None` while pending.
    pub fn try_get(&self) -> Option<Result<T, ClientError>> {
        result_of(&self.shared.slot.lock().outcome)
    }

    /// Waits until the handle is done.
    pub async fn get(&self) -> Result<T, ClientError> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.try_get() {
                return result;
            }
            notified.await;
        }
    }

    /// Waits at most `timeout`.
    ///
    /// A timeout leaves the handle untouched: a later resolution is still
    /// observed by the next call.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T, ClientError> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Blocks the current thread until the handle is done.
    ///
    /// Must not be called from an async task.
    pub fn get_blocking(&self) -> Result<T, ClientError> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = result_of(&slot.outcome) {
                return result;
            }
            self.shared.done.wait(&mut slot);
        }
    }

    /// Blocks the current thread for at most `timeout`.
    pub fn get_blocking_timeout(&self, timeout: Duration) -> Result<T, ClientError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = result_of(&slot.outcome) {
                return result;
            }
            if self.shared.done.wait_until(&mut slot, deadline).timed_out() {
                return result_of(&slot.outcome).unwrap_or(Err(ClientError::Timeout));
            }
        }
    }

    /// Registers the success callback.
    ///
    /// Runs immediately if the handle already succeeded. A second
    /// registration is rejected.
    pub fn on_success<F>(&self, callback: F) -> Result<(), ClientError>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let value = {
            let mut guard = self.shared.slot.lock();
            let slot = &mut *guard;
            if slot.success_registered {
                return Err(ClientError::CallbackAlreadyRegistered("success"));
            }
            slot.success_registered = true;

            match &slot.outcome {
                Outcome::Pending => {
                    slot.on_success = Some(Box::new(callback));
                    return Ok(());
                }
                Outcome::Succeeded(value) => value.clone(),
                Outcome::Failed(_) | Outcome::Cancelled => return Ok(()),
            }
        };

        run_guarded("success", move || callback(&value));
        Ok(())
    }

    /// Registers the failure callback, also invoked on cancellation.
    ///
    /// Runs immediately if the handle already failed. A second
    /// registration is rejected.
    pub fn on_failure<F>(&self, callback: F) -> Result<(), ClientError>
    where
        F: FnOnce(&ClientError) + Send + 'static,
    {
        let err = {
            let mut guard = self.shared.slot.lock();
            let slot = &mut *guard;
            if slot.failure_registered {
                return Err(ClientError::CallbackAlreadyRegistered("failure"));
            }
            slot.failure_registered = true;

            match &slot.outcome {
                Outcome::Pending => {
                    slot.on_failure = Some(Box::new(callback));
                    return Ok(());
                }
                Outcome::Failed(err) => err.clone(),
                Outcome::Cancelled => ClientError::Cancelled,
                Outcome::Succeeded(_) => return Ok(()),
            }
        };

        run_guarded("failure", move || callback(&err));
        Ok(())
    }
}

/// Waits for every handle, collecting values in input order.
///
/// Returns the first failure as soon as it is observed.
pub async fn await_all<T: Clone>(handles: &[ResultHandle<T>]) -> Result<Vec<T>, ClientError> {
    futures::future::try_join_all(handles.iter().map(|h| h.get())).await
}

/// Returns the first successful value.
///
/// Fails with [`ClientError::AllFailed`] (errors in input order) only once
/// every handle has failed.
pub async fn await_any<T: Clone>(handles: &[ResultHandle<T>]) -> Result<T, ClientError> {
    let mut errors: Vec<Option<ClientError>> = (0..handles.len()).map(|_| None).collect();
    let mut waiting: FuturesUnordered<_> = handles
        .iter()
        .enumerate()
        .map(|(i, h)| async move { (i, h.get().await) })
        .collect();

    while let Some((i, result)) = waiting.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(err) => errors[i] = Some(err),
        }
    }

    Err(ClientError::AllFailed(errors.into_iter().flatten().collect()))
}
