//! Command envelopes: one submitted command and its lifecycle.

use crate::error::ClientError;
use crate::handle::ResultHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tsquery_protocol::{parse_records, Command, QueryError, Record};

static NEXT_ENVELOPE_ID: AtomicU64 = AtomicU64::new(1);

/// One outstanding command.
///
/// `sent` is set at most once and always before `answered`. Once answered
/// the envelope ignores further input; the result travels only through its
/// [`ResultHandle`].
pub struct Envelope {
    id: u64,
    name: String,
    text: String,
    sent: AtomicBool,
    answered: AtomicBool,
    sent_at: OnceLock<Instant>,
    response: Mutex<Vec<String>>,
    error: OnceLock<QueryError>,
    handle: ResultHandle<Vec<Record>>,
}

impl Envelope {
    pub fn new(command: &Command) -> Self {
        Self {
            id: NEXT_ENVELOPE_ID.fetch_add(1, Ordering::Relaxed),
            name: command.name().to_string(),
            text: command.encode(),
            sent: AtomicBool::new(false),
            answered: AtomicBool::new(false),
            sent_at: OnceLock::new(),
            response: Mutex::new(Vec::new()),
            error: OnceLock::new(),
            handle: ResultHandle::new(),
        }
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialized command line without terminator.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn handle(&self) -> ResultHandle<Vec<Record>> {
        self.handle.clone()
    }

    /// Marks the envelope sent. Returns `false` if it already was.
    pub fn mark_sent(&self) -> bool {
        self.mark_sent_at(Instant::now())
    }

    pub(crate) fn mark_sent_at(&self, at: Instant) -> bool {
        if self.sent.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.sent_at.set(at);
        true
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::Acquire)
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at.get().copied()
    }

    /// Appends one response line. No-op once answered.
    pub fn feed(&self, line: &str) -> bool {
        if self.is_answered() {
            return false;
        }
        self.response.lock().push(line.to_string());
        true
    }

    /// Consumes the error trailer and resolves the handle.
    ///
    /// Id 0 resolves with the accumulated records, anything else fails the
    /// handle with a server error. A malformed trailer still answers the
    /// command, failing it with a protocol error. Returns `false` if the
    /// envelope was not sent yet or was already answered.
    pub fn feed_error(&self, line: &str) -> bool {
        if !self.is_sent() || self.answered.swap(true, Ordering::AcqRel) {
            return false;
        }

        match QueryError::parse(line) {
            Ok(err) => {
                let _ = self.error.set(err.clone());
                if err.is_success() {
                    self.handle.succeed(self.records());
                } else {
                    tracing::debug!(command = %self.name, id = err.id, "command failed: {}", err);
                    self.handle.fail(ClientError::from(err));
                }
            }
            Err(e) => {
                tracing::warn!(command = %self.name, "malformed error trailer: {}", e);
                self.handle.fail(ClientError::Protocol(e));
            }
        }
        true
    }

    /// Fails the handle without a server answer (connection teardown,
    /// write failure).
    pub fn fail(&self, err: ClientError) -> bool {
        if self.is_sent() {
            self.answered.store(true, Ordering::Release);
        }
        self.handle.fail(err)
    }

    /// Records parsed from every response line received so far.
    pub fn records(&self) -> Vec<Record> {
        self.response
            .lock()
            .iter()
            .flat_map(|line| parse_records(line))
            .collect()
    }

    /// The parsed error trailer, once answered by the server.
    pub fn error(&self) -> Option<&QueryError> {
        self.error.get()
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("sent", &self.is_sent())
            .field("answered", &self.is_answered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(text: &str) -> Envelope {
        Envelope::new(&Command::raw(text).unwrap())
    }

    #[test]
    fn test_serialized_on_construction() {
        let env = Envelope::new(&Command::new("use").arg("sid", 1));
        assert_eq!(env.name(), "use");
        assert_eq!(env.text(), "use sid=1");
        assert!(!env.is_sent());
        assert!(!env.is_answered());
    }

    #[test]
    fn test_mark_sent_once() {
        let env = envelope("version");
        assert!(env.sent_at().is_none());
        assert!(env.mark_sent());
        assert!(!env.mark_sent());
        assert!(env.is_sent());
        assert!(env.sent_at().is_some());
    }

    #[test]
    fn test_error_before_sent_is_ignored() {
        let env = envelope("version");
        assert!(!env.feed_error("error id=0 msg=ok"));
        assert!(!env.is_answered());
    }

    #[test]
    fn test_success_with_records() {
        let env = envelope("clientlist");
        env.mark_sent();
        assert!(env.feed("clid=1 client_nickname=Alice|clid=2 client_nickname=Bob"));
        assert!(env.feed_error("error id=0 msg=ok"));

        assert!(env.is_answered());
        assert!(env.error().unwrap().is_success());

        let records = env.handle().try_get().unwrap().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("client_nickname"), Some("Alice"));
        assert_eq!(records[1].get("client_nickname"), Some("Bob"));
    }

    #[test]
    fn test_multi_line_response_accumulates() {
        let env = envelope("help");
        env.mark_sent();
        env.feed("a=1");
        env.feed("a=2");
        env.feed_error("error id=0 msg=ok");
        assert_eq!(env.records().len(), 2);
    }

    #[test]
    fn test_server_error_fails_handle() {
        let env = envelope("clientinfo clid=99");
        env.mark_sent();
        env.feed_error("error id=512 msg=invalid\\sclientID");

        match env.handle().try_get().unwrap() {
            Err(ClientError::ServerError { id, message, .. }) => {
                assert_eq!(id, 512);
                assert_eq!(message, "invalid clientID");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_feed_after_answer_is_noop() {
        let env = envelope("whoami");
        env.mark_sent();
        assert!(env.feed_error("error id=0 msg=ok"));

        assert!(!env.feed("late=1"));
        assert!(!env.feed_error("error id=1 msg=late"));
        assert!(env.error().unwrap().is_success());
        assert!(env.handle().try_get().unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_trailer_answers_with_protocol_error() {
        let env = envelope("whoami");
        env.mark_sent();
        assert!(env.feed_error("error msg=ok"));
        assert!(env.is_answered());
        assert!(matches!(
            env.handle().try_get().unwrap(),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn test_fail_unsent_keeps_answered_clear() {
        let env = envelope("whoami");
        assert!(env.fail(ClientError::ConnectionClosed));
        assert!(!env.is_answered());
        assert!(matches!(
            env.handle().try_get().unwrap(),
            Err(ClientError::ConnectionClosed)
        ));
    }
}
