//! Event dispatch: resolves notification names and fans events out to
//! listeners and broadcast subscribers.

use crate::error::ClientError;
use crate::event::{Event, EventKind};
use crate::handle::run_guarded;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tsquery_protocol::{parse_records, Record};

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Notification line as split by the reader, before any parsing.
#[derive(Debug, Clone)]
pub(crate) struct RawEvent {
    pub name: String,
    pub body: String,
}

/// Routes events to listeners by kind.
///
/// Listener lists are cloned before invocation, so a listener may register
/// or unregister listeners without deadlocking. A panicking listener is
/// logged and does not stop the remaining ones.
pub struct EventDispatcher {
    listeners: DashMap<EventKind, Vec<(ListenerId, Listener)>>,
    any_listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<Event>,
    unknown_events: AtomicU64,
}

impl EventDispatcher {
    /// Creates a dispatcher whose broadcast channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: DashMap::new(),
            any_listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
            unknown_events: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a listener for one event kind.
    pub fn register<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Registers a listener for every event kind.
    pub fn register_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.any_listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        {
            let mut any = self.any_listeners.write();
            if let Some(pos) = any.iter().position(|(lid, _)| *lid == id) {
                any.remove(pos);
                return true;
            }
        }

        for mut entry in self.listeners.iter_mut() {
            if let Some(pos) = entry.iter().position(|(lid, _)| *lid == id) {
                entry.remove(pos);
                return true;
            }
        }
        false
    }

    /// Subscribes to every dispatched event.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Parses a notification into events, one per record in the body.
    ///
    /// Unknown names fail with [`ClientError::UnknownEvent`].
    pub fn parse(&self, name: &str, body: &str) -> Result<Vec<Event>, ClientError> {
        let kind = EventKind::from_wire(name).ok_or_else(|| {
            self.unknown_events.fetch_add(1, Ordering::Relaxed);
            ClientError::UnknownEvent(name.to_string())
        })?;

        let mut records = parse_records(body);
        if records.is_empty() {
            records.push(Record::new());
        }
        Ok(records
            .into_iter()
            .map(|record| Event::new(kind, record))
            .collect())
    }

    /// Parses and delivers one notification. Returns the number of events.
    pub fn dispatch(&self, name: &str, body: &str) -> Result<usize, ClientError> {
        let events = self.parse(name, body)?;
        for event in &events {
            self.deliver(event);
            // No subscribers is not an error.
            let _ = self.sender.send(event.clone());
        }
        Ok(events.len())
    }

    /// Invokes the listeners for `event`.
    pub fn deliver(&self, event: &Event) {
        let typed: Vec<Listener> = self
            .listeners
            .get(&event.kind)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();
        let any: Vec<Listener> = self
            .any_listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in typed.iter().chain(any.iter()) {
            run_guarded("event listener", || listener(event));
        }
    }

    /// Count of notifications with an unmapped name.
    pub fn unknown_event_count(&self) -> u64 {
        self.unknown_events.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        let typed: usize = self.listeners.iter().map(|entry| entry.len()).sum();
        typed + self.any_listeners.read().len()
    }
}

/// Drains raw notifications from the reader and dispatches them.
pub(crate) async fn run_dispatch(
    dispatcher: Arc<EventDispatcher>,
    mut events: mpsc::UnboundedReceiver<RawEvent>,
) {
    while let Some(raw) = events.recv().await {
        if let Err(e) = dispatcher.dispatch(&raw.name, &raw.body) {
            tracing::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_to_matching_listeners() {
        let dispatcher = EventDispatcher::new(16);
        let texts = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let t = texts.clone();
        dispatcher.register(EventKind::TextMessage, move |event| {
            assert_eq!(event.message(), Some("hi there"));
            t.fetch_add(1, Ordering::SeqCst);
        });
        let a = all.clone();
        dispatcher.register_any(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(
            dispatcher
                .dispatch("notifytextmessage", "targetmode=3 msg=hi\\sthere")
                .unwrap(),
            1
        );
        dispatcher.dispatch("notifyclientleftview", "clid=4").unwrap();

        assert_eq!(texts.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_event_is_distinguishable() {
        let dispatcher = EventDispatcher::new(16);
        let err = dispatcher.dispatch("notifysomethingnew", "a=1").unwrap_err();
        assert!(matches!(err, ClientError::UnknownEvent(ref name) if name == "notifysomethingnew"));
        assert_eq!(dispatcher.unknown_event_count(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let dispatcher = EventDispatcher::new(16);
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.register(EventKind::ClientMoved, |_| panic!("listener bug"));
        let c = calls.clone();
        dispatcher.register(EventKind::ClientMoved, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch("notifyclientmoved", "ctid=2 clid=5").unwrap();
        dispatcher.dispatch("notifyclientmoved", "ctid=3 clid=5").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister() {
        let dispatcher = EventDispatcher::new(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = dispatcher.register(EventKind::ChannelCreated, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let any = dispatcher.register_any(|_| {});
        assert_eq!(dispatcher.listener_count(), 2);

        assert!(dispatcher.unregister(id));
        assert!(!dispatcher.unregister(id));
        assert!(dispatcher.unregister(any));
        dispatcher.dispatch("notifychannelcreated", "cid=9").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_one_event_per_record() {
        let dispatcher = EventDispatcher::new(16);
        let mut rx = dispatcher.subscribe();

        let count = dispatcher
            .dispatch("notifyclientleftview", "cfid=1 ctid=0 reasonid=8 clid=4|clid=5")
            .unwrap();
        assert_eq!(count, 2);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.client_id(), Some(4));
        assert_eq!(second.client_id(), Some(5));
        // Later records inherit missing fields from the first.
        assert_eq!(second.reason_id(), Some(8));
    }
}
