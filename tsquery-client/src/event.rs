//! Typed server notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tsquery_protocol::Record;

/// Kind of a server notification, keyed by its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ClientEnterView,
    ClientLeftView,
    ServerEdited,
    ChannelDescriptionChanged,
    ChannelPasswordChanged,
    ChannelEdited,
    ChannelCreated,
    ChannelDeleted,
    ChannelMoved,
    ClientMoved,
    TextMessage,
    TokenUsed,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::ClientEnterView,
        EventKind::ClientLeftView,
        EventKind::ServerEdited,
        EventKind::ChannelDescriptionChanged,
        EventKind::ChannelPasswordChanged,
        EventKind::ChannelEdited,
        EventKind::ChannelCreated,
        EventKind::ChannelDeleted,
        EventKind::ChannelMoved,
        EventKind::ClientMoved,
        EventKind::TextMessage,
        EventKind::TokenUsed,
    ];

    /// Resolves a wire name such as `notifytextmessage`.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            EventKind::ClientEnterView => "notifycliententerview",
            EventKind::ClientLeftView => "notifyclientleftview",
            EventKind::ServerEdited => "notifyserveredited",
            EventKind::ChannelDescriptionChanged => "notifychanneldescriptionchanged",
            EventKind::ChannelPasswordChanged => "notifychannelpasswordchanged",
            EventKind::ChannelEdited => "notifychanneledited",
            EventKind::ChannelCreated => "notifychannelcreated",
            EventKind::ChannelDeleted => "notifychanneldeleted",
            EventKind::ChannelMoved => "notifychannelmoved",
            EventKind::ClientMoved => "notifyclientmoved",
            EventKind::TextMessage => "notifytextmessage",
            EventKind::TokenUsed => "notifytokenused",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A received notification with its decoded fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub record: Record,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, record: Record) -> Self {
        Self {
            kind,
            record,
            received_at: Utc::now(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.record.get(key)
    }

    /// Client the event is about.
    pub fn client_id(&self) -> Option<u32> {
        self.record.get_u32("clid")
    }

    pub fn client_nickname(&self) -> Option<&str> {
        self.record.get("client_nickname")
    }

    /// Channel the event is about. Client moves report the target channel.
    pub fn channel_id(&self) -> Option<u32> {
        self.record
            .get_u32("cid")
            .or_else(|| self.record.get_u32("ctid"))
    }

    /// Source channel of a client entering, leaving or moving.
    pub fn from_channel_id(&self) -> Option<u32> {
        self.record.get_u32("cfid")
    }

    pub fn invoker_id(&self) -> Option<u32> {
        self.record.get_u32("invokerid")
    }

    pub fn invoker_name(&self) -> Option<&str> {
        self.record.get("invokername")
    }

    pub fn invoker_uid(&self) -> Option<&str> {
        self.record.get("invokeruid")
    }

    /// Text of a `notifytextmessage`.
    pub fn message(&self) -> Option<&str> {
        self.record.get("msg")
    }

    /// 1 = private, 2 = channel, 3 = server.
    pub fn target_mode(&self) -> Option<u32> {
        self.record.get_u32("targetmode")
    }

    pub fn reason_id(&self) -> Option<u32> {
        self.record.get_u32("reasonid")
    }

    pub fn reason_message(&self) -> Option<&str> {
        self.record.get("reasonmsg")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for (key, value) in self.record.iter() {
            if value.is_empty() {
                write!(f, " {}", key)?;
            } else {
                write!(f, " {}={}", key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsquery_protocol::parse_records;

    #[test]
    fn test_wire_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.wire_name()), Some(kind));
        }
        assert_eq!(EventKind::from_wire("notifyunknown"), None);
        assert_eq!(EventKind::from_wire("TextMessage"), None);
    }

    #[test]
    fn test_text_message_accessors() {
        let record = parse_records("targetmode=3 msg=hello\\sworld invokerid=5 invokername=Alice")
            .remove(0);
        let event = Event::new(EventKind::TextMessage, record);
        assert_eq!(event.target_mode(), Some(3));
        assert_eq!(event.message(), Some("hello world"));
        assert_eq!(event.invoker_id(), Some(5));
        assert_eq!(event.invoker_name(), Some("Alice"));
        assert_eq!(event.client_id(), None);
    }

    #[test]
    fn test_client_moved_uses_target_channel() {
        let record = parse_records("ctid=7 reasonid=0 clid=12").remove(0);
        let event = Event::new(EventKind::ClientMoved, record);
        assert_eq!(event.channel_id(), Some(7));
        assert_eq!(event.client_id(), Some(12));
        assert_eq!(event.reason_id(), Some(0));
        assert_eq!(event.to_string(), "notifyclientmoved clid=12 ctid=7 reasonid=0");
    }
}
