use serde::{Deserialize, Serialize};

use crate::SENTINEL_ID;

/// The three event kinds a live channel emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    MessageBroadcast,
    ControlMessage,
    MessageComplete,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::MessageBroadcast,
        EventKind::ControlMessage,
        EventKind::MessageComplete,
    ];

    /// Event name used on the wire.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::MessageBroadcast => "messageBroadcast",
            Self::ControlMessage => "controlMessage",
            Self::MessageComplete => "messageComplete",
        }
    }

    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.wire_name() == name)
    }
}

/// A chat message relayed by the server to every member of a room or channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default, alias = "message")]
    pub text: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl BroadcastMessage {
    #[must_use]
    pub fn new(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: None,
            sender_id: sender_id.into(),
            sender_name: None,
            text: text.into(),
            channel_id: None,
            room_id: None,
            created_at: None,
            source: None,
            thought: None,
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_sender_name(mut self, sender_name: impl Into<String>) -> Self {
        self.sender_name = Some(sender_name.into());
        self
    }

    /// Returns true when the message was routed through the shared sentinel channel.
    #[must_use]
    pub fn is_on_sentinel_channel(&self) -> bool {
        self.channel_id.as_deref() == Some(SENTINEL_ID) || self.room_id.as_deref() == Some(SENTINEL_ID)
    }
}

/// Parsed form of [`ControlMessage::action`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    DisableInput,
    EnableInput,
    Other(String),
}

/// Server directive addressed to the client UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    pub action: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

impl ControlMessage {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: None,
            room_id: None,
        }
    }

    #[must_use]
    pub fn disable_input() -> Self {
        Self::new("disable_input")
    }

    #[must_use]
    pub fn enable_input() -> Self {
        Self::new("enable_input")
    }

    #[must_use]
    pub fn parsed_action(&self) -> ControlAction {
        match self.action.as_str() {
            "disable_input" => ControlAction::DisableInput,
            "enable_input" => ControlAction::EnableInput,
            other => ControlAction::Other(other.to_string()),
        }
    }
}

/// End-of-turn marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSignal {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

/// Closed set of events a live channel can deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    MessageBroadcast(BroadcastMessage),
    Control(ControlMessage),
    Complete(CompletionSignal),
}

impl ChatEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageBroadcast(_) => EventKind::MessageBroadcast,
            Self::Control(_) => EventKind::ControlMessage,
            Self::Complete(_) => EventKind::MessageComplete,
        }
    }
}
