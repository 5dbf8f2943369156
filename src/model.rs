//! Conversation view data: messages, status indicators and local notices.

use chat_contract::{BroadcastMessage, HistoryMessage, OutboundMessage};

/// Who produced a message, relative to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    Local,
    Agent,
    Participant,
}

impl Author {
    /// Display name used when the server supplied none.
    #[must_use]
    pub fn default_display_name(self) -> &'static str {
        match self {
            Self::Local => "You",
            Self::Agent => "Agent",
            Self::Participant => "User",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub display_name: String,
    pub text: String,
    pub sender_id: String,
    pub session_key: String,
    pub created_at_ms: i64,
    pub source: Option<String>,
    pub author: Author,
    pub thought: Option<String>,
    pub actions: Vec<String>,
    pub is_loading: bool,
}

impl Message {
    pub(crate) fn from_outbound(outbound: &OutboundMessage) -> Self {
        Self {
            id: outbound.message_id.clone(),
            display_name: outbound.sender_name.clone(),
            text: outbound.text.clone(),
            sender_id: outbound.sender_id.clone(),
            session_key: outbound.room_id.clone(),
            created_at_ms: outbound.created_at,
            source: Some(outbound.source.clone()),
            author: Author::Local,
            thought: None,
            actions: Vec::new(),
            is_loading: false,
        }
    }

    pub(crate) fn from_broadcast(
        broadcast: BroadcastMessage,
        id: String,
        author: Author,
        session_key: &str,
        received_at_ms: i64,
    ) -> Self {
        Self {
            id,
            display_name: broadcast
                .sender_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| author.default_display_name().to_string()),
            text: broadcast.text,
            sender_id: broadcast.sender_id,
            session_key: session_key.to_string(),
            created_at_ms: broadcast.created_at.unwrap_or(received_at_ms),
            source: broadcast.source,
            author,
            thought: broadcast.thought,
            actions: broadcast.actions,
            is_loading: false,
        }
    }

    pub(crate) fn from_history(history: HistoryMessage, author: Author, session_key: &str) -> Self {
        Self {
            id: history.id,
            display_name: history
                .sender_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| author.default_display_name().to_string()),
            text: history.text,
            sender_id: history.sender_id,
            session_key: session_key.to_string(),
            created_at_ms: history.created_at,
            source: history.source,
            author,
            thought: history.thought,
            actions: history.actions,
            is_loading: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerReachability {
    Checking,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRegistration {
    Checking,
    Ready,
    Error,
}

/// Client-side status line shown next to the transcript, never part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
}

impl Notice {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}
