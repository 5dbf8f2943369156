//! Provider-neutral contract between the conversation runtime and its remote collaborators.
//!
//! This crate defines only the live-channel and REST seams the orchestrator depends on:
//! the closed [`ChatEvent`] set with its typed [`EventRegistry`], the [`ChannelTransport`]
//! membership/send surface, and the [`ChatBackend`] request/response calls. Wire codecs and
//! HTTP details live in the implementing crates.

mod event;
mod registry;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use event::{
    BroadcastMessage, ChatEvent, CompletionSignal, ControlAction, ControlMessage, EventKind,
};
pub use registry::{EventHandler, EventRegistry, SubscriptionId};

/// All-zero identifier naming both the default world/server and the shared agent bus.
pub const SENTINEL_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Origin tag stamped on messages sent from this client.
pub const CLIENT_SOURCE: &str = "client_chat";

/// Liveness signal returned by [`ChannelTransport::connect`].
///
/// The value flips to `true` once the channel is live and back to `false` when it drops.
/// A failed dial republishes `false`, so a waiting receiver wakes without waiting out its
/// own timeout.
pub type ConnectSignal = tokio::sync::watch::Receiver<bool>;

/// Exponential backoff `base * 2^attempt` (zero-based), saturating and capped at `max`.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exponent = attempt.min(30);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
}

/// Failure to hand an outbound frame to the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("live channel is not connected")]
    NotConnected,
    #[error("failed to encode outbound frame: {0}")]
    Encode(String),
}

/// Failure reported by a [`ChatBackend`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("server rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("failed to decode server response: {0}")]
    Decode(String),
    #[error("{0}")]
    Other(String),
}

/// Message payload transmitted to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(rename = "message")]
    pub text: String,
    pub channel_id: String,
    pub room_id: String,
    pub server_id: String,
    pub source: String,
    pub created_at: i64,
}

/// One prior message returned by the history endpoint, in server order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub text: String,
    pub created_at: i64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Bidirectional live channel to the remote service.
///
/// Implementations own exactly one underlying connection. Membership calls are
/// fire-and-forget: nothing is acknowledged and frames issued while disconnected are
/// dropped. Connection failures are never returned to callers; they only show up through
/// the [`ConnectSignal`].
pub trait ChannelTransport: Send + Sync + 'static {
    /// Opens the channel for `(user_id, server_id)`, reusing a live or dialing channel
    /// opened with the same arguments.
    fn connect(&self, user_id: &str, server_id: &str) -> ConnectSignal;

    fn is_connected(&self) -> bool;

    fn join_room(&self, room_id: &str);

    fn leave_room(&self, room_id: &str);

    fn join_channel(&self, channel_id: &str, server_id: &str);

    fn leave_channel(&self, channel_id: &str);

    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId;

    fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool;
}

/// Request/response calls made around the live channel.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Reachability probe. `Ok` means the server is up.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Adds `agent_id` to `channel_id`. Already being a member counts as success.
    async fn register_agent(&self, channel_id: &str, agent_id: &str) -> Result<(), BackendError>;

    /// Fetches up to `limit` prior messages of one session.
    async fn fetch_history(
        &self,
        agent_id: &str,
        session_key: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError>;
}
