//! Deterministic in-memory implementations of the `chat_contract` seams.
//!
//! This crate contains no network code. It records every membership and send call in
//! order so tests can assert on exact sequences, and lets callers inject live events.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chat_contract::{
    BackendError, BroadcastMessage, ChannelTransport, ChatBackend, ChatEvent, CompletionSignal,
    ConnectSignal, EventHandler, EventKind, EventRegistry, HistoryMessage, OutboundMessage,
    SubscriptionId, TransportError, SENTINEL_ID,
};
use tokio::sync::watch;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Connect { user_id: String, server_id: String },
    Subscribe { kind: EventKind },
    Unsubscribe { kind: EventKind },
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    JoinChannel { channel_id: String, server_id: String },
    LeaveChannel { channel_id: String },
    Send { message_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    Immediate,
    Manual,
    Refused,
}

#[derive(Debug, Default)]
struct TransportState {
    ops: Vec<TransportOp>,
    sent: Vec<OutboundMessage>,
    reply_count: u64,
}

/// Scripted agent behaviour applied to every accepted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoReply {
    pub agent_id: String,
    pub agent_name: String,
    pub prefix: String,
}

/// In-memory live channel.
pub struct MockTransport {
    registry: EventRegistry,
    live: watch::Sender<bool>,
    mode: ConnectMode,
    auto_reply: Option<AutoReply>,
    state: Mutex<TransportState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a transport whose `connect` completes immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(ConnectMode::Immediate)
    }

    /// Creates a transport whose `connect` stays pending until [`MockTransport::complete_connect`].
    #[must_use]
    pub fn manual() -> Self {
        Self::with_mode(ConnectMode::Manual)
    }

    /// Creates a transport whose every dial fails right away.
    #[must_use]
    pub fn refusing() -> Self {
        Self::with_mode(ConnectMode::Refused)
    }

    fn with_mode(mode: ConnectMode) -> Self {
        let (live, _) = watch::channel(false);
        Self {
            registry: EventRegistry::new(),
            live,
            mode,
            auto_reply: None,
            state: Mutex::new(TransportState::default()),
        }
    }

    /// Answers every accepted send with one agent broadcast followed by a completion signal.
    #[must_use]
    pub fn with_auto_reply(mut self, agent_id: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.auto_reply = Some(AutoReply {
            agent_id: agent_id.into(),
            agent_name: "Agent".to_string(),
            prefix: prefix.into(),
        });
        self
    }

    pub fn complete_connect(&self) {
        self.live.send_replace(true);
    }

    pub fn drop_connection(&self) {
        self.live.send_replace(false);
    }

    /// Delivers `event` to current subscribers and returns how many handlers ran.
    pub fn emit(&self, event: ChatEvent) -> usize {
        self.registry.dispatch(&event)
    }

    #[must_use]
    pub fn ops(&self) -> Vec<TransportOp> {
        self.lock_state().ops.clone()
    }

    /// Recorded ops excluding connect and subscription bookkeeping.
    #[must_use]
    pub fn membership_ops(&self) -> Vec<TransportOp> {
        self.ops()
            .into_iter()
            .filter(|op| {
                matches!(
                    op,
                    TransportOp::JoinRoom { .. }
                        | TransportOp::LeaveRoom { .. }
                        | TransportOp::JoinChannel { .. }
                        | TransportOp::LeaveChannel { .. }
                )
            })
            .collect()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.lock_state().sent.clone()
    }

    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, TransportOp::Connect { .. }))
            .count()
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry.subscriber_count(kind)
    }

    fn record(&self, op: TransportOp) {
        self.lock_state().ops.push(op);
    }

    fn lock_state(&self) -> MutexGuard<'_, TransportState> {
        lock_unpoisoned(&self.state)
    }

    fn reply_events(&self, reply: &AutoReply, message: &OutboundMessage) -> Vec<ChatEvent> {
        let reply_index = {
            let mut state = self.lock_state();
            state.reply_count += 1;
            state.reply_count
        };

        let mut broadcast = BroadcastMessage::new(
            reply.agent_id.clone(),
            format!("{}{}", reply.prefix, message.text),
        )
        .with_id(format!("mock-reply-{reply_index}"))
        .with_sender_name(reply.agent_name.clone())
        .with_channel(SENTINEL_ID)
        .with_room(message.room_id.clone());
        broadcast.created_at = Some(message.created_at);
        broadcast.source = Some(MOCK_PROVIDER_ID.to_string());

        vec![
            ChatEvent::MessageBroadcast(broadcast),
            ChatEvent::Complete(CompletionSignal {
                channel_id: Some(SENTINEL_ID.to_string()),
                room_id: Some(message.room_id.clone()),
            }),
        ]
    }
}

impl ChannelTransport for MockTransport {
    fn connect(&self, user_id: &str, server_id: &str) -> ConnectSignal {
        self.record(TransportOp::Connect {
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
        });
        match self.mode {
            ConnectMode::Immediate => {
                self.live.send_replace(true);
                self.live.subscribe()
            }
            ConnectMode::Manual => self.live.subscribe(),
            ConnectMode::Refused => {
                let signal = self.live.subscribe();
                self.live.send_replace(false);
                signal
            }
        }
    }

    fn is_connected(&self) -> bool {
        *self.live.borrow()
    }

    fn join_room(&self, room_id: &str) {
        self.record(TransportOp::JoinRoom {
            room_id: room_id.to_string(),
        });
    }

    fn leave_room(&self, room_id: &str) {
        self.record(TransportOp::LeaveRoom {
            room_id: room_id.to_string(),
        });
    }

    fn join_channel(&self, channel_id: &str, server_id: &str) {
        self.record(TransportOp::JoinChannel {
            channel_id: channel_id.to_string(),
            server_id: server_id.to_string(),
        });
    }

    fn leave_channel(&self, channel_id: &str) {
        self.record(TransportOp::LeaveChannel {
            channel_id: channel_id.to_string(),
        });
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        {
            let mut state = self.lock_state();
            state.ops.push(TransportOp::Send {
                message_id: message.message_id.clone(),
            });
            state.sent.push(message.clone());
        }

        if let Some(reply) = self.auto_reply.clone() {
            for event in self.reply_events(&reply, message) {
                self.registry.dispatch(&event);
            }
        }

        Ok(())
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.record(TransportOp::Subscribe { kind });
        self.registry.subscribe(kind, handler)
    }

    fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.record(TransportOp::Unsubscribe { kind });
        self.registry.unsubscribe(kind, id)
    }
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Probe,
    RegisterAgent {
        channel_id: String,
        agent_id: String,
    },
    FetchHistory {
        agent_id: String,
        session_key: String,
        limit: usize,
    },
}

#[derive(Debug)]
struct BackendState {
    reachable: bool,
    registration: Result<(), BackendError>,
    history: Result<Vec<HistoryMessage>, BackendError>,
    calls: Vec<BackendCall>,
}

/// In-memory REST backend with scripted outcomes.
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates a reachable backend with successful registration and empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState {
                reachable: true,
                registration: Ok(()),
                history: Ok(Vec::new()),
                calls: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn unreachable(self) -> Self {
        self.lock_state().reachable = false;
        self
    }

    #[must_use]
    pub fn with_registration_error(self, message: impl Into<String>) -> Self {
        self.lock_state().registration = Err(BackendError::Other(message.into()));
        self
    }

    #[must_use]
    pub fn with_history(self, messages: Vec<HistoryMessage>) -> Self {
        self.lock_state().history = Ok(messages);
        self
    }

    #[must_use]
    pub fn with_history_error(self, message: impl Into<String>) -> Self {
        self.lock_state().history = Err(BackendError::Unreachable(message.into()));
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock_state().reachable = reachable;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock_state().calls.clone()
    }

    #[must_use]
    pub fn history_fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, BackendCall::FetchHistory { .. }))
            .count()
    }

    fn lock_state(&self) -> MutexGuard<'_, BackendState> {
        lock_unpoisoned(&self.state)
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn probe(&self) -> Result<(), BackendError> {
        let mut state = self.lock_state();
        state.calls.push(BackendCall::Probe);
        if state.reachable {
            Ok(())
        } else {
            Err(BackendError::Unreachable("connection refused".to_string()))
        }
    }

    async fn register_agent(&self, channel_id: &str, agent_id: &str) -> Result<(), BackendError> {
        let mut state = self.lock_state();
        state.calls.push(BackendCall::RegisterAgent {
            channel_id: channel_id.to_string(),
            agent_id: agent_id.to_string(),
        });
        state.registration.clone()
    }

    async fn fetch_history(
        &self,
        agent_id: &str,
        session_key: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        let mut state = self.lock_state();
        state.calls.push(BackendCall::FetchHistory {
            agent_id: agent_id.to_string(),
            session_key: session_key.to_string(),
            limit,
        });
        state
            .history
            .clone()
            .map(|messages| messages.into_iter().take(limit).collect())
    }
}

/// Builds a history entry with deterministic defaults.
#[must_use]
pub fn history_message(
    id: impl Into<String>,
    sender_id: impl Into<String>,
    text: impl Into<String>,
    created_at: i64,
) -> HistoryMessage {
    HistoryMessage {
        id: id.into(),
        sender_id: sender_id.into(),
        sender_name: None,
        text: text.into(),
        created_at,
        source: None,
        thought: None,
        actions: Vec::new(),
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
