use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use chat_contract::{
    BroadcastMessage, ChatEvent, ControlAction, HistoryMessage, OutboundMessage, CLIENT_SOURCE,
    SENTINEL_ID,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commands::{parse_slash_command, SlashCommand};
use crate::model::{
    AgentRegistration, Author, ConnectionPhase, Message, Notice, ServerReachability,
};
use crate::session_key::derive_session_key;

/// Incremented every time handlers are bound to a session; events carry the value that
/// was current when their handler was registered.
pub type Generation = u64;
pub type SendId = u64;

/// Handlers and membership currently bound to one session room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub generation: Generation,
    pub session_key: String,
    pub server_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendRejection {
    EmptyText,
    NoIdentity,
    NoSession,
    InputDisabled,
    NotReady,
    Transmit(String),
}

pub trait HostOps {
    fn check_reachability(&mut self);
    fn register_agent(&mut self, agent_id: &str);
    fn start_connect(&mut self, user_id: &str, server_id: &str);
    /// Subscribe generation-tagged handlers, then join the session room and the sentinel
    /// channel.
    fn attach_session(&mut self, binding: &SessionBinding);
    /// Unsubscribe the binding's handlers, then leave its room and channel.
    fn detach_session(&mut self, binding: &SessionBinding);
    fn load_history(&mut self, agent_id: &str, session_key: &str);
    fn transmit(&mut self, message: &OutboundMessage) -> Result<(), String>;
    fn arm_send_timeout(&mut self, send_id: SendId);
    fn cancel_send_timeout(&mut self, send_id: SendId);
    fn request_render(&mut self);
    fn request_stop(&mut self);
}

pub const HELP_TEXT: &str = "Commands: /help, /clear, /retry, /session <query>, /quit";
pub const LOCAL_DISPLAY_NAME: &str = "You";
pub const SEND_TIMEOUT_NOTICE: &str = "The agent did not respond in time. You can send again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub reachability: ServerReachability,
    pub connection: ConnectionPhase,
    pub registration: AgentRegistration,
    pub agent_thinking: bool,
    pub messages: Vec<Message>,
    pub notices: Vec<Notice>,
    pub should_exit: bool,
    identity: Option<String>,
    agent_id: String,
    server_id: String,
    query: Option<String>,
    session_key: Option<String>,
    generation: Generation,
    active: Option<SessionBinding>,
    connect_in_flight: bool,
    history_requested_for: Option<String>,
    send_lock: bool,
    control_lock: bool,
    pending_send: Option<SendId>,
    next_send_id: SendId,
    message_ids: HashSet<String>,
}

impl Conversation {
    pub fn new(agent_id: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            reachability: ServerReachability::Checking,
            connection: ConnectionPhase::Connecting,
            registration: AgentRegistration::Checking,
            agent_thinking: false,
            messages: Vec::new(),
            notices: Vec::new(),
            should_exit: false,
            identity: None,
            agent_id: agent_id.into(),
            server_id: server_id.into(),
            query: None,
            session_key: None,
            generation: 0,
            active: None,
            connect_in_flight: false,
            history_requested_for: None,
            send_lock: false,
            control_lock: false,
            pending_send: None,
            next_send_id: 1,
            message_ids: HashSet::new(),
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn active_binding(&self) -> Option<&SessionBinding> {
        self.active.as_ref()
    }

    pub fn pending_send(&self) -> Option<SendId> {
        self.pending_send
    }

    pub fn send_lock(&self) -> bool {
        self.send_lock
    }

    pub fn control_lock(&self) -> bool {
        self.control_lock
    }

    pub fn input_disabled(&self) -> bool {
        self.send_lock || self.control_lock
    }

    /// Live operation requires a reachable server and a connected channel.
    pub fn is_ready(&self) -> bool {
        self.reachability == ServerReachability::Online
            && self.connection == ConnectionPhase::Connected
    }

    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.notices.push(Notice::new(text));
    }

    pub fn start(&mut self, identity: String, query: Option<String>, host: &mut dyn HostOps) {
        self.session_key = Some(derive_session_key(
            &identity,
            query.as_deref(),
            &self.agent_id,
        ));
        self.identity = Some(identity);
        self.query = query;
        self.reachability = ServerReachability::Checking;
        host.check_reachability();
        host.request_render();
    }

    pub fn on_reachability(&mut self, online: bool, host: &mut dyn HostOps) {
        if !online {
            if self.reachability != ServerReachability::Offline {
                warn!("chat server unreachable");
                self.push_notice("Server is unreachable. Use /retry to check again.");
            }
            self.reachability = ServerReachability::Offline;
            host.request_render();
            return;
        }

        if self.reachability != ServerReachability::Online {
            info!("chat server online");
        }
        self.reachability = ServerReachability::Online;

        if self.connection != ConnectionPhase::Connected && !self.connect_in_flight {
            self.begin_connect(host);
        }
        host.request_render();
    }

    pub fn on_registration(&mut self, result: Result<(), String>, host: &mut dyn HostOps) {
        match result {
            Ok(()) => {
                debug!(agent_id = %self.agent_id, "agent registered");
                self.registration = AgentRegistration::Ready;
            }
            Err(error) => {
                warn!(agent_id = %self.agent_id, %error, "agent registration failed");
                self.registration = AgentRegistration::Error;
            }
        }
        host.request_render();
    }

    pub fn on_connected(&mut self, host: &mut dyn HostOps) {
        if self.should_exit {
            return;
        }
        self.connect_in_flight = false;
        if self.connection != ConnectionPhase::Connected {
            info!("live channel ready");
        }
        self.connection = ConnectionPhase::Connected;
        self.bind_session(host);
        host.request_render();
    }

    pub fn on_connect_failed(&mut self, reason: &str, host: &mut dyn HostOps) {
        if self.should_exit {
            return;
        }
        warn!(%reason, "live channel connect failed");
        self.connect_in_flight = false;
        self.connection = ConnectionPhase::Error;
        self.push_notice(format!("Could not connect: {reason}. Use /retry to try again."));
        host.request_render();
    }

    /// The channel dropped after being live: tear membership down and dial again.
    pub fn on_connection_lost(&mut self, host: &mut dyn HostOps) {
        if self.should_exit || self.connection != ConnectionPhase::Connected {
            return;
        }
        warn!("live channel lost; reconnecting");
        self.unbind_session(host);
        self.begin_connect(host);
        host.request_render();
    }

    /// Manual refresh: probe again. A successful probe redials after an error phase.
    pub fn refresh(&mut self, host: &mut dyn HostOps) {
        self.reachability = ServerReachability::Checking;
        host.check_reachability();
        host.request_render();
    }

    /// Switches the conversation to the session derived from `query`.
    pub fn set_query(&mut self, query: Option<String>, host: &mut dyn HostOps) {
        let query = query.filter(|query| !query.trim().is_empty());
        let Some(identity) = self.identity.clone() else {
            self.query = query;
            return;
        };

        let next_key = derive_session_key(&identity, query.as_deref(), &self.agent_id);
        self.query = query;
        if self.session_key.as_deref() == Some(next_key.as_str()) {
            host.request_render();
            return;
        }

        info!(session_key = %next_key, "switching session");
        self.unbind_session(host);
        self.reset_session_state(host);
        self.session_key = Some(next_key);
        if self.connection == ConnectionPhase::Connected {
            self.bind_session(host);
        }
        host.request_render();
    }

    pub fn on_history_loaded(
        &mut self,
        session_key: &str,
        result: Result<Vec<HistoryMessage>, String>,
        host: &mut dyn HostOps,
    ) {
        if self.session_key.as_deref() != Some(session_key) {
            debug!(%session_key, "ignoring history for inactive session");
            return;
        }

        let history = match result {
            Ok(history) => history,
            Err(error) => {
                warn!(%session_key, %error, "history load failed");
                self.push_notice("Earlier messages could not be loaded.");
                host.request_render();
                return;
            }
        };

        let mut ids = HashSet::with_capacity(history.len());
        let mut messages = Vec::with_capacity(history.len() + self.messages.len());
        for entry in history {
            if !ids.insert(entry.id.clone()) {
                continue;
            }
            let author = self.classify(&entry.sender_id, false);
            messages.push(Message::from_history(entry, author, session_key));
        }

        let arrived_during_fetch = std::mem::take(&mut self.messages)
            .into_iter()
            .filter(|message| !ids.contains(&message.id))
            .collect::<Vec<_>>();
        for message in arrived_during_fetch {
            ids.insert(message.id.clone());
            messages.push(message);
        }

        debug!(%session_key, count = messages.len(), "history applied");
        self.message_ids.extend(ids);
        self.messages = messages;
        host.request_render();
    }

    pub fn on_channel_event(
        &mut self,
        generation: Generation,
        event: ChatEvent,
        host: &mut dyn HostOps,
    ) {
        if self.should_exit
            || self.active.as_ref().map(|binding| binding.generation) != Some(generation)
        {
            debug!(generation, "dropping event from stale session");
            return;
        }

        match event {
            ChatEvent::MessageBroadcast(broadcast) => self.apply_broadcast(broadcast, host),
            ChatEvent::Control(control) => {
                match control.parsed_action() {
                    ControlAction::DisableInput => self.control_lock = true,
                    ControlAction::EnableInput => self.control_lock = false,
                    ControlAction::Other(action) => {
                        debug!(%action, "ignoring control action");
                        return;
                    }
                }
                self.release_send_lock(host);
                // A thinking agent always has a send timeout armed.
                if self.agent_thinking {
                    self.arm_pending_timeout(host);
                }
            }
            ChatEvent::Complete(_) => {
                self.agent_thinking = false;
                self.control_lock = false;
                self.release_send_lock(host);
            }
        }
        host.request_render();
    }

    pub fn on_send_timeout(&mut self, send_id: SendId, host: &mut dyn HostOps) {
        if self.pending_send != Some(send_id) {
            debug!(send_id, "ignoring stale send timeout");
            return;
        }

        warn!(send_id, "no terminal event before send timeout");
        host.cancel_send_timeout(send_id);
        self.pending_send = None;
        self.agent_thinking = false;
        self.send_lock = false;
        self.control_lock = false;
        self.push_notice(SEND_TIMEOUT_NOTICE);
        host.request_render();
    }

    pub fn on_submit(&mut self, input: &str, host: &mut dyn HostOps) {
        let submitted = input.trim();
        if submitted.is_empty() {
            host.request_render();
            return;
        }

        if let Some(command) = parse_slash_command(submitted) {
            match command {
                SlashCommand::Help => self.push_notice(HELP_TEXT),
                SlashCommand::Clear => {
                    self.messages.clear();
                    self.push_notice("Transcript cleared");
                }
                SlashCommand::Retry => {
                    self.refresh(host);
                    return;
                }
                SlashCommand::Session(query) => {
                    self.set_query(query, host);
                    return;
                }
                SlashCommand::Quit => {
                    self.on_quit(host);
                    return;
                }
                SlashCommand::Unknown(command) => {
                    self.push_notice(format!("Unknown command: {command}"));
                }
            }
            host.request_render();
            return;
        }

        if let Err(SendRejection::Transmit(error)) = self.send_message(submitted, host) {
            self.push_notice(format!("Message not sent: {error}"));
        }
        host.request_render();
    }

    pub fn send_message(
        &mut self,
        text: &str,
        host: &mut dyn HostOps,
    ) -> Result<SendId, SendRejection> {
        let text = text.trim();
        let rejection = if text.is_empty() {
            Some(SendRejection::EmptyText)
        } else if self.identity.is_none() {
            Some(SendRejection::NoIdentity)
        } else if self.session_key.is_none() {
            Some(SendRejection::NoSession)
        } else if self.input_disabled() {
            Some(SendRejection::InputDisabled)
        } else if !self.is_ready() || self.active.is_none() {
            Some(SendRejection::NotReady)
        } else {
            None
        };
        if let Some(rejection) = rejection {
            debug!(?rejection, "send rejected");
            return Err(rejection);
        }

        let (Some(identity), Some(session_key)) = (self.identity.clone(), self.session_key.clone())
        else {
            return Err(SendRejection::NoSession);
        };
        let outbound = OutboundMessage {
            message_id: Uuid::new_v4().to_string(),
            sender_id: identity,
            sender_name: LOCAL_DISPLAY_NAME.to_string(),
            text: text.to_string(),
            channel_id: SENTINEL_ID.to_string(),
            room_id: session_key,
            server_id: self.server_id.clone(),
            source: CLIENT_SOURCE.to_string(),
            created_at: now_millis(),
        };

        if let Some(previous) = self.pending_send.take() {
            host.cancel_send_timeout(previous);
        }
        if let Err(error) = host.transmit(&outbound) {
            warn!(%error, message_id = %outbound.message_id, "transmit failed");
            return Err(SendRejection::Transmit(error));
        }

        self.message_ids.insert(outbound.message_id.clone());
        self.messages.push(Message::from_outbound(&outbound));
        self.agent_thinking = true;
        self.send_lock = true;

        let send_id = self.arm_pending_timeout(host);
        debug!(send_id, message_id = %outbound.message_id, "message sent");
        Ok(send_id)
    }

    pub fn on_quit(&mut self, host: &mut dyn HostOps) {
        self.unbind_session(host);
        if let Some(send_id) = self.pending_send.take() {
            host.cancel_send_timeout(send_id);
        }
        self.should_exit = true;
        host.request_stop();
        host.request_render();
    }

    fn begin_connect(&mut self, host: &mut dyn HostOps) {
        let Some(identity) = self.identity.clone() else {
            return;
        };
        self.connection = ConnectionPhase::Connecting;
        self.connect_in_flight = true;
        self.registration = AgentRegistration::Checking;
        host.register_agent(&self.agent_id);
        host.start_connect(&identity, &self.server_id);
    }

    fn bind_session(&mut self, host: &mut dyn HostOps) {
        if self.active.is_some() {
            return;
        }
        let Some(session_key) = self.session_key.clone() else {
            return;
        };

        self.generation += 1;
        let binding = SessionBinding {
            generation: self.generation,
            session_key: session_key.clone(),
            server_id: self.server_id.clone(),
        };
        host.attach_session(&binding);
        self.active = Some(binding);

        if self.history_requested_for.as_deref() != Some(session_key.as_str()) {
            self.history_requested_for = Some(session_key.clone());
            host.load_history(&self.agent_id, &session_key);
        }
    }

    fn unbind_session(&mut self, host: &mut dyn HostOps) {
        if let Some(binding) = self.active.take() {
            host.detach_session(&binding);
        }
    }

    fn reset_session_state(&mut self, host: &mut dyn HostOps) {
        self.messages.clear();
        self.message_ids.clear();
        self.agent_thinking = false;
        self.control_lock = false;
        self.release_send_lock(host);
    }

    fn arm_pending_timeout(&mut self, host: &mut dyn HostOps) -> SendId {
        let send_id = self.next_send_id;
        self.next_send_id += 1;
        self.pending_send = Some(send_id);
        host.arm_send_timeout(send_id);
        send_id
    }

    fn release_send_lock(&mut self, host: &mut dyn HostOps) {
        if let Some(send_id) = self.pending_send.take() {
            host.cancel_send_timeout(send_id);
        }
        self.send_lock = false;
    }

    fn apply_broadcast(&mut self, broadcast: BroadcastMessage, host: &mut dyn HostOps) {
        if self.identity.as_deref() == Some(broadcast.sender_id.as_str()) {
            debug!("suppressing self echo");
            return;
        }

        let id = broadcast
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.message_ids.contains(&id) {
            debug!(%id, "dropping duplicate message");
            return;
        }

        let author = self.classify(&broadcast.sender_id, broadcast.is_on_sentinel_channel());
        if author == Author::Agent {
            self.agent_thinking = false;
            self.release_send_lock(host);
        }

        let Some(session_key) = self.session_key.clone() else {
            return;
        };
        self.message_ids.insert(id.clone());
        self.messages.push(Message::from_broadcast(
            broadcast,
            id,
            author,
            &session_key,
            now_millis(),
        ));
    }

    fn classify(&self, sender_id: &str, on_sentinel: bool) -> Author {
        if self.identity.as_deref() == Some(sender_id) {
            Author::Local
        } else if sender_id == self.agent_id || on_sentinel {
            Author::Agent
        } else {
            Author::Participant
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NullHost {
        cancelled: Vec<SendId>,
    }

    impl HostOps for NullHost {
        fn check_reachability(&mut self) {}
        fn register_agent(&mut self, _agent_id: &str) {}
        fn start_connect(&mut self, _user_id: &str, _server_id: &str) {}
        fn attach_session(&mut self, _binding: &SessionBinding) {}
        fn detach_session(&mut self, _binding: &SessionBinding) {}
        fn load_history(&mut self, _agent_id: &str, _session_key: &str) {}
        fn transmit(&mut self, _message: &OutboundMessage) -> Result<(), String> {
            Ok(())
        }
        fn arm_send_timeout(&mut self, _send_id: SendId) {}
        fn cancel_send_timeout(&mut self, send_id: SendId) {
            self.cancelled.push(send_id);
        }
        fn request_render(&mut self) {}
        fn request_stop(&mut self) {}
    }

    fn ready_conversation(host: &mut NullHost) -> Conversation {
        let mut conversation = Conversation::new("agent", SENTINEL_ID);
        conversation.start("user".to_string(), None, host);
        conversation.on_reachability(true, host);
        conversation.on_connected(host);
        conversation
    }

    #[test]
    fn classify_prefers_local_then_agent_then_participant() {
        let mut host = NullHost::default();
        let conversation = ready_conversation(&mut host);
        assert_eq!(conversation.classify("user", true), Author::Local);
        assert_eq!(conversation.classify("agent", false), Author::Agent);
        assert_eq!(conversation.classify("someone", true), Author::Agent);
        assert_eq!(conversation.classify("someone", false), Author::Participant);
    }

    #[test]
    fn broadcast_without_id_gets_generated_one() {
        let mut host = NullHost::default();
        let mut conversation = ready_conversation(&mut host);
        let generation = conversation.generation();

        conversation.on_channel_event(
            generation,
            ChatEvent::MessageBroadcast(BroadcastMessage::new("other", "hello")),
            &mut host,
        );

        assert_eq!(conversation.messages.len(), 1);
        assert!(!conversation.messages[0].id.is_empty());
        assert_eq!(conversation.messages[0].display_name, "User");
    }

    #[test]
    fn control_events_replace_the_send_timer_while_the_agent_is_thinking() {
        let mut host = NullHost::default();
        let mut conversation = ready_conversation(&mut host);
        let generation = conversation.generation();
        let send_id = conversation
            .send_message("hi", &mut host)
            .expect("send should be accepted");

        conversation.on_channel_event(
            generation,
            ChatEvent::Control(chat_contract::ControlMessage::disable_input()),
            &mut host,
        );
        assert!(!conversation.send_lock());
        assert!(conversation.control_lock());
        assert!(conversation.input_disabled());
        assert_eq!(host.cancelled, vec![send_id]);
        let backstop = conversation.pending_send.expect("backstop timer armed");
        assert_ne!(backstop, send_id);

        conversation.on_send_timeout(backstop, &mut host);
        assert!(!conversation.agent_thinking);
        assert!(!conversation.input_disabled());
        assert_eq!(conversation.pending_send, None);
        assert_eq!(host.cancelled, vec![send_id, backstop]);
    }

    #[test]
    fn enable_input_after_a_reply_arms_nothing() {
        let mut host = NullHost::default();
        let mut conversation = ready_conversation(&mut host);
        let generation = conversation.generation();
        conversation.on_channel_event(
            generation,
            ChatEvent::Control(chat_contract::ControlMessage::disable_input()),
            &mut host,
        );
        conversation.on_channel_event(
            generation,
            ChatEvent::Control(chat_contract::ControlMessage::enable_input()),
            &mut host,
        );

        assert!(!conversation.input_disabled());
        assert_eq!(conversation.pending_send, None);
        assert!(host.cancelled.is_empty());
    }

    #[test]
    fn now_millis_is_positive() {
        assert!(now_millis() > 0);
    }
}
