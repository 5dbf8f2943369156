#![allow(dead_code)]

use agent_chat::{Conversation, HostOps, SendId, SessionBinding};
use chat_contract::{OutboundMessage, SENTINEL_ID};

pub const AGENT: &str = "agent-1";
pub const USER: &str = "user-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    CheckReachability,
    RegisterAgent { agent_id: String },
    StartConnect { user_id: String, server_id: String },
    Attach(SessionBinding),
    Detach(SessionBinding),
    LoadHistory { agent_id: String, session_key: String },
    Transmit { message_id: String },
    ArmTimeout(SendId),
    CancelTimeout(SendId),
    Stop,
}

#[derive(Default)]
pub struct RecordingHost {
    pub calls: Vec<HostCall>,
    pub transmitted: Vec<OutboundMessage>,
    pub transmit_error: Option<String>,
    pub renders: usize,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_calls(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn count(&self, predicate: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }
}

impl HostOps for RecordingHost {
    fn check_reachability(&mut self) {
        self.calls.push(HostCall::CheckReachability);
    }

    fn register_agent(&mut self, agent_id: &str) {
        self.calls.push(HostCall::RegisterAgent {
            agent_id: agent_id.to_string(),
        });
    }

    fn start_connect(&mut self, user_id: &str, server_id: &str) {
        self.calls.push(HostCall::StartConnect {
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
        });
    }

    fn attach_session(&mut self, binding: &SessionBinding) {
        self.calls.push(HostCall::Attach(binding.clone()));
    }

    fn detach_session(&mut self, binding: &SessionBinding) {
        self.calls.push(HostCall::Detach(binding.clone()));
    }

    fn load_history(&mut self, agent_id: &str, session_key: &str) {
        self.calls.push(HostCall::LoadHistory {
            agent_id: agent_id.to_string(),
            session_key: session_key.to_string(),
        });
    }

    fn transmit(&mut self, message: &OutboundMessage) -> Result<(), String> {
        if let Some(error) = self.transmit_error.clone() {
            return Err(error);
        }
        self.calls.push(HostCall::Transmit {
            message_id: message.message_id.clone(),
        });
        self.transmitted.push(message.clone());
        Ok(())
    }

    fn arm_send_timeout(&mut self, send_id: SendId) {
        self.calls.push(HostCall::ArmTimeout(send_id));
    }

    fn cancel_send_timeout(&mut self, send_id: SendId) {
        self.calls.push(HostCall::CancelTimeout(send_id));
    }

    fn request_render(&mut self) {
        self.renders += 1;
    }

    fn request_stop(&mut self) {
        self.calls.push(HostCall::Stop);
    }
}

/// Conversation that is online, connected and bound to its first session.
pub fn connected(query: Option<&str>) -> (Conversation, RecordingHost) {
    let mut host = RecordingHost::new();
    let mut conversation = Conversation::new(AGENT, SENTINEL_ID);
    conversation.start(USER.to_string(), query.map(str::to_string), &mut host);
    conversation.on_reachability(true, &mut host);
    conversation.on_connected(&mut host);
    (conversation, host)
}
