//! Line-oriented rendering of conversation snapshots.

use std::collections::HashSet;

use agent_chat::{
    AgentRegistration, ConnectionPhase, Conversation, Message, ServerReachability,
};

/// Prints each message and notice once, plus a status line whenever it changes.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    printed: HashSet<String>,
    notices_printed: usize,
    last_status: Option<String>,
    session_key: Option<String>,
}

impl TranscriptPrinter {
    pub fn render(&mut self, conversation: &Conversation) -> Vec<String> {
        let mut lines = Vec::new();

        let session_key = conversation.session_key().map(str::to_string);
        if session_key != self.session_key {
            self.printed.clear();
            if let Some(key) = &session_key {
                lines.push(format!("-- session {key} --"));
            }
            self.session_key = session_key;
        }

        let status = status_line(conversation);
        if self.last_status.as_deref() != Some(status.as_str()) {
            lines.push(status.clone());
            self.last_status = Some(status);
        }

        for message in &conversation.messages {
            if self.printed.insert(message.id.clone()) {
                lines.extend(format_message(message));
            }
        }

        for notice in conversation.notices.iter().skip(self.notices_printed) {
            lines.push(format!("* {}", notice.text));
        }
        self.notices_printed = conversation.notices.len();

        lines
    }
}

pub fn status_line(conversation: &Conversation) -> String {
    let server = match conversation.reachability {
        ServerReachability::Checking => "checking",
        ServerReachability::Online => "online",
        ServerReachability::Offline => "offline",
    };
    let channel = match conversation.connection {
        ConnectionPhase::Connecting => "connecting",
        ConnectionPhase::Connected => "connected",
        ConnectionPhase::Error => "error",
    };
    let agent = match conversation.registration {
        AgentRegistration::Checking => "checking",
        AgentRegistration::Ready => "ready",
        AgentRegistration::Error => "error",
    };
    let mut line = format!("[server {server}] [channel {channel}] [agent {agent}]");
    if conversation.agent_thinking {
        line.push_str(" agent is thinking...");
    } else if conversation.input_disabled() {
        line.push_str(" input paused");
    }
    line
}

fn format_message(message: &Message) -> Vec<String> {
    let mut lines = Vec::with_capacity(2);
    if let Some(thought) = message.thought.as_deref().filter(|thought| !thought.is_empty()) {
        lines.push(format!("  ({} thought: {thought})", message.display_name));
    }
    lines.push(format!("{}: {}", message.display_name, message.text));
    lines
}
