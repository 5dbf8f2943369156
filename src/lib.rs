//! Session and connection orchestration for real-time agent chat.
//!
//! [`Conversation`] is the synchronous state machine: it tracks server reachability, live
//! channel phase, session membership and the transcript, and asks its [`HostOps`] to do
//! I/O. [`SessionRuntime`] is the tokio driver that implements `HostOps` over a
//! [`chat_contract::ChannelTransport`] and a [`chat_contract::ChatBackend`].
//!
//! Invariant: handlers bound to a superseded session never mutate the conversation. Every
//! live event carries the generation of the binding that subscribed it and is dropped
//! unless that binding is still active.

pub mod app;
pub mod commands;
pub mod config;
pub mod logging;
pub mod model;
pub mod runtime;
pub mod session_key;

pub use crate::app::{
    Conversation, Generation, HostOps, SendId, SendRejection, SessionBinding, HELP_TEXT,
    SEND_TIMEOUT_NOTICE,
};
pub use crate::commands::{parse_slash_command, SlashCommand};
pub use crate::config::{ConfigError, EnvConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_SEND_TIMEOUT};
pub use crate::logging::init_logging;
pub use crate::model::{
    AgentRegistration, Author, ConnectionPhase, Message, Notice, ServerReachability,
};
pub use crate::runtime::{RuntimeConfig, RuntimeEvent, RuntimeHandle, SessionRuntime};
pub use crate::session_key::{derive_session_key, normalize_query};
