//! Request/response client primitives for the chat server's REST surface.
//!
//! This crate owns URL building, header construction, payload parsing and retry policy
//! for the reachability probe, agent registration and history endpoints. It contains no
//! live-channel code and no orchestration state.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod url;

pub use client::{ChatApiClient, RegistrationOutcome};
pub use config::ChatApiConfig;
pub use error::ChatApiError;
pub use payload::{HistoryEntry, RegisterAgentRequest};
pub use url::normalize_base_url;

pub use reqwest::StatusCode;
