//! WebSocket implementation of the live channel plus the REST-backed [`ChatBackend`].
//!
//! [`WsTransport`] owns one socket per transport object and fans decoded server frames
//! out through an [`chat_contract::EventRegistry`]. [`RestBackend`] adapts
//! [`chat_api::ChatApiClient`] to the provider-neutral backend trait.
//!
//! [`ChatBackend`]: chat_contract::ChatBackend

mod backend;
pub mod frames;
mod transport;

pub use backend::RestBackend;
pub use frames::{decode_server_frame, ClientFrame, MembershipPayload};
pub use transport::{WsTransport, WsTransportConfig, DEFAULT_CONNECT_TIMEOUT};

/// Provider id selecting the WebSocket + REST stack.
pub const LIVE_PROVIDER_ID: &str = "live";
