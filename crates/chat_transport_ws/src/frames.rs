//! JSON text frames exchanged over the live channel.
//!
//! Client frames are `{"type": "<snake_case>", "payload": {..}}`. Server frames are
//! `{"event": "<camelCase>", "data": {..}}`; only the three [`EventKind`]s are decoded.

use chat_contract::{
    BroadcastMessage, ChatEvent, CompletionSignal, ControlMessage, EventKind, OutboundMessage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame<'a> {
    RoomJoining(MembershipPayload),
    RoomLeaving(MembershipPayload),
    ChannelJoining(MembershipPayload),
    ChannelLeaving(MembershipPayload),
    SendMessage(&'a OutboundMessage),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

impl MembershipPayload {
    pub fn room(room_id: &str, entity_id: Option<&str>) -> Self {
        Self {
            room_id: Some(room_id.to_owned()),
            entity_id: entity_id.map(str::to_owned),
            ..Self::default()
        }
    }

    pub fn channel(channel_id: &str, server_id: Option<&str>, entity_id: Option<&str>) -> Self {
        Self {
            channel_id: Some(channel_id.to_owned()),
            server_id: server_id.map(str::to_owned),
            entity_id: entity_id.map(str::to_owned),
            ..Self::default()
        }
    }
}

impl ClientFrame<'_> {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Deserialize)]
struct ServerFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode one server text frame.
///
/// Returns `Ok(None)` for well-formed frames carrying an event this client does not
/// handle, and `Err` for malformed JSON or a known event with an invalid body.
pub fn decode_server_frame(text: &str) -> Result<Option<ChatEvent>, serde_json::Error> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    let Some(kind) = EventKind::from_wire_name(&frame.event) else {
        return Ok(None);
    };

    let event = match kind {
        EventKind::MessageBroadcast => {
            ChatEvent::MessageBroadcast(serde_json::from_value::<BroadcastMessage>(frame.data)?)
        }
        EventKind::ControlMessage => {
            ChatEvent::Control(serde_json::from_value::<ControlMessage>(frame.data)?)
        }
        EventKind::MessageComplete => {
            let signal = if frame.data.is_null() {
                CompletionSignal::default()
            } else {
                serde_json::from_value::<CompletionSignal>(frame.data)?
            };
            ChatEvent::Complete(signal)
        }
    };
    Ok(Some(event))
}
