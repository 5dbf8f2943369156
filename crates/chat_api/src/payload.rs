use serde::{Deserialize, Serialize};

/// Body of the agent registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub agent_id: String,
}

impl RegisterAgentRequest {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

/// One stored message as returned by the history endpoint.
///
/// Servers disagree on where the text lives: some send a flat `text`, others nest it
/// in a `content` object alongside `thought`, `actions` and `source`. Both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "entityId", alias = "authorId")]
    pub sender_id: Option<String>,
    #[serde(default, alias = "name")]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<HistoryContent>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl HistoryEntry {
    /// Flat `text` wins over `content.text`; absent text reads as empty.
    pub fn text(&self) -> &str {
        self.text
            .as_deref()
            .or_else(|| self.content.as_ref().and_then(|content| content.text.as_deref()))
            .unwrap_or_default()
    }

    pub fn thought(&self) -> Option<&str> {
        self.thought
            .as_deref()
            .or_else(|| self.content.as_ref().and_then(|content| content.thought.as_deref()))
    }

    pub fn source(&self) -> Option<&str> {
        self.source
            .as_deref()
            .or_else(|| self.content.as_ref().and_then(|content| content.source.as_deref()))
    }

    pub fn actions(&self) -> &[String] {
        if !self.actions.is_empty() {
            return &self.actions;
        }
        self.content
            .as_ref()
            .map(|content| content.actions.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    List(Vec<HistoryEntry>),
    Envelope(HistoryEnvelope),
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    data: Option<HistoryData>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryData {
    #[serde(default, alias = "memories")]
    messages: Vec<HistoryEntry>,
}

fn default_success() -> bool {
    true
}

/// Outcome of decoding a history response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryBodyResult {
    Messages(Vec<HistoryEntry>),
    /// The envelope carried `"success": false`; holds the error payload as text.
    Unsuccessful(String),
}

/// Decode `{"success":true,"data":{"messages":[..]}}` or a bare array of entries.
pub fn parse_history_body(body: &str) -> Result<HistoryBodyResult, serde_json::Error> {
    match serde_json::from_str::<HistoryBody>(body)? {
        HistoryBody::List(entries) => Ok(HistoryBodyResult::Messages(entries)),
        HistoryBody::Envelope(envelope) if envelope.success => Ok(HistoryBodyResult::Messages(
            envelope.data.unwrap_or_default().messages,
        )),
        HistoryBody::Envelope(envelope) => Ok(HistoryBodyResult::Unsuccessful(
            envelope
                .error
                .map(|error| match error {
                    serde_json::Value::String(message) => message,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "history request unsuccessful".to_owned()),
        )),
    }
}
