use async_trait::async_trait;
use chat_api::{ChatApiClient, ChatApiConfig, ChatApiError, HistoryEntry, RegistrationOutcome};
use chat_contract::{BackendError, ChatBackend, HistoryMessage};
use tracing::debug;

/// [`ChatBackend`] over the chat server's REST endpoints.
#[derive(Debug)]
pub struct RestBackend {
    client: ChatApiClient,
}

impl RestBackend {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        Ok(Self {
            client: ChatApiClient::new(config)?,
        })
    }

    pub fn client(&self) -> &ChatApiClient {
        &self.client
    }
}

#[async_trait]
impl ChatBackend for RestBackend {
    async fn probe(&self) -> Result<(), BackendError> {
        self.client.ping().await.map_err(backend_error)
    }

    async fn register_agent(&self, channel_id: &str, agent_id: &str) -> Result<(), BackendError> {
        let outcome = self
            .client
            .register_agent(channel_id, agent_id)
            .await
            .map_err(backend_error)?;
        if outcome == RegistrationOutcome::AlreadyRegistered {
            debug!(channel_id, agent_id, "agent already registered");
        }
        Ok(())
    }

    async fn fetch_history(
        &self,
        agent_id: &str,
        session_key: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, BackendError> {
        let entries = self
            .client
            .fetch_history(agent_id, session_key, limit)
            .await
            .map_err(backend_error)?;
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| history_message(session_key, index, entry))
            .collect())
    }
}

/// Entries without an id get one derived from their position in the session.
fn history_message(session_key: &str, index: usize, entry: HistoryEntry) -> HistoryMessage {
    let text = entry.text().to_owned();
    let thought = entry.thought().map(str::to_owned);
    let source = entry.source().map(str::to_owned);
    let actions = entry.actions().to_vec();
    HistoryMessage {
        id: entry
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{session_key}-history-{index}")),
        sender_id: entry.sender_id.unwrap_or_default(),
        sender_name: entry.sender_name,
        text,
        created_at: entry.created_at.unwrap_or_default(),
        source,
        thought,
        actions,
    }
}

fn backend_error(error: ChatApiError) -> BackendError {
    match error {
        ChatApiError::Request(error) if error.is_connect() || error.is_timeout() => {
            BackendError::Unreachable(error.to_string())
        }
        ChatApiError::Status(status, message) => BackendError::Rejected {
            status: status.as_u16(),
            message,
        },
        ChatApiError::Serde(error) => BackendError::Decode(error.to_string()),
        error @ ChatApiError::RetryExhausted { .. } => BackendError::Unreachable(error.to_string()),
        other => BackendError::Other(other.to_string()),
    }
}
