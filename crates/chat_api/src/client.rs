use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};

use crate::config::ChatApiConfig;
use crate::error::{is_already_registered, parse_error_message, ChatApiError};
use crate::headers::build_headers;
use crate::payload::{parse_history_body, HistoryBodyResult, HistoryEntry, RegisterAgentRequest};
use crate::retry::{is_retryable_http_error, retry_delay_ms, MAX_RETRIES};
use crate::url::{agent_registration_url, history_url, normalize_base_url, ping_url};

#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
}

/// Result of a successful registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    AlreadyRegistered,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ChatApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn base_url(&self) -> String {
        normalize_base_url(&self.config.base_url)
    }

    pub fn build_headers(&self) -> Result<HeaderMap, ChatApiError> {
        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config) {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ChatApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_ping_request(&self) -> Result<reqwest::RequestBuilder, ChatApiError> {
        let url = ping_url(&self.config.base_url)?;
        Ok(self.http.get(url).headers(self.build_headers()?))
    }

    pub fn build_registration_request(
        &self,
        channel_id: &str,
        agent_id: &str,
    ) -> Result<reqwest::RequestBuilder, ChatApiError> {
        let url = agent_registration_url(&self.config.base_url, channel_id)?;
        Ok(self
            .http
            .post(url)
            .headers(self.build_headers()?)
            .json(&RegisterAgentRequest::new(agent_id)))
    }

    pub fn build_history_request(
        &self,
        agent_id: &str,
        session_key: &str,
        limit: usize,
    ) -> Result<reqwest::RequestBuilder, ChatApiError> {
        let url = history_url(&self.config.base_url, agent_id, session_key, limit)?;
        Ok(self.http.get(url).headers(self.build_headers()?))
    }

    /// Single-attempt reachability probe. Any 2xx answer means the server is up.
    pub async fn ping(&self) -> Result<(), ChatApiError> {
        let response = self.build_ping_request()?.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChatApiError::Status(status, parse_error_message(status, &body)))
    }

    /// Adds `agent_id` to `channel_id`. Membership that already exists is not an error.
    pub async fn register_agent(
        &self,
        channel_id: &str,
        agent_id: &str,
    ) -> Result<RegistrationOutcome, ChatApiError> {
        let response = self
            .build_registration_request(channel_id, agent_id)?
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(RegistrationOutcome::Registered);
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_error_message(status, &body);
        if is_already_registered(status, &message) {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }
        Err(ChatApiError::Status(status, message))
    }

    /// Fetches prior messages of a session, retrying transient failures with backoff.
    pub async fn fetch_history(
        &self,
        agent_id: &str,
        session_key: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, ChatApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            let response = self
                .build_history_request(agent_id, session_key, limit)?
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_else(|_| {
                        status
                            .canonical_reason()
                            .unwrap_or("request failed")
                            .to_string()
                    });

                    if status.is_success() {
                        return match parse_history_body(&body)? {
                            HistoryBodyResult::Messages(entries) => Ok(entries),
                            HistoryBodyResult::Unsuccessful(message) => {
                                Err(ChatApiError::Rejected(message))
                            }
                        };
                    }

                    last_status = Some(status);
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());
                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &body) {
                        tokio::time::sleep(retry_delay_ms(attempt)).await;
                        continue;
                    }
                    return Err(ChatApiError::Status(status, message));
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < MAX_RETRIES && is_transient(&error) {
                        tokio::time::sleep(retry_delay_ms(attempt)).await;
                        continue;
                    }
                    return Err(ChatApiError::RetryExhausted {
                        status: last_status,
                        last_error,
                    });
                }
            }
        }

        Err(ChatApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout()
        || error.is_connect()
        || error.is_request()
        || is_retryable_http_error(0, &error.to_string())
}
