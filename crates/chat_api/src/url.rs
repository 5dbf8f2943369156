use url::Url;

use crate::error::ChatApiError;

/// Default base URL for a locally running chat server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Normalize a server base URL.
///
/// Normalization rules:
/// 1) blank input falls back to [`DEFAULT_BASE_URL`]
/// 2) trailing slashes are removed
/// 3) a trailing `/api` segment is removed, since endpoint builders add it back
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    trimmed
        .strip_suffix("/api")
        .unwrap_or(trimmed)
        .to_string()
}

/// `GET` reachability probe endpoint.
pub fn ping_url(base_url: &str) -> Result<Url, ChatApiError> {
    endpoint(base_url, &["api", "server", "ping"])
}

/// `POST` endpoint adding an agent to a channel.
pub fn agent_registration_url(base_url: &str, channel_id: &str) -> Result<Url, ChatApiError> {
    endpoint(
        base_url,
        &["api", "messaging", "central-channels", channel_id, "agents"],
    )
}

/// `GET` endpoint returning up to `limit` prior messages of one session.
pub fn history_url(
    base_url: &str,
    agent_id: &str,
    session_key: &str,
    limit: usize,
) -> Result<Url, ChatApiError> {
    let mut url = endpoint(
        base_url,
        &["api", "agents", agent_id, "rooms", session_key, "messages"],
    )?;
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    Ok(url)
}

/// Live channel endpoint derived from the HTTP base URL (`http` → `ws`, `https` → `wss`).
pub fn websocket_url(base_url: &str, user_id: &str, server_id: &str) -> Result<Url, ChatApiError> {
    let mut url = endpoint(base_url, &["ws"])?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChatApiError::InvalidBaseUrl(format!(
                "unsupported scheme '{other}' in {base_url}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChatApiError::InvalidBaseUrl(format!("cannot derive {scheme} URL from {base_url}")))?;
    url.query_pairs_mut()
        .append_pair("entityId", user_id)
        .append_pair("serverId", server_id);
    Ok(url)
}

fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url, ChatApiError> {
    let normalized = normalize_base_url(base_url);
    let mut url = Url::parse(&normalized)
        .map_err(|error| ChatApiError::InvalidBaseUrl(format!("{normalized}: {error}")))?;
    url.path_segments_mut()
        .map_err(|_| ChatApiError::InvalidBaseUrl(format!("{normalized} cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
