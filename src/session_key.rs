//! Deterministic mapping from (user, query, agent) to a session room id.

use uuid::Uuid;

/// Fixed namespace so the same input hashes identically on every platform and run.
const SESSION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9d3b_5c07_8e21_4b6a_d0f9_3c15);

/// Trim, collapse internal whitespace and lowercase.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Session key for a conversation view.
///
/// A query that is non-empty after normalization yields a UUID v5 over
/// `(user_identity, normalized query)`; otherwise the key is `"<agent>-<user>"`.
#[must_use]
pub fn derive_session_key(user_identity: &str, query: Option<&str>, agent_identity: &str) -> String {
    let normalized = query.map(normalize_query).unwrap_or_default();
    if normalized.is_empty() {
        return format!("{agent_identity}-{user_identity}");
    }

    let mut name = Vec::with_capacity(user_identity.len() + normalized.len() + 1);
    name.extend_from_slice(user_identity.as_bytes());
    name.push(0);
    name.extend_from_slice(normalized.as_bytes());
    Uuid::new_v5(&SESSION_NAMESPACE, &name).to_string()
}
