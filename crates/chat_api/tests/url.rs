use chat_api::url::{
    agent_registration_url, history_url, normalize_base_url, ping_url, websocket_url,
    DEFAULT_BASE_URL,
};

#[test]
fn url_normalization_strips_trailing_slash_and_api_suffix() {
    assert_eq!(normalize_base_url("http://host:3000/"), "http://host:3000");
    assert_eq!(normalize_base_url("http://host:3000/api"), "http://host:3000");
    assert_eq!(normalize_base_url("http://host:3000/api/"), "http://host:3000");
    assert_eq!(normalize_base_url("   "), DEFAULT_BASE_URL);
}

#[test]
fn url_builders_append_rest_paths() {
    assert_eq!(
        ping_url("http://host:3000/").expect("ping url").as_str(),
        "http://host:3000/api/server/ping"
    );
    assert_eq!(
        agent_registration_url("http://host:3000", "chan-1")
            .expect("registration url")
            .as_str(),
        "http://host:3000/api/messaging/central-channels/chan-1/agents"
    );
    assert_eq!(
        history_url("http://host:3000/api", "agent-1", "session-1", 50)
            .expect("history url")
            .as_str(),
        "http://host:3000/api/agents/agent-1/rooms/session-1/messages?limit=50"
    );
}

#[test]
fn url_builders_keep_base_path_prefix() {
    assert_eq!(
        ping_url("https://example.com/chat").expect("ping url").as_str(),
        "https://example.com/chat/api/server/ping"
    );
}

#[test]
fn url_websocket_scheme_follows_http_scheme() {
    let plain = websocket_url("http://host:3000", "user-1", "server-1").expect("ws url");
    assert_eq!(
        plain.as_str(),
        "ws://host:3000/ws?entityId=user-1&serverId=server-1"
    );

    let secure = websocket_url("https://example.com/", "user-1", "server-1").expect("wss url");
    assert_eq!(secure.scheme(), "wss");
    assert_eq!(secure.path(), "/ws");
}

#[test]
fn url_rejects_unparseable_and_unsupported_bases() {
    assert!(ping_url("not a url").is_err());
    assert!(websocket_url("ftp://host", "u", "s").is_err());
}
