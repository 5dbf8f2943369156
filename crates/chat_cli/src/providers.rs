use std::sync::Arc;

use chat_api::ChatApiConfig;
use chat_contract::{ChannelTransport, ChatBackend};
use chat_contract_mock::{MockBackend, MockTransport, MOCK_PROVIDER_ID};
use chat_transport_ws::{RestBackend, WsTransport, WsTransportConfig, LIVE_PROVIDER_ID};

/// Transport and backend pair the runtime is started with.
pub struct Provider {
    pub id: &'static str,
    pub transport: Arc<dyn ChannelTransport>,
    pub backend: Arc<dyn ChatBackend>,
}

pub struct ProviderOptions<'a> {
    pub agent_id: &'a str,
    pub server_url: &'a str,
}

pub fn provider_for_id(provider_id: &str, options: &ProviderOptions<'_>) -> Result<Provider, String> {
    match provider_id {
        LIVE_PROVIDER_ID => {
            let backend = RestBackend::new(ChatApiConfig::new(options.server_url))
                .map_err(|error| format!("Invalid chat server configuration: {error}"))?;
            Ok(Provider {
                id: LIVE_PROVIDER_ID,
                transport: Arc::new(WsTransport::new(
                    options.server_url,
                    WsTransportConfig::default(),
                )),
                backend: Arc::new(backend),
            })
        }
        MOCK_PROVIDER_ID => Ok(Provider {
            id: MOCK_PROVIDER_ID,
            transport: Arc::new(MockTransport::new().with_auto_reply(options.agent_id, "echo: ")),
            backend: Arc::new(MockBackend::new()),
        }),
        unknown => Err(format!(
            "Unsupported provider '{unknown}'. Available providers: {LIVE_PROVIDER_ID}, {MOCK_PROVIDER_ID}"
        )),
    }
}
