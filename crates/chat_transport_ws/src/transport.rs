use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chat_api::url::websocket_url;
use chat_contract::{
    ChannelTransport, ConnectSignal, EventHandler, EventKind, EventRegistry, OutboundMessage,
    SubscriptionId, TransportError,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::frames::{decode_server_frame, ClientFrame, MembershipPayload};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    pub connect_timeout: Duration,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WsTransportConfig {
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// State shared between the transport handle and its socket task.
struct Shared {
    registry: EventRegistry,
    live: watch::Sender<bool>,
    epoch: AtomicU64,
}

impl Shared {
    /// Liveness updates from a superseded socket task are ignored.
    fn set_live(&self, epoch: u64, value: bool) {
        if self.epoch.load(Ordering::Acquire) == epoch {
            self.live.send_replace(value);
        }
    }

    fn handle_text(&self, text: &str) {
        match decode_server_frame(text) {
            Ok(Some(event)) => {
                let delivered = self.registry.dispatch(&event);
                if delivered == 0 {
                    debug!(kind = ?event.kind(), "live event had no subscribers");
                }
            }
            Ok(None) => debug!("ignoring unhandled live event"),
            Err(error) => warn!(%error, "dropping malformed live frame"),
        }
    }
}

#[derive(Default)]
struct LinkState {
    key: Option<(String, String)>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

/// WebSocket live channel. One socket per transport object.
pub struct WsTransport {
    base_url: String,
    config: WsTransportConfig,
    shared: Arc<Shared>,
    link: Mutex<LinkState>,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>, config: WsTransportConfig) -> Self {
        let (live, _) = watch::channel(false);
        Self {
            base_url: base_url.into(),
            config,
            shared: Arc::new(Shared {
                registry: EventRegistry::new(),
                live,
                epoch: AtomicU64::new(0),
            }),
            link: Mutex::new(LinkState::default()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Closes the socket and stops the socket task. Subscriptions are kept.
    pub fn disconnect(&self) {
        let mut link = lock_unpoisoned(&self.link);
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        link.outbound = None;
        link.key = None;
        if let Some(task) = link.task.take() {
            task.abort();
        }
        self.shared.live.send_replace(false);
    }

    fn entity_id(&self) -> Option<String> {
        lock_unpoisoned(&self.link)
            .key
            .as_ref()
            .map(|(user_id, _)| user_id.clone())
    }

    fn push_frame(&self, frame: &ClientFrame<'_>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let text = frame
            .encode()
            .map_err(|error| TransportError::Encode(error.to_string()))?;
        let link = lock_unpoisoned(&self.link);
        let outbound = link.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        outbound
            .send(text)
            .map_err(|_| TransportError::NotConnected)
    }

    fn push_membership(&self, frame: ClientFrame<'_>) {
        if let Err(error) = self.push_frame(&frame) {
            debug!(%error, ?frame, "membership frame dropped");
        }
    }
}

impl ChannelTransport for WsTransport {
    fn connect(&self, user_id: &str, server_id: &str) -> ConnectSignal {
        let mut link = lock_unpoisoned(&self.link);
        let key = (user_id.to_owned(), server_id.to_owned());
        let task_alive = link.task.as_ref().is_some_and(|task| !task.is_finished());
        if link.key.as_ref() == Some(&key) && task_alive {
            return self.shared.live.subscribe();
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(task) = link.task.take() {
            task.abort();
        }
        link.outbound = None;
        link.key = Some(key);
        self.shared.live.send_replace(false);
        let signal = self.shared.live.subscribe();

        let url = match websocket_url(&self.base_url, user_id, server_id) {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, "cannot derive live channel URL");
                self.shared.live.send_replace(false);
                return signal;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("live channel requires a tokio runtime");
            self.shared.live.send_replace(false);
            return signal;
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        link.outbound = Some(outbound);
        link.task = Some(runtime.spawn(run_link(
            Arc::clone(&self.shared),
            epoch,
            url,
            self.config.connect_timeout,
            outbound_rx,
        )));

        signal
    }

    fn is_connected(&self) -> bool {
        *self.shared.live.borrow()
    }

    fn join_room(&self, room_id: &str) {
        let entity_id = self.entity_id();
        self.push_membership(ClientFrame::RoomJoining(MembershipPayload::room(
            room_id,
            entity_id.as_deref(),
        )));
    }

    fn leave_room(&self, room_id: &str) {
        let entity_id = self.entity_id();
        self.push_membership(ClientFrame::RoomLeaving(MembershipPayload::room(
            room_id,
            entity_id.as_deref(),
        )));
    }

    fn join_channel(&self, channel_id: &str, server_id: &str) {
        let entity_id = self.entity_id();
        self.push_membership(ClientFrame::ChannelJoining(MembershipPayload::channel(
            channel_id,
            Some(server_id),
            entity_id.as_deref(),
        )));
    }

    fn leave_channel(&self, channel_id: &str) {
        let entity_id = self.entity_id();
        self.push_membership(ClientFrame::ChannelLeaving(MembershipPayload::channel(
            channel_id,
            None,
            entity_id.as_deref(),
        )));
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.push_frame(&ClientFrame::SendMessage(message))
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.shared.registry.subscribe(kind, handler)
    }

    fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.shared.registry.unsubscribe(kind, id)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_link(
    shared: Arc<Shared>,
    epoch: u64,
    url: Url,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let stream = match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(error)) => {
            warn!(%url, %error, "live channel connect failed");
            shared.set_live(epoch, false);
            return;
        }
        Err(_) => {
            warn!(%url, ?connect_timeout, "live channel connect timed out");
            shared.set_live(epoch, false);
            return;
        }
    };

    let (mut writer, mut reader) = stream.split();
    info!(%url, "live channel connected");
    shared.set_live(epoch, true);

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(error) = writer.send(Message::Text(text)).await {
                        warn!(%error, "live channel write failed");
                        break;
                    }
                }
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.handle_text(text.as_str()),
                Some(Ok(Message::Ping(payload))) => {
                    debug!("received ping ({} bytes)", payload.len());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, "live channel read failed");
                    break;
                }
            },
        }
    }

    info!(%url, "live channel closed");
    shared.set_live(epoch, false);
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
