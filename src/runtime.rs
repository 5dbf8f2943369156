//! Async driver for [`Conversation`].
//!
//! A single task owns the conversation and applies [`RuntimeEvent`]s in arrival order.
//! Network calls, the connect loop and send timers run as spawned tasks that post their
//! results back onto the same queue, so conversation state is never touched concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chat_contract::{
    backoff_delay, ChannelTransport, ChatBackend, ChatEvent, ConnectSignal, EventHandler,
    EventKind, HistoryMessage, OutboundMessage, SubscriptionId, SENTINEL_ID,
};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::app::{Conversation, Generation, HostOps, SendId, SessionBinding};
use crate::config::{EnvConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_SEND_TIMEOUT};

pub const DEFAULT_CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONNECT_RETRIES: u32 = 5;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Reachability { online: bool },
    Registration { result: Result<(), String> },
    Connected,
    ConnectFailed { reason: String },
    ConnectionLost,
    Channel { generation: Generation, event: ChatEvent },
    HistoryLoaded {
        session_key: String,
        result: Result<Vec<HistoryMessage>, String>,
    },
    SendTimeout { send_id: SendId },
    Submit { input: String },
    SetQuery { query: Option<String> },
    Refresh,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub agent_id: String,
    pub user_id: String,
    pub server_id: String,
    pub query: Option<String>,
    pub send_timeout: Duration,
    pub history_limit: usize,
    pub connect_attempt_timeout: Duration,
    pub max_connect_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RuntimeConfig {
    pub fn new(agent_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            server_id: SENTINEL_ID.to_string(),
            query: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            connect_attempt_timeout: DEFAULT_CONNECT_ATTEMPT_TIMEOUT,
            max_connect_retries: DEFAULT_MAX_CONNECT_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }

    pub fn from_env_config(config: &EnvConfig, user_id: impl Into<String>) -> Self {
        Self::new(config.agent_id.clone(), user_id)
            .with_server_id(config.world_id.clone())
            .with_query(config.query.clone())
            .with_send_timeout(config.send_timeout)
            .with_history_limit(config.history_limit)
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub fn with_connect_attempt_timeout(mut self, connect_attempt_timeout: Duration) -> Self {
        self.connect_attempt_timeout = connect_attempt_timeout;
        self
    }

    pub fn with_max_connect_retries(mut self, max_connect_retries: u32) -> Self {
        self.max_connect_retries = max_connect_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }
}

pub struct SessionRuntime {
    conversation: Arc<Mutex<Conversation>>,
    host: RuntimeHost,
    events_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    user_id: String,
    query: Option<String>,
}

impl SessionRuntime {
    pub fn new(
        config: RuntimeConfig,
        transport: Arc<dyn ChannelTransport>,
        backend: Arc<dyn ChatBackend>,
    ) -> (Self, RuntimeHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (render_tx, render_rx) = watch::channel(0u64);
        let conversation = Arc::new(Mutex::new(Conversation::new(
            config.agent_id.clone(),
            config.server_id.clone(),
        )));

        let handle = RuntimeHandle {
            events_tx: events_tx.clone(),
            conversation: Arc::clone(&conversation),
            render_rx,
        };
        let runtime = Self {
            conversation,
            user_id: config.user_id.clone(),
            query: config.query.clone(),
            host: RuntimeHost {
                config,
                transport,
                backend,
                events_tx,
                render_tx,
                subscriptions: HashMap::new(),
                connect_task: None,
                timers: HashMap::new(),
                stopped: false,
            },
            events_rx,
        };
        (runtime, handle)
    }

    /// Runs until the conversation quits.
    pub async fn run(mut self) {
        {
            let mut conversation = lock_unpoisoned(&self.conversation);
            conversation.start(
                std::mem::take(&mut self.user_id),
                self.query.take(),
                &mut self.host,
            );
        }

        while !self.host.stopped {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            let mut conversation = lock_unpoisoned(&self.conversation);
            apply_runtime_event(&mut conversation, event, &mut self.host);
        }

        self.host.shutdown();
        debug!("session runtime stopped");
    }
}

fn apply_runtime_event(
    conversation: &mut Conversation,
    event: RuntimeEvent,
    host: &mut RuntimeHost,
) {
    match event {
        RuntimeEvent::Reachability { online } => conversation.on_reachability(online, host),
        RuntimeEvent::Registration { result } => conversation.on_registration(result, host),
        RuntimeEvent::Connected => conversation.on_connected(host),
        RuntimeEvent::ConnectFailed { reason } => conversation.on_connect_failed(&reason, host),
        RuntimeEvent::ConnectionLost => conversation.on_connection_lost(host),
        RuntimeEvent::Channel { generation, event } => {
            conversation.on_channel_event(generation, event, host)
        }
        RuntimeEvent::HistoryLoaded {
            session_key,
            result,
        } => conversation.on_history_loaded(&session_key, result, host),
        RuntimeEvent::SendTimeout { send_id } => {
            host.timers.remove(&send_id);
            conversation.on_send_timeout(send_id, host)
        }
        RuntimeEvent::Submit { input } => conversation.on_submit(&input, host),
        RuntimeEvent::SetQuery { query } => conversation.set_query(query, host),
        RuntimeEvent::Refresh => conversation.refresh(host),
        RuntimeEvent::Quit => conversation.on_quit(host),
    }
}

/// Caller side of a running [`SessionRuntime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    events_tx: mpsc::UnboundedSender<RuntimeEvent>,
    conversation: Arc<Mutex<Conversation>>,
    render_rx: watch::Receiver<u64>,
}

impl RuntimeHandle {
    /// Queues an event. Returns `false` once the runtime has stopped.
    pub fn post(&self, event: RuntimeEvent) -> bool {
        self.events_tx.send(event).is_ok()
    }

    pub fn submit(&self, input: impl Into<String>) -> bool {
        self.post(RuntimeEvent::Submit {
            input: input.into(),
        })
    }

    pub fn set_query(&self, query: Option<String>) -> bool {
        self.post(RuntimeEvent::SetQuery { query })
    }

    pub fn refresh(&self) -> bool {
        self.post(RuntimeEvent::Refresh)
    }

    pub fn quit(&self) -> bool {
        self.post(RuntimeEvent::Quit)
    }

    pub fn snapshot(&self) -> Conversation {
        lock_unpoisoned(&self.conversation).clone()
    }

    /// Waits for the next render request. Returns `false` once the runtime has stopped.
    pub async fn changed(&mut self) -> bool {
        self.render_rx.changed().await.is_ok()
    }

    /// Waits until `predicate` holds for the current conversation state.
    pub async fn wait_for(&mut self, predicate: impl Fn(&Conversation) -> bool) -> bool {
        loop {
            if predicate(&*lock_unpoisoned(&self.conversation)) {
                return true;
            }
            if !self.changed().await {
                return predicate(&*lock_unpoisoned(&self.conversation));
            }
        }
    }
}

struct RuntimeHost {
    config: RuntimeConfig,
    transport: Arc<dyn ChannelTransport>,
    backend: Arc<dyn ChatBackend>,
    events_tx: mpsc::UnboundedSender<RuntimeEvent>,
    render_tx: watch::Sender<u64>,
    subscriptions: HashMap<Generation, Vec<(EventKind, SubscriptionId)>>,
    connect_task: Option<JoinHandle<()>>,
    timers: HashMap<SendId, AbortHandle>,
    stopped: bool,
}

impl RuntimeHost {
    fn shutdown(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        for (_, subscriptions) in self.subscriptions.drain() {
            for (kind, id) in subscriptions {
                self.transport.unsubscribe(kind, id);
            }
        }
    }

    fn channel_handler(&self, generation: Generation) -> EventHandler {
        let events_tx = self.events_tx.clone();
        Arc::new(move |event: &ChatEvent| {
            let _ = events_tx.send(RuntimeEvent::Channel {
                generation,
                event: event.clone(),
            });
        })
    }
}

impl HostOps for RuntimeHost {
    fn check_reachability(&mut self) {
        let backend = Arc::clone(&self.backend);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let online = match backend.probe().await {
                Ok(()) => true,
                Err(error) => {
                    debug!(%error, "reachability probe failed");
                    false
                }
            };
            let _ = events_tx.send(RuntimeEvent::Reachability { online });
        });
    }

    fn register_agent(&mut self, agent_id: &str) {
        let backend = Arc::clone(&self.backend);
        let events_tx = self.events_tx.clone();
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            let result = backend
                .register_agent(SENTINEL_ID, &agent_id)
                .await
                .map_err(|error| error.to_string());
            let _ = events_tx.send(RuntimeEvent::Registration { result });
        });
    }

    fn start_connect(&mut self, user_id: &str, server_id: &str) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.connect_task = Some(tokio::spawn(connect_loop(
            Arc::clone(&self.transport),
            self.events_tx.clone(),
            user_id.to_string(),
            server_id.to_string(),
            self.config.clone(),
        )));
    }

    fn attach_session(&mut self, binding: &SessionBinding) {
        let subscriptions = EventKind::ALL
            .iter()
            .map(|kind| {
                let id = self
                    .transport
                    .subscribe(*kind, self.channel_handler(binding.generation));
                (*kind, id)
            })
            .collect();
        self.subscriptions.insert(binding.generation, subscriptions);
        self.transport.join_room(&binding.session_key);
        self.transport.join_channel(SENTINEL_ID, &binding.server_id);
        info!(
            session_key = %binding.session_key,
            generation = binding.generation,
            "joined session"
        );
    }

    fn detach_session(&mut self, binding: &SessionBinding) {
        for (kind, id) in self
            .subscriptions
            .remove(&binding.generation)
            .unwrap_or_default()
        {
            self.transport.unsubscribe(kind, id);
        }
        self.transport.leave_room(&binding.session_key);
        self.transport.leave_channel(SENTINEL_ID);
        debug!(
            session_key = %binding.session_key,
            generation = binding.generation,
            "left session"
        );
    }

    fn load_history(&mut self, agent_id: &str, session_key: &str) {
        let backend = Arc::clone(&self.backend);
        let events_tx = self.events_tx.clone();
        let agent_id = agent_id.to_string();
        let session_key = session_key.to_string();
        let limit = self.config.history_limit;
        tokio::spawn(async move {
            let result = backend
                .fetch_history(&agent_id, &session_key, limit)
                .await
                .map_err(|error| error.to_string());
            let _ = events_tx.send(RuntimeEvent::HistoryLoaded {
                session_key,
                result,
            });
        });
    }

    fn transmit(&mut self, message: &OutboundMessage) -> Result<(), String> {
        self.transport
            .send(message)
            .map_err(|error| error.to_string())
    }

    fn arm_send_timeout(&mut self, send_id: SendId) {
        let events_tx = self.events_tx.clone();
        let send_timeout = self.config.send_timeout;
        let timer = tokio::spawn(async move {
            sleep(send_timeout).await;
            let _ = events_tx.send(RuntimeEvent::SendTimeout { send_id });
        });
        if let Some(previous) = self.timers.insert(send_id, timer.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel_send_timeout(&mut self, send_id: SendId) {
        if let Some(timer) = self.timers.remove(&send_id) {
            timer.abort();
        }
    }

    fn request_render(&mut self) {
        self.render_tx.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn request_stop(&mut self) {
        self.stopped = true;
    }
}

/// Dials with a per-attempt timeout and bounded backoff, then watches the live signal
/// and reports a drop. A failed dial ends its attempt early.
async fn connect_loop(
    transport: Arc<dyn ChannelTransport>,
    events_tx: mpsc::UnboundedSender<RuntimeEvent>,
    user_id: String,
    server_id: String,
    config: RuntimeConfig,
) {
    let mut attempt = 0u32;
    let mut signal = loop {
        let mut signal = transport.connect(&user_id, &server_id);
        match timeout(config.connect_attempt_timeout, first_report(&mut signal)).await {
            Ok(true) => break signal,
            Ok(false) => debug!(attempt, "connect attempt failed"),
            Err(_) => debug!(attempt, "connect attempt timed out"),
        }

        if attempt >= config.max_connect_retries {
            let _ = events_tx.send(RuntimeEvent::ConnectFailed {
                reason: format!("no live channel after {} attempts", attempt + 1),
            });
            return;
        }
        let delay = backoff_delay(config.backoff_base, attempt, config.backoff_max);
        warn!(attempt, ?delay, "live channel not ready; retrying");
        sleep(delay).await;
        attempt += 1;
    };

    if events_tx.send(RuntimeEvent::Connected).is_err() {
        return;
    }
    if signal.wait_for(|live| !*live).await.is_err() {
        debug!("live signal closed");
    }
    let _ = events_tx.send(RuntimeEvent::ConnectionLost);
}

/// `true` once the channel is live; `false` on the first failure report or a closed signal.
async fn first_report(signal: &mut ConnectSignal) -> bool {
    if *signal.borrow_and_update() {
        return true;
    }
    signal.changed().await.is_ok() && *signal.borrow_and_update()
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
