/// Hub connection
///
/// Owns one logical connection to a hub endpoint. A single driver task owns
/// the transport link: it writes queued frames, dispatches inbound messages,
/// sends keep-alive pings, watches the server timeout and runs the automatic
/// reconnect policy. Invocations are correlated with their completions by
/// invocation id.
use super::error::HubError;
use super::options::HubOptions;
use super::protocol::{self, HandshakeRequest, HubMessage};
use super::transport::{HubConnector, TransportLink};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Queued outbound frames
const OUTBOUND_CAPACITY: usize = 256;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Handler for a server-to-client invocation
pub type InvocationHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

type ReconnectedHook = Arc<dyn Fn() + Send + Sync>;
type PendingReply = oneshot::Sender<Result<Value, HubError>>;

/// Outbound frame tagged with the link generation it was queued for
type OutboundFrame = (u64, String);

/// Why a link stopped being usable
#[derive(Debug)]
enum LinkEnd {
    Stopped,
    Lost(String),
    Closed {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

enum Reconnect {
    Linked(TransportLink, Vec<HubMessage>),
    Stopped,
    GaveUp,
}

/// State shared between the connection handle and its driver task
struct Shared {
    options: HubOptions,
    connector: Arc<dyn HubConnector>,
    state: watch::Sender<ConnectionState>,
    outbound: RwLock<Option<mpsc::Sender<OutboundFrame>>>,
    /// invocation_id -> reply channel
    pending: DashMap<String, PendingReply>,
    /// lowercase target -> handlers
    handlers: DashMap<String, Vec<InvocationHandler>>,
    reconnected: StdMutex<Vec<ReconnectedHook>>,
    next_invocation_id: AtomicU64,
    /// Bumped whenever a link ends; frames and replies never cross links
    link_generation: AtomicU64,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

/// Client side of a hub connection
pub struct HubConnection {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl HubConnection {
    /// Create a disconnected connection
    pub fn new(options: HubOptions, connector: Arc<dyn HubConnector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                options,
                connector,
                state,
                outbound: RwLock::new(None),
                pending: DashMap::new(),
                handlers: DashMap::new(),
                reconnected: StdMutex::new(Vec::new()),
                next_invocation_id: AtomicU64::new(0),
                link_generation: AtomicU64::new(0),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Register a handler for invocations of `target` (case-insensitive)
    pub fn on<F>(&self, target: &str, handler: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .entry(target.to_lowercase())
            .or_insert_with(Vec::new)
            .push(Arc::new(handler));
    }

    /// Remove every handler for `target`
    pub fn off(&self, target: &str) {
        self.shared.handlers.remove(&target.to_lowercase());
    }

    /// Run `hook` each time an automatic reconnect succeeds
    pub fn on_reconnected<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .reconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Open the connection. No-op unless disconnected.
    pub async fn start(&self) -> Result<(), HubError> {
        let mut lifecycle = self.lifecycle.lock().await;

        let state = self.state();
        if state != ConnectionState::Disconnected {
            debug!(target: "hub_connection", state = %state, "Start ignored; connection is active");
            return Ok(());
        }

        info!(target: "hub_connection", "Starting hub connection");
        self.shared.set_state(ConnectionState::Connecting);

        let (link, backlog) = match self.shared.establish().await {
            Ok(established) => established,
            Err(e) => {
                error!(target: "hub_connection", error = %e, "Failed to start hub connection");
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.shared.set_outbound(Some(outbound_tx));
        self.shared.set_state(ConnectionState::Connected);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            Arc::clone(&self.shared),
            link,
            backlog,
            outbound_rx,
            shutdown_rx,
        ));

        *lifecycle = Lifecycle {
            shutdown: Some(shutdown_tx),
            driver: Some(driver),
        };

        info!(target: "hub_connection", "Hub connection started");
        Ok(())
    }

    /// Close the connection. No-op when never started.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle { shutdown, driver } = std::mem::take(&mut *lifecycle);

        let Some(driver) = driver else {
            debug!(target: "hub_connection", "Stop ignored; connection not started");
            return;
        };

        info!(target: "hub_connection", "Stopping hub connection");

        self.shared.set_outbound(None);
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        if let Err(e) = driver.await {
            warn!(target: "hub_connection", error = %e, "Hub driver task failed");
        }

        self.shared.fail_pending();
        self.shared.set_state(ConnectionState::Disconnected);

        info!(target: "hub_connection", "Hub connection stopped");
    }

    /// Invoke a hub method and decode its result
    pub async fn invoke<R>(&self, method: &str, arguments: Vec<Value>) -> Result<R, HubError>
    where
        R: DeserializeOwned,
    {
        let value = self.invoke_value(method, arguments).await?;

        serde_json::from_value(value)
            .map_err(|e| HubError::Protocol(format!("Invalid result for {}: {}", method, e)))
    }

    /// Invoke a hub method and return its raw result (`null` for void methods)
    pub async fn invoke_value(&self, method: &str, arguments: Vec<Value>) -> Result<Value, HubError> {
        let (outbound, generation) = self.shared.connected_outbound()?;

        let invocation_id = self
            .shared
            .next_invocation_id
            .fetch_add(1, Ordering::SeqCst)
            .to_string();

        let frame = protocol::encode(&HubMessage::Invocation {
            invocation_id: Some(invocation_id.clone()),
            target: method.to_string(),
            arguments,
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(invocation_id.clone(), tx);

        // The link may have ended after the state check; its pending calls
        // were already failed
        if self.shared.link_generation.load(Ordering::SeqCst) != generation {
            self.shared.pending.remove(&invocation_id);
            return Err(HubError::ConnectionClosed);
        }

        debug!(target: "hub_connection", method = %method, invocation_id = %invocation_id, "Invoking hub method");

        if outbound.send((generation, frame)).await.is_err() {
            self.shared.pending.remove(&invocation_id);
            return Err(HubError::ConnectionClosed);
        }

        match timeout(self.shared.options.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(HubError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.remove(&invocation_id);
                warn!(target: "hub_connection", method = %method, "Invocation timeout");
                Err(HubError::Timeout)
            }
        }
    }

    /// Invoke a hub method without waiting for a result
    pub async fn send(&self, method: &str, arguments: Vec<Value>) -> Result<(), HubError> {
        let (outbound, generation) = self.shared.connected_outbound()?;

        let frame = protocol::encode(&HubMessage::Invocation {
            invocation_id: None,
            target: method.to_string(),
            arguments,
        })?;

        outbound
            .send((generation, frame))
            .await
            .map_err(|_| HubError::ConnectionClosed)
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        // Release the driver so it drops the link
        if let Ok(mut lifecycle) = self.lifecycle.try_lock() {
            if let Some(shutdown) = lifecycle.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(target: "hub_connection", from = %previous, to = %state, "Connection state changed");
        }
    }

    fn set_outbound(&self, outbound: Option<mpsc::Sender<OutboundFrame>>) {
        *self.outbound.write().unwrap_or_else(PoisonError::into_inner) = outbound;
    }

    /// Outbound queue and the generation of the link it currently feeds
    fn connected_outbound(&self) -> Result<(mpsc::Sender<OutboundFrame>, u64), HubError> {
        // Read before the state check: a link leaves Connected before its
        // generation is retired
        let generation = self.link_generation.load(Ordering::SeqCst);
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(HubError::NotConnected);
        }

        let outbound = self
            .outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(HubError::NotConnected)?;
        Ok((outbound, generation))
    }

    /// Connect and complete the handshake; returns messages that trailed the
    /// handshake response
    async fn establish(&self) -> Result<(TransportLink, Vec<HubMessage>), HubError> {
        let mut link = self.connector.connect().await?;

        let handshake = protocol::encode_handshake(&HandshakeRequest::default())?;
        link.tx
            .send(handshake)
            .await
            .map_err(|_| HubError::ConnectionClosed)?;

        let frame = timeout(self.options.handshake_timeout, link.rx.recv())
            .await
            .map_err(|_| HubError::Handshake("Timed out waiting for handshake response".to_string()))?
            .ok_or(HubError::ConnectionClosed)??;

        let backlog = protocol::decode_handshake(&frame)?;
        debug!(target: "hub_connection", "Handshake complete");

        Ok((link, backlog))
    }

    /// Fail every in-flight invocation
    fn fail_pending(&self) {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, reply)) = self.pending.remove(&id) {
                let _ = reply.send(Err(HubError::ConnectionClosed));
            }
        }
    }

    /// Retire the link that just ended: drop frames queued for it and fail
    /// its in-flight invocations
    fn retire_link(&self, outbound: &mut mpsc::Receiver<OutboundFrame>) {
        self.link_generation.fetch_add(1, Ordering::SeqCst);

        let mut dropped = 0usize;
        while outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(target: "hub_connection", dropped = dropped, "Dropped frames queued for the ended link");
        }

        self.fail_pending();
    }

    fn finish(&self) {
        self.set_outbound(None);
        self.set_state(ConnectionState::Disconnected);
    }

    fn notify_reconnected(&self) {
        let hooks = self
            .reconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook();
        }
    }

    fn dispatch(&self, message: HubMessage) -> Option<LinkEnd> {
        match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                let handlers = self
                    .handlers
                    .get(&target.to_lowercase())
                    .map(|entry| entry.value().clone())
                    .unwrap_or_default();

                if handlers.is_empty() {
                    warn!(target: "hub_connection", method = %target, "No client method registered");
                }
                for handler in handlers {
                    handler(&arguments);
                }

                if invocation_id.is_some() {
                    warn!(target: "hub_connection", method = %target, "Server requested a client result; not supported");
                }
                None
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                match self.pending.remove(&invocation_id) {
                    Some((_, reply)) => {
                        let outcome = match error {
                            Some(error) => Err(HubError::Server(error)),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = reply.send(outcome);
                    }
                    None => {
                        warn!(target: "hub_connection", invocation_id = %invocation_id, "Completion for unknown invocation");
                    }
                }
                None
            }
            HubMessage::Ping => None,
            HubMessage::Close {
                error,
                allow_reconnect,
            } => Some(LinkEnd::Closed {
                error,
                allow_reconnect,
            }),
            other => {
                debug!(target: "hub_connection", message = ?other, "Ignoring unsupported hub message");
                None
            }
        }
    }

    /// Pump one link until it ends
    async fn run_session(
        &self,
        mut link: TransportLink,
        backlog: Vec<HubMessage>,
        generation: u64,
        outbound: &mut mpsc::Receiver<OutboundFrame>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> LinkEnd {
        for message in backlog {
            if let Some(end) = self.dispatch(message) {
                return end;
            }
        }

        let period = self.options.keep_alive_interval;
        let mut keep_alive = interval_at(Instant::now() + period, period);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let server_timeout = sleep(self.options.server_timeout);
        tokio::pin!(server_timeout);

        loop {
            tokio::select! {
                _ = &mut *shutdown => return LinkEnd::Stopped,
                frame = outbound.recv() => {
                    let Some((queued_for, frame)) = frame else {
                        return LinkEnd::Stopped;
                    };
                    if queued_for != generation {
                        debug!(target: "hub_connection", "Dropping frame queued for an earlier link");
                        continue;
                    }
                    if let Some(end) = forward(&link.tx, frame, shutdown).await {
                        return end;
                    }
                    keep_alive.reset();
                }
                inbound = link.rx.recv() => {
                    let frame = match inbound {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                        None => return LinkEnd::Lost("Transport closed".to_string()),
                    };
                    server_timeout
                        .as_mut()
                        .reset(Instant::now() + self.options.server_timeout);

                    let messages = match protocol::decode(&frame) {
                        Ok(messages) => messages,
                        Err(e) => return LinkEnd::Lost(e.to_string()),
                    };
                    for message in messages {
                        if let Some(end) = self.dispatch(message) {
                            return end;
                        }
                    }
                }
                _ = keep_alive.tick() => {
                    let ping = match protocol::encode(&HubMessage::Ping) {
                        Ok(ping) => ping,
                        Err(e) => return LinkEnd::Lost(e.to_string()),
                    };
                    if let Some(end) = forward(&link.tx, ping, shutdown).await {
                        return end;
                    }
                }
                _ = &mut server_timeout => {
                    return LinkEnd::Lost(format!(
                        "No message from server within {:?}",
                        self.options.server_timeout
                    ));
                }
            }
        }
    }

    /// Walk the reconnect policy until a link is established
    async fn reconnect(&self, shutdown: &mut oneshot::Receiver<()>) -> Reconnect {
        for (attempt, delay) in self.options.reconnect.delays().iter().enumerate() {
            info!(
                target: "hub_connection",
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect attempt"
            );

            tokio::select! {
                _ = &mut *shutdown => return Reconnect::Stopped,
                _ = sleep(*delay) => {}
            }

            tokio::select! {
                _ = &mut *shutdown => return Reconnect::Stopped,
                established = self.establish() => match established {
                    Ok((link, backlog)) => return Reconnect::Linked(link, backlog),
                    Err(e) => {
                        warn!(target: "hub_connection", attempt = attempt + 1, error = %e, "Reconnect attempt failed");
                    }
                }
            }
        }

        Reconnect::GaveUp
    }
}

/// Write one frame to the link unless shutdown arrives first
async fn forward(
    tx: &mpsc::Sender<String>,
    frame: String,
    shutdown: &mut oneshot::Receiver<()>,
) -> Option<LinkEnd> {
    tokio::select! {
        _ = shutdown => Some(LinkEnd::Stopped),
        sent = tx.send(frame) => sent
            .err()
            .map(|_| LinkEnd::Lost("Transport closed while sending".to_string())),
    }
}

/// Driver task: owns the link for the lifetime of a started connection
async fn drive(
    shared: Arc<Shared>,
    link: TransportLink,
    backlog: Vec<HubMessage>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut link = link;
    let mut backlog = backlog;

    loop {
        let generation = shared.link_generation.load(Ordering::SeqCst);
        let end = shared
            .run_session(link, backlog, generation, &mut outbound, &mut shutdown)
            .await;

        let may_reconnect = match end {
            LinkEnd::Stopped => {
                shared.fail_pending();
                debug!(target: "hub_connection", "Hub driver stopped");
                return;
            }
            LinkEnd::Closed {
                error,
                allow_reconnect: false,
            } => {
                info!(target: "hub_connection", error = ?error, "Server closed the connection");
                false
            }
            LinkEnd::Closed { error, .. } => {
                warn!(target: "hub_connection", error = ?error, "Server closed the connection; reconnect allowed");
                true
            }
            LinkEnd::Lost(reason) => {
                warn!(target: "hub_connection", reason = %reason, "Connection lost");
                true
            }
        };

        // Leave Connected before retiring so new callers are turned away
        if !may_reconnect || !shared.options.reconnect.is_enabled() {
            shared.finish();
            shared.retire_link(&mut outbound);
            return;
        }
        shared.set_state(ConnectionState::Reconnecting);
        shared.retire_link(&mut outbound);

        match shared.reconnect(&mut shutdown).await {
            Reconnect::Linked(next, next_backlog) => {
                link = next;
                backlog = next_backlog;
                shared.set_state(ConnectionState::Connected);
                info!(target: "hub_connection", "Hub connection reestablished");
                shared.notify_reconnected();
            }
            Reconnect::Stopped => return,
            Reconnect::GaveUp => {
                error!(target: "hub_connection", "Reconnect attempts exhausted");
                shared.finish();
                return;
            }
        }
    }
}
