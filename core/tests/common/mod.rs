//! Shared test fixtures: an in-process hub speaking the JSON hub protocol
//! over `TransportLink` channels.
#![allow(dead_code)]

use async_trait::async_trait;
use linewatch_core::hub::{ConnectionState, HubConnector, HubError, TransportLink};
use linewatch_core::machine::{MetricsCallback, OeeUpdate, RuntimeBlock, RuntimeBlockCallback};
use linewatch_core::HubConfig;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};

pub const RS: char = '\u{1e}';

/// How the fake hub answers an invocation
pub enum Reply {
    Result(Value),
    Error(String),
    Silent,
}

type Responder = Arc<dyn Fn(&str, &[Value]) -> Reply + Send + Sync>;

#[derive(Clone)]
pub struct FakeHub {
    state: Arc<HubState>,
}

struct HubState {
    responder: Mutex<Responder>,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    to_client: Mutex<Option<mpsc::Sender<Result<String, HubError>>>>,
    /// Dropping it ends the server side of the current link
    cut_link: Mutex<Option<oneshot::Sender<()>>>,
    stall_reads: AtomicBool,
    connects: AtomicUsize,
    pings: AtomicUsize,
    refuse: AtomicBool,
    handshake_error: Mutex<Option<String>>,
}

impl FakeHub {
    /// Hub answering every invocation with `null`
    pub fn new() -> Self {
        Self::with_responder(|_, _| Reply::Result(Value::Null))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Reply + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(HubState {
                responder: Mutex::new(Arc::new(responder)),
                invocations: Mutex::new(Vec::new()),
                to_client: Mutex::new(None),
                cut_link: Mutex::new(None),
                stall_reads: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                pings: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                handshake_error: Mutex::new(None),
            }),
        }
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Stop reading client frames (after at most one more) until the link is dropped
    pub fn stall_reads(&self, stall: bool) {
        self.state.stall_reads.store(stall, Ordering::SeqCst);
    }

    pub fn fail_handshake(&self, error: &str) {
        *self.state.handshake_error.lock().unwrap() = Some(error.to_string());
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.state.invocations.lock().unwrap().clone()
    }

    /// Arguments of every invocation of `target`
    pub fn invocations_of(&self, target: &str) -> Vec<Vec<Value>> {
        self.invocations()
            .into_iter()
            .filter(|(t, _)| t == target)
            .map(|(_, args)| args)
            .collect()
    }

    /// Invoke a client method
    pub async fn push(&self, target: &str, arguments: Vec<Value>) {
        let frame = json!({"type": 1, "target": target, "arguments": arguments});
        self.push_raw(format!("{}{}", frame, RS)).await;
    }

    pub async fn push_raw(&self, frame: String) {
        self.state.send(frame).await;
    }

    /// Drop the current link as if the socket died
    pub fn drop_connection(&self) {
        self.state.to_client.lock().unwrap().take();
        self.state.cut_link.lock().unwrap().take();
    }
}

impl HubState {
    async fn send(&self, frame: String) {
        let tx = self.to_client.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(Ok(frame)).await;
        }
    }

    fn handle(&self, message: &Value) -> Option<String> {
        if message.get("protocol").is_some() {
            let response = match self.handshake_error.lock().unwrap().clone() {
                Some(error) => json!({ "error": error }),
                None => json!({}),
            };
            return Some(format!("{}{}", response, RS));
        }

        match message.get("type").and_then(Value::as_u64) {
            Some(1) => {
                let target = message["target"].as_str().unwrap_or_default().to_string();
                let arguments = message["arguments"].as_array().cloned().unwrap_or_default();
                self.invocations
                    .lock()
                    .unwrap()
                    .push((target.clone(), arguments.clone()));

                let invocation_id = message.get("invocationId")?.as_str()?.to_string();
                let responder = Arc::clone(&self.responder.lock().unwrap());
                let completion = match responder(&target, &arguments) {
                    Reply::Result(result) => {
                        json!({"type": 3, "invocationId": invocation_id, "result": result})
                    }
                    Reply::Error(error) => {
                        json!({"type": 3, "invocationId": invocation_id, "error": error})
                    }
                    Reply::Silent => return None,
                };
                Some(format!("{}{}", completion, RS))
            }
            Some(6) => {
                self.pings.fetch_add(1, Ordering::SeqCst);
                None
            }
            _ => None,
        }
    }
}

#[async_trait]
impl HubConnector for FakeHub {
    async fn connect(&self) -> Result<TransportLink, HubError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(HubError::Transport("connection refused".to_string()));
        }

        let (link, mut from_client, to_client) = TransportLink::pair();
        let (cut_tx, mut cut_rx) = oneshot::channel::<()>();
        *self.state.to_client.lock().unwrap() = Some(to_client);
        *self.state.cut_link.lock().unwrap() = Some(cut_tx);

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                if state.stall_reads.load(Ordering::SeqCst) {
                    // Hold the link open without reading it
                    let _ = (&mut cut_rx).await;
                    break;
                }
                let frame = tokio::select! {
                    _ = &mut cut_rx => break,
                    frame = from_client.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                for record in frame.split(RS).filter(|r| !r.is_empty()) {
                    let Ok(message) = serde_json::from_str::<Value>(record) else {
                        continue;
                    };
                    if let Some(reply) = state.handle(&message) {
                        state.send(reply).await;
                    }
                }
            }
        });

        Ok(link)
    }
}

/// Short timeouts and fast reconnects
pub fn test_config() -> HubConfig {
    HubConfig {
        request_timeout_ms: 500,
        handshake_timeout_ms: 500,
        keep_alive_interval_ms: 10_000,
        server_timeout_ms: 20_000,
        reconnect_delays_ms: vec![0, 50, 100],
        ..HubConfig::default()
    }
}

pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    expected: ConnectionState,
) -> bool {
    let reached = timeout(Duration::from_secs(2), async {
        loop {
            if *rx.borrow_and_update() == expected {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    })
    .await;
    matches!(reached, Ok(true))
}

/// Poll `condition` for up to two seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn metrics_recorder() -> (MetricsCallback, Arc<Mutex<Vec<OeeUpdate>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: MetricsCallback = Arc::new(move |update| sink.lock().unwrap().push(update));
    (callback, seen)
}

pub fn block_recorder() -> (RuntimeBlockCallback, Arc<Mutex<Vec<RuntimeBlock>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: RuntimeBlockCallback = Arc::new(move |block| sink.lock().unwrap().push(block));
    (callback, seen)
}

pub fn machine_update(machine_id: &str, oee: f64) -> Value {
    json!({
        "machineId": machine_id,
        "availability": 0.9,
        "performance": 0.9,
        "quality": 0.99,
        "oee": oee,
        "goodCount": 99,
        "totalCount": 100,
        "runTime": "PT2H30M15S",
        "currentProduct": "Bracket A-17",
        "stateBlocks": []
    })
}

pub fn runtime_block(machine_id: &str) -> Value {
    json!({
        "machineId": machine_id,
        "startTime": "2024-03-01T08:00:00Z",
        "endTime": null,
        "state": 2,
        "stopReasonId": 3,
        "stopReasonName": "Changeover",
        "stopReasonColor": "#FFAB00",
        "unplanned": false
    })
}
