#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use callbridge_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use callbridge_server::call::CallRegistry;
use callbridge_server::config::Config;
use callbridge_server::telephony::{TelephonyControl, TelephonyError};
use callbridge_server::{app, AppState};
use callbridge_tools::{Tool, ToolContext, ToolError, ToolRegistry};
use callbridge_types::{CallState, Language, OutcomeRecord, ServicePolicy, ToolResult, ToolSpec};
use callbridge_voice::SttService;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;

/// Call-control double that records each instruction.
#[derive(Default)]
pub struct RecordingTelephony {
    actions: Mutex<Vec<(String, String)>>,
    changed: Notify,
}

impl RecordingTelephony {
    fn record(&self, action: &str, call_sid: &str) {
        self.actions
            .lock()
            .unwrap()
            .push((action.to_string(), call_sid.to_string()));
        self.changed.notify_waiters();
    }

    pub fn actions(&self) -> Vec<(String, String)> {
        self.actions.lock().unwrap().clone()
    }

    /// Waits until at least `n` instructions were issued.
    pub async fn wait_for(&self, n: usize) -> Vec<(String, String)> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let notified = self.changed.notified();
                let actions = self.actions();
                if actions.len() >= n {
                    return actions;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for call-control instruction")
    }
}

#[async_trait]
impl TelephonyControl for RecordingTelephony {
    async fn redirect_to_human(
        &self,
        call_sid: &str,
        _language: Language,
    ) -> Result<(), TelephonyError> {
        self.record("redirect", call_sid);
        Ok(())
    }

    async fn record_voicemail(
        &self,
        call_sid: &str,
        _language: Language,
    ) -> Result<(), TelephonyError> {
        self.record("voicemail", call_sid);
        Ok(())
    }

    async fn hangup_with_apology(
        &self,
        call_sid: &str,
        _language: Language,
    ) -> Result<(), TelephonyError> {
        self.record("apology", call_sid);
        Ok(())
    }
}

/// A tool that takes a while and reports when it started.
pub struct SlowTool {
    pub delay: Duration,
    pub started: Arc<Notify>,
}

#[async_trait]
impl Tool for SlowTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "slow_lookup".to_string(),
            description: "Looks something up slowly.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolResult, ToolError> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok(ToolResult::success().with("answer", "late"))
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub telephony: Arc<RecordingTelephony>,
    _db: NamedTempFile,
}

pub fn test_pool() -> (DbPool, NamedTempFile) {
    let db = NamedTempFile::new().unwrap();
    let pool = create_pool(db.path().to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();
    (pool, db)
}

/// State with a recording telephony double and the given tools.
pub fn test_state(config: Config, tools: ToolRegistry) -> (AppState, Arc<RecordingTelephony>, NamedTempFile) {
    let (pool, db) = test_pool();
    let telephony = Arc::new(RecordingTelephony::default());
    let policy = ServicePolicy {
        confidence: config.policy,
        enabled_tools: config.tools.enabled.clone(),
    };
    let state = AppState {
        pool,
        stt: Arc::new(SttService::from_config(&config.stt)),
        config: Arc::new(config),
        calls: CallRegistry::new(),
        tools: Arc::new(tools),
        telephony: telephony.clone(),
        policy: Arc::new(RwLock::new(policy)),
        http: reqwest::Client::new(),
    };
    (state, telephony, db)
}

impl TestServer {
    pub async fn start(config: Config, tools: ToolRegistry) -> Self {
        let (state, telephony, db) = test_state(config, tools);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            addr,
            state,
            telephony,
            _db: db,
        }
    }

    pub async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{}{}", self.addr, path))
            .form(form)
            .send()
            .await
            .unwrap()
    }

    /// Opens the media stream as the gateway would and sends `start`.
    pub async fn open_stream(&self, call_sid: &str) -> GatewaySocket {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/media-stream", self.addr))
            .await
            .unwrap();
        ws.send(Message::text(
            json!({"event": "connected", "protocol": "Call"}).to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::text(
            json!({
                "event": "start",
                "streamSid": "MZ1",
                "start": {
                    "streamSid": "MZ1",
                    "callSid": call_sid,
                    "customParameters": {"callSid": call_sid, "from": "+15550001111"}
                }
            })
            .to_string(),
        ))
        .await
        .unwrap();
        ws
    }

    /// Polls until the call's outcome row exists.
    pub async fn wait_for_outcome(&self, call_sid: &str) -> OutcomeRecord {
        let pool = self.state.pool.clone();
        let sid = call_sid.to_string();
        tokio::time::timeout(Duration::from_secs(10), async move {
            loop {
                let found =
                    callbridge_observe::get_outcome(&pool.get().unwrap(), &sid).unwrap();
                if let Some(outcome) = found {
                    return outcome;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("timed out waiting for call outcome")
    }

    pub fn state_of(&self, call_sid: &str) -> Option<CallState> {
        self.state.calls.get(call_sid).map(|c| c.state())
    }
}

pub type GatewaySocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Reads gateway-bound JSON frames until the server closes the socket.
pub async fn drain_until_closed(ws: &mut GatewaySocket) -> Vec<Value> {
    let mut frames = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(frame)) = ws.next().await {
            match frame {
                Message::Text(text) => frames.push(serde_json::from_str(&text).unwrap()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
    .await;
    frames
}

/// Next JSON frame sent to the gateway.
pub async fn next_frame(ws: &mut GatewaySocket) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("gateway socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for gateway frame")
}

/// Model service that accepts connections and closes them, every time.
pub struct ClosingModel {
    pub addr: SocketAddr,
    pub attempts: Arc<AtomicUsize>,
}

impl ClosingModel {
    /// Closes right after the WebSocket handshake, before acknowledging
    /// the session.
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Acknowledges the session, then closes after `hold`.
    pub async fn flapping(hold: Duration) -> Self {
        Self::spawn(Some(hold)).await
    }

    async fn spawn(hold: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    if let Some(hold) = hold {
                        let _ = ws
                            .send(Message::text(json!({"type": "session.created"}).to_string()))
                            .await;
                        tokio::time::sleep(hold).await;
                    }
                    let _ = ws.close(None).await;
                });
            }
        });
        Self { addr, attempts }
    }
}

enum Push {
    Text(String),
    Drop,
}

/// Model service that acknowledges sessions, records what the client
/// sends, and forwards pushed messages to the live connection. Connections
/// are served one after another, so a client may reconnect after a drop.
pub struct FakeModel {
    pub addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Value>,
    pub log: Arc<Mutex<Vec<Value>>>,
    push: mpsc::UnboundedSender<Push>,
    pub connections: Arc<AtomicUsize>,
    pub disconnected: Arc<Notify>,
}

impl FakeModel {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<Push>();
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(Notify::new());

        let log_writer = log.clone();
        let counter = connections.clone();
        let gone = disconnected.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let (mut sink, mut stream) = ws.split();
                if sink
                    .send(Message::text(json!({"type": "session.created"}).to_string()))
                    .await
                    .is_err()
                {
                    continue;
                }
                loop {
                    tokio::select! {
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let value: Value = serde_json::from_str(&text).unwrap();
                                log_writer.lock().unwrap().push(value.clone());
                                let _ = received_tx.send(value);
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        out = push_rx.recv() => match out {
                            Some(Push::Text(text)) => {
                                if sink.send(Message::text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Push::Drop) => {
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                            None => return,
                        },
                    }
                }
                gone.notify_one();
            }
        });

        Self {
            addr,
            received,
            log,
            push,
            connections,
            disconnected,
        }
    }

    /// Closes the live connection from the service side.
    pub fn drop_connection(&self) {
        let _ = self.push.send(Push::Drop);
    }

    pub fn send(&self, value: Value) {
        self.push.send(Push::Text(value.to_string())).unwrap();
    }

    /// Skips client messages until one of type `ty` arrives.
    pub async fn next_of_type(&mut self, ty: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let msg = self
                    .received
                    .recv()
                    .await
                    .expect("model connection ended");
                if msg["type"] == ty {
                    return msg;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {ty}"))
    }

    pub fn received_types(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m["type"].as_str().map(str::to_string))
            .collect()
    }
}

/// Configuration pointing the model leg at `addr` with fast retries.
pub fn config_for_model(addr: SocketAddr) -> Config {
    let mut config = Config::default();
    config.realtime.url = format!("ws://{}", addr);
    config.realtime.model = String::new();
    config.realtime.connect_timeout_secs = 2;
    config.realtime.max_connect_attempts = 3;
    config.realtime.reconnect_backoff_ms = 10;
    config.realtime.commit_threshold_bytes = 0;
    config.server.public_url = "https://bridge.example".to_string();
    config
}
