//! Client for one realtime speech-to-speech model session.
//!
//! One [`RealtimeSession`] exists per call. It owns a WebSocket to the model
//! service, split into a writer task (outbound queue plus keepalive) and a
//! reader task that routes inbound messages. Everything the bridge needs to
//! react to arrives as a [`ModelEvent`] on the channel returned by
//! [`RealtimeSession::connect`]; sends are fire-and-forget.
//!
//! Tool calls run in their own tasks so audio keeps flowing while they are
//! outstanding. All of them are scoped to the session's cancellation token:
//! once the session closes, their results are discarded instead of being
//! written to a dead socket.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use callbridge_types::{ToolResult, ToolSpec};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RealtimeConfig, TurnDetection};
use crate::error::VoiceError;

type ModelSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the per-session event channel towards the bridge.
const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Resolves tool calls on behalf of a session.
///
/// Implementations must always produce a [`ToolResult`]; failures are
/// expressed as `ok: false` results, never as panics or errors.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult;
}

/// Per-call session configuration sent in the opening `session.update`.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub call_sid: String,
    pub voice: String,
    pub instructions: String,
    /// Manifest of the tools the model may call.
    pub tools: Vec<ToolSpec>,
}

/// Something the model side produced that the call needs to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// PCM16 audio at the configured output rate.
    AudioDelta(Vec<u8>),
    /// Partial transcript of what the model is saying.
    TextDelta(String),
    /// The caller started talking over the model.
    SpeechStarted,
    /// The model finished a spoken turn.
    ResponseCompleted,
    /// A tool call finished and its result was returned to the model.
    ToolResolved {
        call_id: String,
        name: String,
        result: ToolResult,
    },
    /// The service reported an error. The session stays open.
    Error {
        code: Option<String>,
        message: String,
    },
    /// The socket went away without [`RealtimeSession::close`] being called.
    Closed { reason: String },
}

/// Inbound message shapes we act on. Several services name the same event
/// differently, hence the aliases.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "session.created", alias = "session.updated")]
    SessionReady,
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(
        rename = "input_audio_buffer.speech_stopped",
        alias = "input_audio_buffer.committed"
    )]
    TurnBoundary,
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta { delta: String },
    #[serde(
        rename = "response.output_text.delta",
        alias = "response.audio_transcript.delta"
    )]
    TextDelta { delta: String },
    #[serde(rename = "response.completed", alias = "response.done")]
    ResponseCompleted,
    #[serde(rename = "response.function_call_arguments.done", alias = "tool.call")]
    ToolCall {
        #[serde(alias = "id")]
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: Option<Value>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

/// Normalises tool-call arguments into a JSON object.
///
/// Arguments may arrive as an object or as a JSON-encoded string. Anything
/// that does not yield an object becomes `{}`.
pub fn parse_arguments(raw: Option<Value>) -> Value {
    let parsed = match raw {
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => serde_json::from_str::<Value>(&text).ok(),
        other => other,
    };
    match parsed {
        Some(value @ Value::Object(_)) => value,
        _ => Value::Object(Default::default()),
    }
}

struct Shared {
    call_sid: String,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    closed: AtomicBool,
    pending_bytes: AtomicUsize,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queues a message for the writer. Returns `false` once closed.
    fn send(&self, value: Value) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.send(Message::text(value.to_string())).is_ok()
    }

    /// Marks the session closed and cancels every task scoped to it.
    /// Returns `true` for the call that actually closed it.
    fn shut(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        self.cancel.cancel();
        first
    }
}

/// A live model session for one call. Dropping it closes the session.
pub struct RealtimeSession {
    shared: Arc<Shared>,
    commit_threshold: usize,
}

impl std::fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("call_sid", &self.shared.call_sid)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl RealtimeSession {
    /// Dials the model service, configures the session and waits for the
    /// service to acknowledge it, all within `config.connect_timeout()`.
    pub async fn connect(
        config: &RealtimeConfig,
        settings: SessionSettings,
        tools: Arc<dyn ToolHandler>,
    ) -> Result<(Self, mpsc::Receiver<ModelEvent>), VoiceError> {
        let timeout = config.connect_timeout();
        let deadline = tokio::time::Instant::now() + timeout;

        let mut request = config
            .endpoint()
            .into_client_request()
            .map_err(|e| VoiceError::Config(format!("invalid model service url: {e}")))?;
        if !config.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|_| VoiceError::Config("api key is not a valid header value".into()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _response) =
            tokio::time::timeout_at(deadline, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| VoiceError::ConnectTimeout(timeout))?
                .map_err(|e| VoiceError::Connect(e.to_string()))?;

        let (mut sink, mut stream) = socket.split();

        sink.send(Message::text(session_update(config, &settings).to_string()))
            .await
            .map_err(|e| VoiceError::Connect(format!("failed to configure session: {e}")))?;

        tokio::time::timeout_at(deadline, wait_until_ready(&mut stream))
            .await
            .map_err(|_| VoiceError::ConnectTimeout(timeout))??;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            call_sid: settings.call_sid.clone(),
            outbound,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            pending_bytes: AtomicUsize::new(0),
        });

        tokio::spawn(write_loop(
            sink,
            outbound_rx,
            shared.clone(),
            config.keepalive_interval(),
        ));
        tokio::spawn(read_loop(stream, shared.clone(), events_tx, tools));

        info!(call_sid = %settings.call_sid, voice = %settings.voice, "model session ready");

        Ok((
            Self {
                shared,
                commit_threshold: config.commit_threshold_bytes,
            },
            events_rx,
        ))
    }

    pub fn call_sid(&self) -> &str {
        &self.shared.call_sid
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Bytes appended since the last commit or server turn boundary.
    pub fn pending_input_bytes(&self) -> usize {
        self.shared.pending_bytes.load(Ordering::SeqCst)
    }

    /// Appends PCM16 input audio.
    ///
    /// Once the uncommitted total reaches the commit threshold the buffer is
    /// committed and a response requested, so input never piles up when
    /// the service does not end turns on its own.
    pub fn append_audio(&self, pcm: &[u8]) -> Result<(), VoiceError> {
        if self.is_closed() {
            return Err(VoiceError::SessionClosed);
        }
        if pcm.is_empty() {
            return Ok(());
        }
        let audio = base64::engine::general_purpose::STANDARD.encode(pcm);
        self.shared
            .send(json!({"type": "input_audio_buffer.append", "audio": audio}));

        if self.commit_threshold > 0 {
            let total = self.shared.pending_bytes.fetch_add(pcm.len(), Ordering::SeqCst) + pcm.len();
            if total >= self.commit_threshold {
                debug!(
                    call_sid = %self.shared.call_sid,
                    bytes = total,
                    "input threshold reached, committing"
                );
                self.commit();
                self.request_response();
            }
        }
        Ok(())
    }

    /// Commits the input buffer as a finished caller turn.
    pub fn commit(&self) {
        self.shared.pending_bytes.store(0, Ordering::SeqCst);
        self.shared
            .send(json!({"type": "input_audio_buffer.commit"}));
    }

    /// Asks the model to produce a response now.
    pub fn request_response(&self) {
        self.shared.send(json!({"type": "response.create"}));
    }

    /// Closes the session. Safe to call any number of times; only the first
    /// call has an effect. Stops the keepalive and cancels outstanding tool
    /// calls.
    pub fn close(&self) {
        if self.shared.shut() {
            info!(call_sid = %self.shared.call_sid, "model session closed");
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn session_update(config: &RealtimeConfig, settings: &SessionSettings) -> Value {
    let turn_detection = match config.turn_detection {
        TurnDetection::ServerVad => json!({"type": "server_vad"}),
        TurnDetection::None => Value::Null,
    };
    json!({
        "type": "session.update",
        "session": {
            "instructions": settings.instructions,
            "voice": settings.voice,
            "input_audio_format": "pcm16",
            "input_audio_sample_rate": config.input_sample_rate,
            "output_audio_format": "pcm16",
            "output_audio_sample_rate": config.output_sample_rate,
            "turn_detection": turn_detection,
            "tools": settings.tools,
            "tool_choice": "auto",
        }
    })
}

async fn wait_until_ready(stream: &mut SplitStream<ModelSocket>) -> Result<(), VoiceError> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::SessionReady) => return Ok(()),
                Ok(ServerMessage::Error { error }) => {
                    let message = error.map(|e| e.message).unwrap_or_default();
                    return Err(VoiceError::Connect(format!(
                        "service rejected session: {message}"
                    )));
                }
                _ => debug!("ignoring message before session ready"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(VoiceError::Connect(e.to_string())),
        }
    }
    Err(VoiceError::Connect(
        "socket closed before the session was ready".to_string(),
    ))
}

async fn write_loop(
    mut sink: SplitSink<ModelSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
    keepalive: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
    let touch = json!({"type": "session.update", "session": {}}).to_string();

    loop {
        let message = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(message) => message,
                None => break,
            },
            _ = ticker.tick() => Message::text(touch.clone()),
        };
        if let Err(e) = sink.send(message).await {
            warn!(call_sid = %shared.call_sid, "model session write failed: {}", e);
            break;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<ModelSocket>,
    shared: Arc<Shared>,
    events: mpsc::Sender<ModelEvent>,
    tools: Arc<dyn ToolHandler>,
) {
    let reason = loop {
        let frame = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                route_message(&text, &shared, &events, &tools).await;
            }
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| format!("closed by service: {} {}", f.code, f.reason))
                    .unwrap_or_else(|| "closed by service".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        }
    };

    if shared.shut() {
        warn!(call_sid = %shared.call_sid, reason = %reason, "model session dropped");
        let _ = events.send(ModelEvent::Closed { reason }).await;
    }
}

async fn route_message(
    text: &str,
    shared: &Arc<Shared>,
    events: &mpsc::Sender<ModelEvent>,
    tools: &Arc<dyn ToolHandler>,
) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(call_sid = %shared.call_sid, "dropping malformed model message: {}", e);
            return;
        }
    };

    let event = match message {
        ServerMessage::SessionReady => {
            debug!(call_sid = %shared.call_sid, "session configuration acknowledged");
            return;
        }
        ServerMessage::SpeechStarted => {
            shared.pending_bytes.store(0, Ordering::SeqCst);
            ModelEvent::SpeechStarted
        }
        ServerMessage::TurnBoundary => {
            shared.pending_bytes.store(0, Ordering::SeqCst);
            return;
        }
        ServerMessage::AudioDelta { delta } => {
            match base64::engine::general_purpose::STANDARD.decode(delta) {
                Ok(pcm) => ModelEvent::AudioDelta(pcm),
                Err(e) => {
                    warn!(call_sid = %shared.call_sid, "dropping undecodable audio delta: {}", e);
                    return;
                }
            }
        }
        ServerMessage::TextDelta { delta } => {
            debug!(call_sid = %shared.call_sid, delta = %delta, "model transcript");
            ModelEvent::TextDelta(delta)
        }
        ServerMessage::ResponseCompleted => ModelEvent::ResponseCompleted,
        ServerMessage::ToolCall {
            call_id,
            name,
            arguments,
        } => {
            spawn_tool_call(
                shared.clone(),
                tools.clone(),
                events.clone(),
                call_id,
                name,
                parse_arguments(arguments),
            );
            return;
        }
        ServerMessage::Error { error } => {
            let (code, message) = error
                .map(|e| (e.code, e.message))
                .unwrap_or((None, String::new()));
            warn!(
                call_sid = %shared.call_sid,
                code = code.as_deref().unwrap_or(""),
                "model service error: {}",
                message
            );
            ModelEvent::Error { code, message }
        }
        ServerMessage::Unknown => {
            debug!(call_sid = %shared.call_sid, "ignoring unhandled model message");
            return;
        }
    };

    let _ = events.send(event).await;
}

fn spawn_tool_call(
    shared: Arc<Shared>,
    tools: Arc<dyn ToolHandler>,
    events: mpsc::Sender<ModelEvent>,
    call_id: String,
    name: String,
    arguments: Value,
) {
    debug!(call_sid = %shared.call_sid, tool = %name, call_id = %call_id, "tool call");
    tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                debug!(call_sid = %shared.call_sid, tool = %name, "session closed, tool call abandoned");
                return;
            }
            result = tools.call_tool(&name, arguments) => result,
        };

        if shared.is_closed() {
            debug!(call_sid = %shared.call_sid, tool = %name, "session closed, discarding tool result");
            return;
        }

        shared.send(json!({
            "type": "tool.output",
            "call_id": call_id,
            "output": result.to_json_string(),
        }));
        shared.send(json!({"type": "response.create"}));

        let _ = events
            .send(ModelEvent::ToolResolved {
                call_id,
                name,
                result,
            })
            .await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_from_string_or_object() {
        assert_eq!(
            parse_arguments(Some(json!("{\"quantity\": 2}"))),
            json!({"quantity": 2})
        );
        assert_eq!(parse_arguments(Some(json!({"a": 1}))), json!({"a": 1}));
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        assert_eq!(parse_arguments(Some(json!("{not json"))), json!({}));
        assert_eq!(parse_arguments(Some(json!("[1, 2]"))), json!({}));
        assert_eq!(parse_arguments(Some(json!(""))), json!({}));
        assert_eq!(parse_arguments(Some(json!(42))), json!({}));
        assert_eq!(parse_arguments(None), json!({}));
    }

    #[test]
    fn server_message_aliases() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"response.output_audio.delta","delta":"AAA="}"#).unwrap();
        assert!(matches!(msg, ServerMessage::AudioDelta { .. }));

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"tool.call","id":"c1","name":"transfer_to_human"}"#)
                .unwrap();
        assert!(
            matches!(msg, ServerMessage::ToolCall { ref call_id, arguments: None, .. } if call_id == "c1")
        );

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"response.done","response":{"id":"r1"}}"#).unwrap();
        assert!(matches!(msg, ServerMessage::ResponseCompleted));

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
    }

    #[test]
    fn session_update_declares_formats_and_tools() {
        let config = RealtimeConfig {
            turn_detection: TurnDetection::None,
            ..Default::default()
        };
        let settings = SessionSettings {
            call_sid: "CA1".into(),
            voice: "verse".into(),
            instructions: "be brief".into(),
            tools: vec![ToolSpec {
                name: "get_next_events".into(),
                description: "Upcoming events".into(),
                input_schema: json!({"type": "object", "properties": {}}),
            }],
        };
        let update = session_update(&config, &settings);
        assert_eq!(update["type"], "session.update");
        assert_eq!(update["session"]["voice"], "verse");
        assert_eq!(update["session"]["input_audio_format"], "pcm16");
        assert_eq!(update["session"]["input_audio_sample_rate"], 16_000);
        assert!(update["session"]["turn_detection"].is_null());
        assert_eq!(update["session"]["tools"][0]["name"], "get_next_events");
        assert!(update["session"]["tools"][0]["input_schema"].is_object());
    }
}
