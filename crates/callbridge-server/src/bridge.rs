//! Media-stream WebSocket: bridges one call's telephony leg to its model
//! session.
//!
//! One task per call owns both legs. Telephony frames are transcoded and
//! appended to the model session in arrival order; model audio is
//! transcoded and queued to the telephony socket's writer task. Tool calls
//! run inside the model session client, so audio keeps flowing while a
//! tool is outstanding.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use callbridge_db::with_conn;
use callbridge_observe::{emit_or_warn, EventPayload};
use callbridge_tools::{ToolContext, ToolRegistry};
use callbridge_types::{AudioFormat, CallState, Language, ResultAction, ToolResult};
use callbridge_voice::telephony::{parse_inbound, InboundEvent, OutboundEvent, StreamStart};
use callbridge_voice::{AudioFrame, FrameConverter, ModelEvent, RealtimeSession, SessionSettings, ToolHandler};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::call::CallSession;
use crate::AppState;

/// How long a fresh media socket may stay silent before sending `start`.
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// A model session that stays up this long is considered healthy.
const STABLE_SESSION: Duration = Duration::from_secs(30);

/// Outbound envelopes buffered per call before frames are dropped.
const OUTBOUND_CAPACITY: usize = 512;

const SPANISH_DIRECTIVE: &str =
    "The caller speaks Spanish. Respond only in Spanish, using a natural Latin American register.";

/// Resolves the model's tool calls through the shared registry with this
/// call's context.
struct CallTools {
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
}

#[async_trait]
impl ToolHandler for CallTools {
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        self.registry
            .dispatch(self.ctx.clone(), name, arguments)
            .await
    }
}

/// Why the bridge stopped.
#[derive(Debug)]
enum BridgeExit {
    /// The call was settled elsewhere (status callback, shutdown).
    Cancelled,
    /// `stop` event or a clean socket close.
    Hangup,
    /// The telephony socket failed.
    TelephonyFailed(String),
    Transfer(&'static str),
    Voicemail,
    /// The model leg could not be (re)established.
    ModelUnavailable,
}

/// `GET /media-stream`: upgrades to the gateway's media-stream protocol.
pub async fn media_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state))
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(WsMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    match wait_for_start(&mut receiver).await {
        Some((stream_sid, start)) => {
            let session = resolve_session(&state, &start);
            let voice = start
                .voice()
                .map(str::to_string)
                .or_else(|| start.language().map(|l| state.config.voice_for(l)));
            session.attach_stream(
                &stream_sid,
                start.language(),
                voice,
                start.caller().map(str::to_string),
            );
            info!(
                call_sid = %start.call_sid,
                stream_sid = %stream_sid,
                language = %session.language(),
                "media stream started"
            );
            let bridge = Bridge {
                state: state.clone(),
                session,
                stream_sid,
                inbound_format: start.audio_format(),
                tx,
            };
            bridge.run(receiver).await;
        }
        None => {
            debug!("media socket closed before start");
            drop(tx);
        }
    }

    // The writer ends once every sender is gone, closing the socket.
    if let Err(e) = send_task.await {
        warn!("media socket writer task failed: {}", e);
    }
}

/// Reads frames until `start`. Media before `start` is dropped.
async fn wait_for_start(
    receiver: &mut SplitStream<WebSocket>,
) -> Option<(String, StreamStart)> {
    let wait = async {
        while let Some(frame) = receiver.next().await {
            let text = match frame {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    warn!("media socket error before start: {}", e);
                    return None;
                }
            };
            match parse_inbound(text.as_str()) {
                Ok(InboundEvent::Start { stream_sid, start }) => {
                    let sid = stream_sid.unwrap_or_else(|| start.stream_sid.clone());
                    return Some((sid, start));
                }
                Ok(InboundEvent::Connected { protocol }) => {
                    debug!(protocol = ?protocol, "media stream connected");
                }
                Ok(other) => debug!(event = ?other, "dropping frame received before start"),
                Err(e) => warn!("dropping malformed media frame: {}", e),
            }
        }
        None
    };
    match tokio::time::timeout(START_TIMEOUT, wait).await {
        Ok(start) => start,
        Err(_) => {
            warn!("media socket sent no start event within {:?}", START_TIMEOUT);
            None
        }
    }
}

/// The call registered by the inbound webhook, or a fresh one if the
/// stream arrived on its own.
fn resolve_session(state: &AppState, start: &StreamStart) -> Arc<CallSession> {
    if let Some(session) = state.calls.get(&start.call_sid) {
        return session;
    }
    let language = start
        .language()
        .unwrap_or(state.config.languages.default_language);
    state.calls.ring(CallSession::new(
        start.call_sid.clone(),
        start.caller().map(str::to_string),
        None,
        language,
        state.config.voice_for(language),
    ))
}

struct Bridge {
    state: Arc<AppState>,
    session: Arc<CallSession>,
    stream_sid: String,
    inbound_format: AudioFormat,
    tx: mpsc::Sender<String>,
}

impl Bridge {
    async fn run(self, mut receiver: SplitStream<WebSocket>) {
        let cancel = self.session.bridge_token();
        let call_sid = self.session.call_sid().to_string();

        if self.session.state() != CallState::Ringing {
            warn!(call_sid = %call_sid, state = %self.session.state(), "media stream for a call that is not ringing");
            return;
        }

        // Policy snapshot for the whole call.
        let policy = self.state.policy_snapshot();
        let language = self.session.language();
        let voice = self.session.voice();
        let ctx = Arc::new(
            ToolContext::new(call_sid.clone(), language, policy.clone())
                .with_caller(self.session.caller())
                .with_cancellation(cancel.clone()),
        );
        let handler: Arc<dyn ToolHandler> = Arc::new(CallTools {
            registry: self.state.tools.clone(),
            ctx,
        });
        let settings = SessionSettings {
            call_sid: call_sid.clone(),
            voice: voice.clone(),
            instructions: instructions_for(&self.state.config.realtime.instructions, language),
            tools: self.state.tools.manifest(&policy),
        };

        let model_input = AudioFormat::pcm16(self.state.config.realtime.input_sample_rate);
        let model_output = AudioFormat::pcm16(self.state.config.realtime.output_sample_rate);
        let converters = FrameConverter::new(self.inbound_format, model_input).and_then(|inbound| {
            Ok((inbound, FrameConverter::new(model_output, AudioFormat::TELEPHONY)?))
        });
        let (mut inbound, mut outbound) = match converters {
            Ok(pair) => pair,
            Err(e) => {
                error!(call_sid = %call_sid, "cannot convert call audio: {}", e);
                self.finish(BridgeExit::Transfer("audio_unsupported")).await;
                return;
            }
        };

        // Failed connects and unstable sessions, shared by every reconnect
        // of this call.
        let mut strikes = 0u32;
        let Some((mut model, mut events)) = self
            .connect_model(&settings, &handler, &cancel, &mut strikes)
            .await
        else {
            let exit = if cancel.is_cancelled() {
                BridgeExit::Cancelled
            } else {
                BridgeExit::ModelUnavailable
            };
            self.finish(exit).await;
            return;
        };

        if let Err(e) = self.session.transition(CallState::Connected) {
            warn!(call_sid = %call_sid, "cannot connect call: {}", e);
            model.close();
            return;
        }
        let connected = EventPayload::CallConnected {
            call_sid: call_sid.clone(),
            stream_sid: self.stream_sid.clone(),
            language,
            voice,
        };
        let entity = call_sid.clone();
        if let Err(e) = with_conn(&self.state.pool, move |conn| {
            emit_or_warn(conn, &entity, &connected)
        })
        .await
        {
            warn!(call_sid = %call_sid, "failed to record call connect: {}", e);
        }

        let mut session_up = Instant::now();
        let mut session_spoke = false;

        let exit = loop {
            let mut dropped: Option<String> = None;
            tokio::select! {
                _ = cancel.cancelled() => break BridgeExit::Cancelled,

                frame = receiver.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(_))) | None => break BridgeExit::Hangup,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break BridgeExit::TelephonyFailed(e.to_string()),
                    };
                    match parse_inbound(text.as_str()) {
                        Ok(InboundEvent::Media { media, .. }) => {
                            if media.track.as_deref().is_some_and(|t| t != "inbound") {
                                continue;
                            }
                            let pcm = AudioFrame::from_base64(self.inbound_format, &media.payload)
                                .and_then(|frame| inbound.convert(&frame));
                            match pcm {
                                Ok(frame) if frame.is_empty() => {}
                                Ok(frame) => {
                                    if let Err(e) = model.append_audio(frame.data()) {
                                        debug!(call_sid = %call_sid, "model input dropped: {}", e);
                                    }
                                }
                                Err(e) => warn!(call_sid = %call_sid, "dropping undecodable media frame: {}", e),
                            }
                        }
                        Ok(InboundEvent::Dtmf { dtmf, .. }) => {
                            info!(call_sid = %call_sid, digit = %dtmf.digit, "keypad press");
                            if dtmf.digit == "0" {
                                break BridgeExit::Transfer("caller_requested_human");
                            }
                        }
                        Ok(InboundEvent::Stop { .. }) => break BridgeExit::Hangup,
                        Ok(InboundEvent::Mark { mark, .. }) => {
                            debug!(call_sid = %call_sid, mark = ?mark.map(|m| m.name), "playback mark reached");
                        }
                        Ok(InboundEvent::Start { .. }) => {
                            warn!(call_sid = %call_sid, "ignoring repeated start event");
                        }
                        Ok(InboundEvent::Connected { .. }) | Ok(InboundEvent::Unknown) => {}
                        Err(e) => warn!(call_sid = %call_sid, "dropping malformed media frame: {}", e),
                    }
                }

                event = events.recv() => match event {
                    Some(ModelEvent::AudioDelta(pcm)) => {
                        session_spoke = true;
                        let frame = AudioFrame::new(model_output, pcm)
                            .and_then(|frame| outbound.convert(&frame));
                        match frame {
                            Ok(frame) if frame.is_empty() => {}
                            Ok(frame) => self.send(OutboundEvent::media(&self.stream_sid, &frame)),
                            Err(e) => warn!(call_sid = %call_sid, "dropping undecodable model audio: {}", e),
                        }
                    }
                    Some(ModelEvent::SpeechStarted) => {
                        if let Err(e) = outbound.reset() {
                            warn!(call_sid = %call_sid, "failed to reset playback audio: {}", e);
                        }
                        self.send(OutboundEvent::clear(&self.stream_sid));
                    }
                    Some(ModelEvent::TextDelta(text)) => {
                        debug!(call_sid = %call_sid, text = %text, "assistant transcript");
                    }
                    Some(ModelEvent::ResponseCompleted) => {
                        session_spoke = true;
                        debug!(call_sid = %call_sid, "assistant turn completed");
                    }
                    Some(ModelEvent::ToolResolved { call_id, name, result }) => {
                        debug!(call_sid = %call_sid, call_id = %call_id, tool = %name, ok = result.ok, "tool resolved");
                        match result.action {
                            Some(ResultAction::Transfer) => break BridgeExit::Transfer("tool_transfer"),
                            Some(ResultAction::Voicemail) => break BridgeExit::Voicemail,
                            Some(ResultAction::Clarify) | None => {}
                        }
                    }
                    Some(ModelEvent::Error { code, message }) => {
                        warn!(call_sid = %call_sid, code = ?code, "model service error: {}", message);
                    }
                    Some(ModelEvent::Closed { reason }) => dropped = Some(reason),
                    None => dropped = Some("event stream ended".to_string()),
                },
            }

            if let Some(reason) = dropped {
                error!(call_sid = %call_sid, strikes, "model session dropped: {}", reason);
                model.close();
                // A session that held up earns the call a fresh budget.
                if session_spoke || session_up.elapsed() >= STABLE_SESSION {
                    strikes = 0;
                }
                strikes += 1;
                match self
                    .connect_model(&settings, &handler, &cancel, &mut strikes)
                    .await
                {
                    Some((m, e)) => {
                        model = m;
                        events = e;
                        session_up = Instant::now();
                        session_spoke = false;
                        info!(call_sid = %call_sid, "model session re-established");
                    }
                    None if cancel.is_cancelled() => break BridgeExit::Cancelled,
                    None => break BridgeExit::ModelUnavailable,
                }
            }
        };

        // Outstanding tool calls are cancelled with the session; their
        // results are discarded.
        model.close();
        self.finish(exit).await;
    }

    /// Dials the model service until it answers or the call's strikes
    /// reach `max_connect_attempts`. Every failed attempt is a strike.
    /// Returns `None` when the budget is spent or the call was cancelled.
    async fn connect_model(
        &self,
        settings: &SessionSettings,
        handler: &Arc<dyn ToolHandler>,
        cancel: &CancellationToken,
        strikes: &mut u32,
    ) -> Option<(RealtimeSession, mpsc::Receiver<ModelEvent>)> {
        let config = &self.state.config.realtime;
        let max_attempts = config.max_connect_attempts.max(1);
        while *strikes < max_attempts {
            let attempt = *strikes + 1;
            let delay = config.backoff_before(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            let connect = RealtimeSession::connect(config, settings.clone(), handler.clone());
            let result = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = connect => result,
            };
            match result {
                Ok(pair) => {
                    if attempt > 1 {
                        info!(call_sid = %settings.call_sid, attempt, "model session connected after retry");
                    }
                    return Some(pair);
                }
                Err(e) => {
                    *strikes += 1;
                    warn!(
                        call_sid = %settings.call_sid,
                        attempt,
                        max_attempts,
                        "model session connect failed: {}",
                        e
                    );
                }
            }
        }
        error!(call_sid = %settings.call_sid, max_attempts, "model service unavailable");
        None
    }

    fn send(&self, event: OutboundEvent) {
        match self.tx.try_send(event.to_json()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(call_sid = %self.session.call_sid(), "telephony writer backed up, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(call_sid = %self.session.call_sid(), "telephony writer closed");
            }
        }
    }

    /// Applies the exit to the call and issues the matching instruction on
    /// the telephony leg.
    async fn finish(self, exit: BridgeExit) {
        let Bridge {
            state,
            session,
            tx,
            ..
        } = self;
        // Closing the writer closes the telephony socket.
        drop(tx);

        let call_sid = session.call_sid().to_string();
        let language = session.language();
        info!(call_sid = %call_sid, exit = ?exit, "media bridge ended");

        match exit {
            BridgeExit::Cancelled => {}
            BridgeExit::Hangup => {
                state
                    .calls
                    .settle(&state.pool, &session, CallState::Completed, "caller_hangup")
                    .await;
            }
            BridgeExit::TelephonyFailed(reason) => {
                error!(call_sid = %call_sid, "telephony leg failed: {}", reason);
                if state
                    .calls
                    .settle(&state.pool, &session, CallState::Failed, "telephony_error")
                    .await
                {
                    if let Err(e) = state.telephony.hangup_with_apology(&call_sid, language).await {
                        warn!(call_sid = %call_sid, "apology hangup failed: {}", e);
                    }
                }
            }
            BridgeExit::Transfer(outcome) => transfer(&state, &session, outcome, language).await,
            BridgeExit::ModelUnavailable => {
                transfer(&state, &session, "model_unavailable", language).await
            }
            BridgeExit::Voicemail => {
                if let Err(e) = session.transition(CallState::VoicemailRecording) {
                    warn!(call_sid = %call_sid, "cannot start voicemail: {}", e);
                    return;
                }
                session.end_bridge();
                if let Err(e) = state.telephony.record_voicemail(&call_sid, language).await {
                    error!(call_sid = %call_sid, "voicemail recording could not start: {}", e);
                    if state
                        .calls
                        .settle(&state.pool, &session, CallState::Failed, "voicemail_unavailable")
                        .await
                    {
                        if let Err(e) =
                            state.telephony.hangup_with_apology(&call_sid, language).await
                        {
                            warn!(call_sid = %call_sid, "apology hangup failed: {}", e);
                        }
                    }
                }
            }
        }
    }
}

async fn transfer(state: &AppState, session: &CallSession, outcome: &str, language: Language) {
    let call_sid = session.call_sid();
    if !state
        .calls
        .settle(&state.pool, session, CallState::Transferred, outcome)
        .await
    {
        return;
    }
    if let Err(e) = state.telephony.redirect_to_human(call_sid, language).await {
        error!(call_sid = %call_sid, "human redirect failed: {}", e);
        if let Err(e) = state.telephony.hangup_with_apology(call_sid, language).await {
            warn!(call_sid = %call_sid, "apology hangup failed: {}", e);
        }
    }
}

/// Persona text for a call, with a language directive for Spanish calls.
pub fn instructions_for(base: &str, language: Language) -> String {
    match language {
        Language::English => base.to_string(),
        Language::Spanish => format!("{base}\n\n{SPANISH_DIRECTIVE}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanish_calls_get_a_language_directive() {
        assert_eq!(instructions_for("Be brief.", Language::English), "Be brief.");
        let es = instructions_for("Be brief.", Language::Spanish);
        assert!(es.starts_with("Be brief.\n\n"));
        assert!(es.contains("Respond only in Spanish"));
    }
}
