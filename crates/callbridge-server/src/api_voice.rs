//! Telephony gateway webhooks.

use std::sync::Arc;

use axum::{
    extract::{Extension, Form},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use callbridge_catalog::{set_voicemail_transcript, store_voicemail};
use callbridge_db::with_conn;
use callbridge_observe::{emit_or_warn, EventPayload};
use callbridge_types::{CallState, Language};
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::ApiError;
use crate::call::CallSession;
use crate::telephony::{connect_stream_markup, goodbye_markup};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct IncomingCallForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusCallbackForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "CallDuration", default)]
    pub call_duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordingCallbackForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "RecordingUrl")]
    pub recording_url: String,
    #[serde(rename = "RecordingDuration", default)]
    pub recording_duration: Option<String>,
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

/// Handler for `POST /voice/incoming`.
///
/// Registers the call as ringing and answers with markup that greets the
/// caller and opens the media stream.
pub async fn incoming_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<IncomingCallForm>,
) -> Result<Response, ApiError> {
    if form.call_sid.trim().is_empty() {
        return Err(ApiError::BadRequest("CallSid is required".to_string()));
    }
    let from = form.from.filter(|f| !f.is_empty());
    let to = form.to.filter(|t| !t.is_empty());
    let language = state.config.languages.default_language;

    let session = state.calls.ring(CallSession::new(
        form.call_sid.clone(),
        from.clone(),
        to.clone(),
        language,
        state.config.voice_for(language),
    ));
    info!(call_sid = %form.call_sid, state = %session.state(), "inbound call");

    let ringing = EventPayload::CallRinging {
        call_sid: form.call_sid.clone(),
        from: from.clone(),
        to,
    };
    let entity = form.call_sid.clone();
    with_conn(&state.pool, move |conn| emit_or_warn(conn, &entity, &ringing)).await?;

    let stream_url = state.config.media_stream_url();
    let caller = from.unwrap_or_default();
    let markup = connect_stream_markup(
        language,
        &stream_url,
        &[
            ("callSid", form.call_sid.as_str()),
            ("from", caller.as_str()),
            ("language", language.tag()),
        ],
    );
    Ok(xml(markup))
}

/// Handler for `POST /voice/status`.
///
/// Statuses for unknown or settled calls are acknowledged and ignored.
pub async fn status_callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<StatusCallbackForm>,
) -> StatusCode {
    let Some(session) = state.calls.get(&form.call_sid) else {
        info!(call_sid = %form.call_sid, status = %form.call_status, "status for unknown call ignored");
        return StatusCode::NO_CONTENT;
    };
    info!(
        call_sid = %form.call_sid,
        status = %form.call_status,
        duration = ?form.call_duration,
        state = %session.state(),
        "call status callback"
    );

    let settlement = match (form.call_status.as_str(), session.state()) {
        ("completed", CallState::Connected) => Some((CallState::Completed, "caller_hangup")),
        ("completed", CallState::Ringing) => {
            Some((CallState::Failed, "abandoned_before_connect"))
        }
        // The recording callback or the voicemail sweep settles these.
        ("completed", _) => None,
        ("failed", _) => Some((CallState::Failed, "failed")),
        ("busy", _) => Some((CallState::Failed, "busy")),
        ("no-answer", _) => Some((CallState::Failed, "no_answer")),
        ("canceled", _) => Some((CallState::Failed, "canceled")),
        _ => None,
    };
    if let Some((final_state, outcome)) = settlement {
        state
            .calls
            .settle(&state.pool, &session, final_state, outcome)
            .await;
    }
    StatusCode::NO_CONTENT
}

/// Handler for `POST /voice/recording`.
///
/// Stores the voicemail, queues its transcription and settles the call.
pub async fn recording_callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<RecordingCallbackForm>,
) -> Result<Response, ApiError> {
    if form.recording_url.trim().is_empty() {
        return Err(ApiError::BadRequest("RecordingUrl is required".to_string()));
    }
    let duration_secs = form
        .recording_duration
        .as_deref()
        .and_then(|d| d.trim().parse::<i64>().ok())
        .unwrap_or(0);
    let session = state.calls.get(&form.call_sid);
    let language = session
        .as_ref()
        .map(|s| s.language())
        .unwrap_or(state.config.languages.default_language);

    let call_sid = form.call_sid.clone();
    let url = form.recording_url.clone();
    with_conn(&state.pool, move |conn| {
        store_voicemail(conn, &call_sid, &url, duration_secs)
    })
    .await?
    .map_err(|e| ApiError::InternalServerError(format!("failed to store voicemail: {}", e)))?;
    info!(call_sid = %form.call_sid, duration_secs, "voicemail stored");

    if state.stt.is_configured() {
        tokio::spawn(transcribe_voicemail(
            state.clone(),
            form.call_sid.clone(),
            form.recording_url.clone(),
            language,
        ));
    }

    match &session {
        Some(session) if session.state() == CallState::VoicemailRecording => {
            state
                .calls
                .settle(&state.pool, session, CallState::VoicemailStored, "voicemail")
                .await;
        }
        Some(session) => {
            warn!(call_sid = %form.call_sid, state = %session.state(), "recording for a call that was not recording");
        }
        None => {}
    }

    Ok(xml(goodbye_markup(language)))
}

/// Downloads a recording and stores its transcript. Failures are logged
/// only; the voicemail row stays without a transcript.
async fn transcribe_voicemail(
    state: Arc<AppState>,
    call_sid: String,
    recording_url: String,
    language: Language,
) {
    let audio = match download_recording(&state, &recording_url).await {
        Ok(audio) => audio,
        Err(e) => {
            warn!(call_sid = %call_sid, "voicemail download failed: {}", e);
            return;
        }
    };
    let transcript = match state.stt.transcribe(&audio, language).await {
        Ok(text) => text,
        Err(e) => {
            warn!(call_sid = %call_sid, "voicemail transcription failed: {}", e);
            return;
        }
    };
    let sid = call_sid.clone();
    match with_conn(&state.pool, move |conn| {
        set_voicemail_transcript(conn, &sid, &transcript)
    })
    .await
    {
        Ok(Ok(())) => info!(call_sid = %call_sid, "voicemail transcribed"),
        Ok(Err(e)) => warn!(call_sid = %call_sid, "failed to store transcript: {}", e),
        Err(e) => warn!(call_sid = %call_sid, "failed to store transcript: {}", e),
    }
}

async fn download_recording(state: &AppState, recording_url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let url = recording_media_url(recording_url);
    let telephony = &state.config.telephony;
    let mut request = state.http.get(&url);
    if !telephony.account_sid.is_empty() {
        request = request.basic_auth(&telephony.account_sid, Some(&telephony.auth_token));
    }
    let bytes = request.send().await?.error_for_status()?.bytes().await?;
    Ok(bytes.to_vec())
}

/// The gateway serves a recording in the format named by its extension.
fn recording_media_url(recording_url: &str) -> String {
    let lower = recording_url.to_ascii_lowercase();
    if lower.ends_with(".wav") || lower.ends_with(".mp3") {
        recording_url.to_string()
    } else {
        format!("{recording_url}.wav")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recordings_are_fetched_as_wav() {
        assert_eq!(
            recording_media_url("https://gw.example/Recordings/RE1"),
            "https://gw.example/Recordings/RE1.wav"
        );
        assert_eq!(
            recording_media_url("https://gw.example/Recordings/RE1.mp3"),
            "https://gw.example/Recordings/RE1.mp3"
        );
    }
}
