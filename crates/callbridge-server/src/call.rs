//! Call state machine and the registry of live calls.
//!
//! A [`CallSession`] exists from the inbound-call webhook until the call
//! settles in a terminal state. Terminal states are absorbing: the first
//! settlement wins and every later attempt is a no-op. Settling ends the
//! bridge (both legs close through the session's cancellation token),
//! removes the call from the registry, and writes the outcome record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use callbridge_db::{with_conn, DbPool};
use callbridge_observe::{emit_or_warn, record_outcome, EventPayload};
use callbridge_types::{CallState, Language, OutcomeRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("invalid call transition {from} -> {to}")]
    InvalidTransition { from: CallState, to: CallState },
}

#[derive(Debug)]
struct CallInner {
    state: CallState,
    state_since: Instant,
    language: Language,
    voice: String,
    from: Option<String>,
    to: Option<String>,
    stream_sid: Option<String>,
}

/// One phone call.
#[derive(Debug)]
pub struct CallSession {
    call_sid: String,
    started_at: DateTime<Utc>,
    started: Instant,
    inner: Mutex<CallInner>,
    bridge: CancellationToken,
}

/// Read-only view of a call for the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_sid: String,
    pub state: CallState,
    pub language: Language,
    pub voice: String,
    pub from: Option<String>,
    pub stream_sid: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(
        call_sid: impl Into<String>,
        from: Option<String>,
        to: Option<String>,
        language: Language,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            call_sid: call_sid.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            inner: Mutex::new(CallInner {
                state: CallState::Ringing,
                state_since: Instant::now(),
                language,
                voice: voice.into(),
                from,
                to,
                stream_sid: None,
            }),
            bridge: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(call_sid = %self.call_sid, "call state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn state(&self) -> CallState {
        self.lock().state
    }

    pub fn language(&self) -> Language {
        self.lock().language
    }

    pub fn voice(&self) -> String {
        self.lock().voice.clone()
    }

    pub fn caller(&self) -> Option<String> {
        self.lock().from.clone()
    }

    pub fn to(&self) -> Option<String> {
        self.lock().to.clone()
    }

    /// Applies per-stream overrides announced in the media `start` event.
    pub fn attach_stream(
        &self,
        stream_sid: &str,
        language: Option<Language>,
        voice: Option<String>,
        caller: Option<String>,
    ) {
        let mut inner = self.lock();
        inner.stream_sid = Some(stream_sid.to_string());
        if let Some(language) = language {
            inner.language = language;
        }
        if let Some(voice) = voice {
            inner.voice = voice;
        }
        if caller.is_some() {
            inner.from = caller;
        }
    }

    /// Moves to `next`, or fails if the edge is not allowed.
    pub fn transition(&self, next: CallState) -> Result<CallState, CallError> {
        let mut inner = self.lock();
        let from = inner.state;
        if !from.can_transition_to(next) {
            return Err(CallError::InvalidTransition { from, to: next });
        }
        inner.state = next;
        inner.state_since = Instant::now();
        info!(call_sid = %self.call_sid, from = %from, to = %next, "call state changed");
        Ok(from)
    }

    /// How long the call has been in its current state.
    pub fn time_in_state(&self) -> Duration {
        self.lock().state_since.elapsed()
    }

    /// Token cancelled when the model bridge must end: on a handoff, on
    /// settlement, or on an external hangup.
    pub fn bridge_token(&self) -> CancellationToken {
        self.bridge.clone()
    }

    /// Ends the bridge. Idempotent.
    pub fn end_bridge(&self) {
        self.bridge.cancel();
    }

    pub fn summary(&self) -> CallSummary {
        let inner = self.lock();
        CallSummary {
            call_sid: self.call_sid.clone(),
            state: inner.state,
            language: inner.language,
            voice: inner.voice.clone(),
            from: inner.from.clone(),
            stream_sid: inner.stream_sid.clone(),
            started_at: self.started_at,
        }
    }

    fn outcome(&self, final_state: CallState, outcome: &str) -> OutcomeRecord {
        let inner = self.lock();
        OutcomeRecord {
            call_sid: self.call_sid.clone(),
            final_state,
            outcome: outcome.to_string(),
            language: inner.language,
            voice: inner.voice.clone(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            duration_secs: self.started.elapsed().as_secs() as i64,
        }
    }
}

/// Live calls by call SID.
#[derive(Clone, Default)]
pub struct CallRegistry {
    calls: Arc<RwLock<HashMap<String, Arc<CallSession>>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a ringing call. A repeated webhook for the same call
    /// returns the existing session.
    pub fn ring(&self, session: CallSession) -> Arc<CallSession> {
        let mut calls = self.calls.write().unwrap_or_else(|p| p.into_inner());
        calls
            .entry(session.call_sid.clone())
            .or_insert_with(|| Arc::new(session))
            .clone()
    }

    pub fn get(&self, call_sid: &str) -> Option<Arc<CallSession>> {
        self.calls
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(call_sid)
            .cloned()
    }

    fn remove(&self, call_sid: &str) {
        self.calls
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(call_sid);
    }

    pub fn len(&self) -> usize {
        self.calls.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summaries of every live call, oldest first.
    pub fn summaries(&self) -> Vec<CallSummary> {
        let calls: Vec<Arc<CallSession>> = self
            .calls
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        let mut summaries: Vec<CallSummary> = calls.iter().map(|c| c.summary()).collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }

    /// Calls that have sat in `state` for at least `older_than`.
    pub fn stuck_in(&self, state: CallState, older_than: Duration) -> Vec<Arc<CallSession>> {
        self.calls
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|c| {
                let inner = c.lock();
                inner.state == state && inner.state_since.elapsed() >= older_than
            })
            .cloned()
            .collect()
    }

    /// Moves a call into a terminal state.
    ///
    /// Returns `false` if the call had already settled or the edge is not
    /// allowed. On success the bridge is ended, the call leaves the
    /// registry, and `CALL_ENDED` plus the outcome row are written.
    pub async fn settle(
        &self,
        pool: &DbPool,
        session: &CallSession,
        final_state: CallState,
        outcome: &str,
    ) -> bool {
        debug_assert!(final_state.is_terminal());
        if let Err(e) = session.transition(final_state) {
            info!(call_sid = %session.call_sid, "not settling call: {}", e);
            return false;
        }
        session.end_bridge();
        self.remove(&session.call_sid);

        let record = session.outcome(final_state, outcome);
        info!(
            call_sid = %record.call_sid,
            state = %final_state,
            outcome,
            duration_secs = record.duration_secs,
            "call ended"
        );
        let call_sid = record.call_sid.clone();
        let written = with_conn(pool, move |conn| {
            emit_or_warn(
                conn,
                &record.call_sid,
                &EventPayload::CallEnded {
                    call_sid: record.call_sid.clone(),
                    final_state: record.final_state,
                    outcome: record.outcome.clone(),
                    duration_secs: record.duration_secs,
                },
            );
            record_outcome(conn, &record)
        })
        .await;
        match written {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(call_sid = %call_sid, "failed to record call outcome: {}", e),
            Err(e) => warn!(call_sid = %call_sid, "failed to record call outcome: {}", e),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(sid: &str) -> CallSession {
        CallSession::new(sid, Some("+15550001".into()), None, Language::English, "alloy")
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let call = session("CA1");
        assert_eq!(call.transition(CallState::Connected), Ok(CallState::Ringing));
        assert_eq!(
            call.transition(CallState::VoicemailRecording),
            Ok(CallState::Connected)
        );
        assert_eq!(
            call.transition(CallState::Completed),
            Err(CallError::InvalidTransition {
                from: CallState::VoicemailRecording,
                to: CallState::Completed
            })
        );
        assert!(call.transition(CallState::VoicemailStored).is_ok());
        assert!(call.transition(CallState::Failed).is_err());
    }

    #[test]
    fn ring_is_idempotent() {
        let registry = CallRegistry::new();
        let first = registry.ring(session("CA1"));
        first.transition(CallState::Connected).unwrap();
        let again = registry.ring(session("CA1"));
        assert_eq!(again.state(), CallState::Connected);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stuck_calls_are_found_by_state_and_age() {
        let registry = CallRegistry::new();
        let recording = registry.ring(session("CA1"));
        recording.transition(CallState::Connected).unwrap();
        recording.transition(CallState::VoicemailRecording).unwrap();
        registry.ring(session("CA2"));

        let stuck = registry.stuck_in(CallState::VoicemailRecording, Duration::ZERO);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].call_sid(), "CA1");
        assert!(registry
            .stuck_in(CallState::VoicemailRecording, Duration::from_secs(3600))
            .is_empty());
        assert!(recording.time_in_state() < Duration::from_secs(3600));
    }

    #[test]
    fn stream_overrides_apply() {
        let call = session("CA1");
        call.attach_stream("MZ1", Some(Language::Spanish), None, Some("+15559999".into()));
        let summary = call.summary();
        assert_eq!(summary.language, Language::Spanish);
        assert_eq!(summary.voice, "alloy");
        assert_eq!(summary.from.as_deref(), Some("+15559999"));
        assert_eq!(summary.stream_sid.as_deref(), Some("MZ1"));
    }

    #[tokio::test]
    async fn settle_is_absorbing_and_records_once() {
        let db = tempfile::NamedTempFile::new().unwrap();
        let pool = callbridge_db::create_pool(
            db.path().to_str().unwrap(),
            callbridge_db::DbRuntimeSettings::default(),
        )
        .unwrap();
        callbridge_db::run_migrations(&pool.get().unwrap()).unwrap();

        let registry = CallRegistry::new();
        let call = registry.ring(session("CA1"));
        call.transition(CallState::Connected).unwrap();
        let token = call.bridge_token();

        assert!(registry.settle(&pool, &call, CallState::Completed, "hangup").await);
        assert!(token.is_cancelled());
        assert!(registry.get("CA1").is_none());
        assert!(!registry.settle(&pool, &call, CallState::Failed, "late").await);

        let outcome = callbridge_observe::get_outcome(&pool.get().unwrap(), "CA1")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.final_state, CallState::Completed);
        assert_eq!(outcome.outcome, "hangup");
    }
}
