//! Shared types for the callbridge voice service.
//!
//! This crate provides the foundational types used across all callbridge
//! crates: the call lifecycle states, the structured result every tool call
//! resolves to, the tool manifest entry, knowledge retrieval candidates, and
//! the outcome record produced when a call settles.
//!
//! No crate in the workspace depends on anything *except* `callbridge-types`
//! for cross-cutting type definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod policy;
mod voice;

pub use policy::{ConfidencePolicy, GatingAction, PolicyError, ServicePolicy};
pub use voice::{AudioEncoding, AudioFormat, Language};

/// Lifecycle state of one phone call.
///
/// `Ringing → Connected → {Completed, Transferred, VoicemailRecording →
/// VoicemailStored, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    /// Call accepted by the telephony layer, no media bridge yet.
    Ringing,
    /// Both legs are open and audio is flowing.
    Connected,
    /// The caller hung up normally.
    Completed,
    /// The caller was redirected to a human-staffed number.
    Transferred,
    /// The bridge is closed and the telephony leg is recording a message.
    VoicemailRecording,
    /// The recording completed and was stored.
    VoicemailStored,
    /// An unrecoverable error ended the call.
    Failed,
}

impl CallState {
    /// Returns the string label for this state.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ringing => "RINGING",
            Self::Connected => "CONNECTED",
            Self::Completed => "COMPLETED",
            Self::Transferred => "TRANSFERRED",
            Self::VoicemailRecording => "VOICEMAIL_RECORDING",
            Self::VoicemailStored => "VOICEMAIL_STORED",
            Self::Failed => "FAILED",
        }
    }

    /// Terminal states are absorbing: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Transferred | Self::VoicemailStored | Self::Failed
        )
    }

    /// Returns `true` if the state machine permits `self → next`.
    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Ringing, Connected)
                | (Ringing, Transferred)
                | (Ringing, Failed)
                | (Connected, Completed)
                | (Connected, Transferred)
                | (Connected, VoicemailRecording)
                | (Connected, Failed)
                | (VoicemailRecording, VoicemailStored)
                | (VoicemailRecording, Failed)
        )
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Action tag a tool result can carry for the call state machine or the
/// model to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultAction {
    /// End the bridge and redirect the caller to a human.
    Transfer,
    /// End the bridge and record a voicemail.
    Voicemail,
    /// Ask the caller to rephrase; no call-level effect.
    Clarify,
}

impl ResultAction {
    /// Wire form, as serialised in tool results.
    pub fn label(self) -> &'static str {
        match self {
            Self::Transfer => "TRANSFER",
            Self::Voicemail => "VOICEMAIL",
            Self::Clarify => "CLARIFY",
        }
    }

    /// Whether this action ends the model bridge for the call.
    pub fn ends_bridge(self) -> bool {
        matches!(self, Self::Transfer | Self::Voicemail)
    }
}

/// Structured outcome of one tool invocation.
///
/// Serialises as `{ok, error?, action?, ...payload}`. Every invocation
/// resolves to exactly one `ToolResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ResultAction>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ToolResult {
    /// A successful result with an empty payload.
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
            action: None,
            payload: Map::new(),
        }
    }

    /// A non-error negative outcome (e.g. nothing found) with a message for
    /// the model to relay conversationally.
    pub fn negative(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: None,
            action: None,
            payload: Map::new(),
        }
        .with("message", message.into())
    }

    /// A failed result carrying an error string.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            action: None,
            payload: Map::new(),
        }
    }

    /// The result for a tool name the registry does not know.
    pub fn unknown_tool(name: &str) -> Self {
        Self::failure(format!("Unknown tool: {}", name))
    }

    /// Adds a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Attaches an action tag.
    pub fn with_action(mut self, action: ResultAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Returns a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Serialises the result for the model service. Falls back to a fixed
    /// failure document if serialisation is impossible.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"unserializable tool result"}"#.to_string())
    }
}

/// One entry of the model-facing tool manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub input_schema: Value,
}

/// A scored passage returned by knowledge retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub text: String,
    pub source: String,
    /// Similarity score in `[0, 1]`.
    pub score: f32,
}

/// Sorts candidates by descending score and clamps scores into `[0, 1]`.
///
/// NaN scores are treated as zero.
pub fn rank_candidates(candidates: &mut [RetrievalCandidate]) {
    for c in candidates.iter_mut() {
        c.score = if c.score.is_nan() {
            0.0
        } else {
            c.score.clamp(0.0, 1.0)
        };
    }
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Final record emitted when a call reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub call_sid: String,
    pub final_state: CallState,
    /// Short machine tag describing why the call ended (e.g. `hangup`,
    /// `tool_transfer`, `model_unavailable`).
    pub outcome: String,
    pub language: Language,
    pub voice: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
}
