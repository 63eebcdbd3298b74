//! Event domain, payload, and record types for the audit log.

use callbridge_types::{CallState, GatingAction, Language, RetrievalCandidate};
use serde::{Deserialize, Serialize};

/// Audit event domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventDomain {
    /// Call lifecycle: ringing, connected, ended.
    Call,
    /// Tool invocations resolved for the model.
    Tool,
    /// Questions put to the confidence gate.
    Knowledge,
    /// Administrative configuration changes.
    Admin,
}

impl EventDomain {
    /// Returns the canonical string label for this domain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Tool => "TOOL",
            Self::Knowledge => "KNOWLEDGE",
            Self::Admin => "ADMIN",
        }
    }
}

impl std::fmt::Display for EventDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventDomain {
    type Err = ParseEventDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CALL" => Ok(Self::Call),
            "TOOL" => Ok(Self::Tool),
            "KNOWLEDGE" => Ok(Self::Knowledge),
            "ADMIN" => Ok(Self::Admin),
            _ => Err(ParseEventDomainError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event domain string.
#[derive(Debug, Clone)]
pub struct ParseEventDomainError(pub String);

impl std::fmt::Display for ParseEventDomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event domain: {}", self.0)
    }
}

impl std::error::Error for ParseEventDomainError {}

/// Structured event payloads, stored as JSON in `event_log.payload_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // ── Call domain ──────────────────────────────────────────────────
    /// The gateway announced an inbound call.
    CallRinging {
        call_sid: String,
        from: Option<String>,
        to: Option<String>,
    },

    /// Both legs opened and audio is flowing.
    CallConnected {
        call_sid: String,
        stream_sid: String,
        language: Language,
        voice: String,
    },

    /// The call settled in a terminal state.
    CallEnded {
        call_sid: String,
        final_state: CallState,
        outcome: String,
        duration_secs: i64,
    },

    // ── Tool domain ──────────────────────────────────────────────────
    /// A tool call was resolved and its result returned to the model.
    ToolInvoked {
        call_sid: String,
        tool: String,
        ok: bool,
        error: Option<String>,
        action: Option<String>,
        elapsed_ms: u64,
    },

    // ── Knowledge domain ─────────────────────────────────────────────
    /// A caller question went through the confidence gate. Recorded for
    /// every question, whatever the outcome.
    QuestionAsked {
        call_sid: String,
        question: String,
        language: Language,
        threshold: f32,
        gated: bool,
        candidates: Vec<RetrievalCandidate>,
    },

    // ── Admin domain ─────────────────────────────────────────────────
    /// The service policy was replaced.
    PolicyUpdated {
        version_id: String,
        min_confidence: f32,
        low_confidence_action: GatingAction,
        enabled_tools: Vec<String>,
    },
}

impl EventPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CallRinging { .. } => "CALL_RINGING",
            Self::CallConnected { .. } => "CALL_CONNECTED",
            Self::CallEnded { .. } => "CALL_ENDED",
            Self::ToolInvoked { .. } => "TOOL_INVOKED",
            Self::QuestionAsked { .. } => "QUESTION_ASKED",
            Self::PolicyUpdated { .. } => "POLICY_UPDATED",
        }
    }

    /// Returns the `entity_type` column value. Everything that happens
    /// during a call is keyed by the call.
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::PolicyUpdated { .. } => "policy",
            _ => "call",
        }
    }

    /// Returns the domain for this payload.
    pub fn domain(&self) -> EventDomain {
        match self {
            Self::CallRinging { .. } | Self::CallConnected { .. } | Self::CallEnded { .. } => {
                EventDomain::Call
            }
            Self::ToolInvoked { .. } => EventDomain::Tool,
            Self::QuestionAsked { .. } => EventDomain::Knowledge,
            Self::PolicyUpdated { .. } => EventDomain::Admin,
        }
    }
}

/// A single row from the `event_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    /// The event domain (e.g., `CALL`, `TOOL`).
    pub domain: String,
    /// The specific event type (e.g., `CALL_ENDED`).
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    /// Monotonically increasing sequence number across the whole log.
    pub seq: i64,
    pub payload_json: String,
    pub occurred_at: String,
}

impl AuditEvent {
    /// Decodes the stored payload.
    pub fn payload(&self) -> Result<EventPayload, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}
