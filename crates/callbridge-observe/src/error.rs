//! Error types for the audit layer.

/// Errors that can occur during event log operations.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// A database operation failed.
    #[error("observe database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("observe serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored outcome row could not be decoded.
    #[error("malformed outcome record for {call_sid}: {reason}")]
    MalformedOutcome { call_sid: String, reason: String },
}
