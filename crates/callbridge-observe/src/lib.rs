//! Audit trail for the callbridge voice service.
//!
//! Every call lifecycle edge, tool invocation, knowledge question and
//! policy change is appended to the `event_log` table, and every call that
//! settles leaves one row in `call_outcomes`. The log is write-only from the
//! call path; analytics and operators read it.
//!
//! # Event domains
//!
//! | Domain | Event types |
//! |--------|-------------|
//! | `CALL` | `CALL_RINGING`, `CALL_CONNECTED`, `CALL_ENDED` |
//! | `TOOL` | `TOOL_INVOKED` |
//! | `KNOWLEDGE` | `QUESTION_ASKED` |
//! | `ADMIN` | `POLICY_UPDATED` |
//!
//! # Usage
//!
//! ```rust,ignore
//! use callbridge_observe::{emit_event, EventPayload};
//!
//! emit_event(
//!     &conn,
//!     &call_sid,
//!     &EventPayload::CallRinging {
//!         call_sid: call_sid.clone(),
//!         from: Some(from),
//!         to: None,
//!     },
//! )?;
//! ```

mod error;
mod event;
mod store;

pub use error::ObserveError;
pub use event::{AuditEvent, EventDomain, EventPayload, ParseEventDomainError};
pub use store::{emit_event, emit_or_warn, get_outcome, query_events, record_outcome, EventFilter};

#[cfg(test)]
mod tests;
