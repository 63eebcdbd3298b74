//! Business records backing the phone assistant.
//!
//! Events and their ticket tiers (the shared inventory counters), orders,
//! caller inquiries and messages, voicemails, and persisted policy versions.
//! Every function takes a borrowed [`rusqlite::Connection`]; callers run
//! them on the blocking pool with a pooled connection.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use thiserror::Error;

mod caller;
mod events;
mod orders;
mod policy;

pub use caller::{
    get_voicemail, insert_inquiry, insert_message, set_voicemail_transcript, store_voicemail,
    CreateInquiryParams, CreateMessageParams, Voicemail,
};
pub use events::{
    add_tier, create_event, get_event, get_tier, list_tiers, list_upcoming_events,
    resolve_event, try_increment_sold, CreateEventParams, Event, TicketTier,
};
pub use orders::{get_order, insert_order, CreateOrderParams, Order};
pub use policy::{latest_policy, save_policy_version};

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Characters used in caller-facing codes. Omits 0/O and 1/I so codes
/// survive being read aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generates a reference code such as `INQ-7KQ2MX`.
pub fn reference_code(prefix: &str) -> String {
    format!("{}-{}", prefix, random_code(6))
}

/// Generates an order confirmation code.
pub fn confirmation_code() -> String {
    random_code(8)
}

fn random_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical text form for timestamps stored by this crate.
///
/// Fixed-width UTC so lexical order in SQLite matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::Connection;

    pub fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().expect("failed to open in-memory db");
        callbridge_db::run_migrations(&conn).expect("failed to run migrations");
        conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reference_codes_use_spoken_alphabet() {
        let code = reference_code("INQ");
        assert!(code.starts_with("INQ-"));
        let suffix = &code[4..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert_eq!(confirmation_code().len(), 8);
    }

    #[test]
    fn timestamps_round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 11, 3, 19, 30, 0).unwrap();
        let text = format_timestamp(ts);
        assert_eq!(text, "2026-11-03T19:30:00Z");
        assert_eq!(parse_timestamp(0, &text).unwrap(), ts);
    }
}
