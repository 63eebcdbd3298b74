//! Records captured from callers: inquiries, messages and voicemails.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::{reference_code, CatalogError};

#[derive(Debug, Clone)]
pub struct CreateInquiryParams {
    pub call_sid: String,
    pub caller_name: Option<String>,
    pub caller_phone: Option<String>,
    pub topic: String,
    pub details: String,
}

#[derive(Debug, Clone)]
pub struct CreateMessageParams {
    pub call_sid: String,
    pub recipient: String,
    pub caller_name: Option<String>,
    pub caller_phone: Option<String>,
    pub body: String,
}

/// A recorded voicemail and, once available, its transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Voicemail {
    pub call_sid: String,
    pub recording_url: String,
    pub duration_secs: i64,
    pub transcript: Option<String>,
    pub created_at: String,
    pub transcribed_at: Option<String>,
}

/// Stores an inquiry and returns its `INQ-` reference code.
pub fn insert_inquiry(
    conn: &Connection,
    params: &CreateInquiryParams,
) -> Result<String, CatalogError> {
    let code = reference_code("INQ");
    conn.execute(
        "INSERT INTO inquiries (reference_code, call_sid, caller_name, caller_phone, topic, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            code,
            params.call_sid,
            params.caller_name,
            params.caller_phone,
            params.topic,
            params.details,
        ],
    )?;
    Ok(code)
}

/// Stores a message for a staff member and returns its `MSG-` reference code.
pub fn insert_message(
    conn: &Connection,
    params: &CreateMessageParams,
) -> Result<String, CatalogError> {
    let code = reference_code("MSG");
    conn.execute(
        "INSERT INTO caller_messages (reference_code, call_sid, recipient, caller_name, caller_phone, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            code,
            params.call_sid,
            params.recipient,
            params.caller_name,
            params.caller_phone,
            params.body,
        ],
    )?;
    Ok(code)
}

/// Records a finished voicemail recording.
///
/// The gateway may deliver the recording callback more than once; a repeat
/// replaces the URL and duration and keeps any transcript already stored.
pub fn store_voicemail(
    conn: &Connection,
    call_sid: &str,
    recording_url: &str,
    duration_secs: i64,
) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT INTO voicemails (call_sid, recording_url, duration_secs) VALUES (?1, ?2, ?3)
         ON CONFLICT (call_sid) DO UPDATE SET
            recording_url = excluded.recording_url,
            duration_secs = excluded.duration_secs",
        params![call_sid, recording_url, duration_secs],
    )?;
    Ok(())
}

pub fn set_voicemail_transcript(
    conn: &Connection,
    call_sid: &str,
    transcript: &str,
) -> Result<(), CatalogError> {
    let count = conn.execute(
        "UPDATE voicemails SET transcript = ?1, transcribed_at = datetime('now') WHERE call_sid = ?2",
        params![transcript, call_sid],
    )?;
    if count == 0 {
        return Err(CatalogError::NotFound(format!("voicemail {call_sid}")));
    }
    Ok(())
}

pub fn get_voicemail(conn: &Connection, call_sid: &str) -> Result<Voicemail, CatalogError> {
    conn.query_row(
        "SELECT call_sid, recording_url, duration_secs, transcript, created_at, transcribed_at
         FROM voicemails WHERE call_sid = ?1",
        [call_sid],
        |row| {
            Ok(Voicemail {
                call_sid: row.get(0)?,
                recording_url: row.get(1)?,
                duration_secs: row.get(2)?,
                transcript: row.get(3)?,
                created_at: row.get(4)?,
                transcribed_at: row.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CatalogError::NotFound(format!("voicemail {call_sid}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;

    #[test]
    fn inquiry_and_message_get_distinct_prefixes() {
        let conn = setup_db();
        let inq = insert_inquiry(
            &conn,
            &CreateInquiryParams {
                call_sid: "CA1".to_string(),
                caller_name: Some("Sam".to_string()),
                caller_phone: Some("+15550100".to_string()),
                topic: "group booking".to_string(),
                details: "twenty people".to_string(),
            },
        )
        .unwrap();
        assert!(inq.starts_with("INQ-"));

        let msg = insert_message(
            &conn,
            &CreateMessageParams {
                call_sid: "CA1".to_string(),
                recipient: "box office".to_string(),
                caller_name: None,
                caller_phone: None,
                body: "please call back".to_string(),
            },
        )
        .unwrap();
        assert!(msg.starts_with("MSG-"));

        let stored: String = conn
            .query_row(
                "SELECT topic FROM inquiries WHERE reference_code = ?1",
                [&inq],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, "group booking");
    }

    #[test]
    fn voicemail_lifecycle() {
        let conn = setup_db();
        store_voicemail(&conn, "CA9", "https://rec/1", 12).unwrap();
        set_voicemail_transcript(&conn, "CA9", "hi, call me back").unwrap();

        // Repeated callback keeps the transcript.
        store_voicemail(&conn, "CA9", "https://rec/1b", 13).unwrap();

        let vm = get_voicemail(&conn, "CA9").unwrap();
        assert_eq!(vm.recording_url, "https://rec/1b");
        assert_eq!(vm.duration_secs, 13);
        assert_eq!(vm.transcript.as_deref(), Some("hi, call me back"));
        assert!(vm.transcribed_at.is_some());

        assert!(matches!(
            set_voicemail_transcript(&conn, "missing", "x"),
            Err(CatalogError::NotFound(_))
        ));
    }
}
