//! Persistence operations for the audit log and call outcomes.
//!
//! All event writes go through [`emit_event`], which serialises the payload,
//! assigns a monotonically increasing sequence number, and inserts into
//! `event_log` in a single statement.

use callbridge_types::{CallState, Language, OutcomeRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ObserveError;
use crate::event::{AuditEvent, EventDomain, EventPayload};

/// Appends one event to the audit log.
///
/// Domain, event type and entity type are derived from the payload; the
/// caller supplies the entity ID (usually the call SID).
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure or
/// `ObserveError::Serialization` if the payload cannot be serialised.
pub fn emit_event(
    conn: &Connection,
    entity_id: &str,
    payload: &EventPayload,
) -> Result<AuditEvent, ObserveError> {
    let payload_json = serde_json::to_string(payload)?;
    let domain = payload.domain();

    // Sequence assignment and insert happen in one statement so concurrent
    // writers cannot observe the same MAX(seq).
    let (id, seq, occurred_at) = conn.query_row(
        "INSERT INTO event_log
            (domain, event_type, entity_type, entity_id, seq, payload_json, occurred_at)
         VALUES (
            ?1, ?2, ?3, ?4,
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM event_log),
            ?5,
            datetime('now')
         )
         RETURNING id, seq, occurred_at",
        params![
            domain.as_str(),
            payload.event_type(),
            payload.entity_type(),
            entity_id,
            payload_json,
        ],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
    )?;

    Ok(AuditEvent {
        id,
        domain: domain.as_str().to_string(),
        event_type: payload.event_type().to_string(),
        entity_type: payload.entity_type().to_string(),
        entity_id: entity_id.to_string(),
        seq,
        payload_json,
        occurred_at,
    })
}

/// Like [`emit_event`], but a failure is logged and swallowed.
///
/// Audit writes never change the result of the operation being audited.
pub fn emit_or_warn(conn: &Connection, entity_id: &str, payload: &EventPayload) {
    if let Err(e) = emit_event(conn, entity_id, payload) {
        tracing::warn!(
            entity_id,
            event_type = payload.event_type(),
            "failed to write audit event: {}",
            e
        );
    }
}

/// Filter criteria for querying the audit log.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub domain: Option<EventDomain>,
    pub event_type: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Only events with a sequence number greater than this.
    pub after_seq: Option<i64>,
    /// Maximum number of events to return (default: 100).
    pub limit: Option<i64>,
}

/// Queries the audit log, oldest first.
///
/// Use `filter.after_seq` with the last `seq` seen for cursor pagination.
pub fn query_events(conn: &Connection, filter: &EventFilter) -> Result<Vec<AuditEvent>, ObserveError> {
    // Collect WHERE clauses and bind parameters separately so nothing is
    // interpolated.
    let mut clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut idx = 1u32;

    if let Some(domain) = filter.domain {
        clauses.push(format!("domain = ?{idx}"));
        param_values.push(Box::new(domain.as_str().to_string()));
        idx += 1;
    }
    if let Some(ref et) = filter.event_type {
        clauses.push(format!("event_type = ?{idx}"));
        param_values.push(Box::new(et.clone()));
        idx += 1;
    }
    if let Some(ref ent_type) = filter.entity_type {
        clauses.push(format!("entity_type = ?{idx}"));
        param_values.push(Box::new(ent_type.clone()));
        idx += 1;
    }
    if let Some(ref ent_id) = filter.entity_id {
        clauses.push(format!("entity_id = ?{idx}"));
        param_values.push(Box::new(ent_id.clone()));
        idx += 1;
    }
    if let Some(after) = filter.after_seq {
        clauses.push(format!("seq > ?{idx}"));
        param_values.push(Box::new(after));
        idx += 1;
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT id, domain, event_type, entity_type, entity_id, seq, payload_json, occurred_at
         FROM event_log
         {where_clause}
         ORDER BY seq ASC
         LIMIT ?{idx}"
    );
    param_values.push(Box::new(filter.limit.unwrap_or(100)));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|p| &**p).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok(AuditEvent {
            id: row.get(0)?,
            domain: row.get(1)?,
            event_type: row.get(2)?,
            entity_type: row.get(3)?,
            entity_id: row.get(4)?,
            seq: row.get(5)?,
            payload_json: row.get(6)?,
            occurred_at: row.get(7)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Writes the final outcome of a call.
///
/// A call settles once, so a second write for the same call is ignored and
/// `false` is returned.
pub fn record_outcome(conn: &Connection, record: &OutcomeRecord) -> Result<bool, ObserveError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO call_outcomes
            (call_sid, final_state, outcome, language, voice, started_at, ended_at, duration_secs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.call_sid,
            record.final_state.label(),
            record.outcome,
            record.language.tag(),
            record.voice,
            record.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            record.ended_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            record.duration_secs,
        ],
    )?;
    Ok(inserted == 1)
}

/// Reads back a call's outcome record.
pub fn get_outcome(conn: &Connection, call_sid: &str) -> Result<Option<OutcomeRecord>, ObserveError> {
    type Raw = (String, String, String, String, String, String, i64);
    let raw: Option<Raw> = conn
        .query_row(
            "SELECT final_state, outcome, language, voice, started_at, ended_at, duration_secs
             FROM call_outcomes WHERE call_sid = ?1",
            [call_sid],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()?;

    let Some((state, outcome, language, voice, started, ended, duration_secs)) = raw else {
        return Ok(None);
    };

    let malformed = |reason: String| ObserveError::MalformedOutcome {
        call_sid: call_sid.to_string(),
        reason,
    };
    let final_state: CallState = serde_json::from_value(serde_json::Value::String(state))
        .map_err(|e| malformed(e.to_string()))?;
    let language = Language::parse(&language).ok_or_else(|| malformed(format!("language {language}")))?;
    let parse = |s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| malformed(e.to_string()))
    };

    Ok(Some(OutcomeRecord {
        call_sid: call_sid.to_string(),
        final_state,
        outcome,
        language,
        voice,
        started_at: parse(&started)?,
        ended_at: parse(&ended)?,
        duration_secs,
    }))
}
