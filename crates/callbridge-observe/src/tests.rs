//! Unit tests for the audit log.

use callbridge_types::{CallState, GatingAction, Language, OutcomeRecord, RetrievalCandidate};
use chrono::{Duration, TimeZone, Utc};
use rusqlite::Connection;

use crate::event::{EventDomain, EventPayload};
use crate::store::{emit_event, get_outcome, query_events, record_outcome, EventFilter};

/// Creates an in-memory SQLite database with migrations applied.
fn test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory db");
    callbridge_db::run_migrations(&conn).expect("migrations should succeed");
    conn
}

fn ringing(call_sid: &str) -> EventPayload {
    EventPayload::CallRinging {
        call_sid: call_sid.to_string(),
        from: Some("+15550001".to_string()),
        to: None,
    }
}

// ── emit_event ───────────────────────────────────────────────────────

#[test]
fn emit_event_derives_columns_from_payload() {
    let conn = test_db();

    let event = emit_event(&conn, "CA1", &ringing("CA1")).expect("emit should succeed");
    assert!(event.id > 0);
    assert_eq!(event.seq, 1);

    let (domain, event_type, entity_type, entity_id): (String, String, String, String) = conn
        .query_row(
            "SELECT domain, event_type, entity_type, entity_id FROM event_log WHERE id = ?1",
            [event.id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .expect("should query inserted row");

    assert_eq!(domain, "CALL");
    assert_eq!(event_type, "CALL_RINGING");
    assert_eq!(entity_type, "call");
    assert_eq!(entity_id, "CA1");
}

#[test]
fn sequence_numbers_increase() {
    let conn = test_db();
    let seqs: Vec<i64> = (0..4)
        .map(|i| {
            emit_event(&conn, &format!("CA{i}"), &ringing(&format!("CA{i}")))
                .unwrap()
                .seq
        })
        .collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
}

#[test]
fn question_audit_keeps_full_candidate_list() {
    let conn = test_db();
    let payload = EventPayload::QuestionAsked {
        call_sid: "CA7".to_string(),
        question: "what's the weather".to_string(),
        language: Language::English,
        threshold: 0.55,
        gated: true,
        candidates: vec![
            RetrievalCandidate {
                text: "Parking opens at 5pm".to_string(),
                source: "faq#parking".to_string(),
                score: 0.10,
            },
            RetrievalCandidate {
                text: "Doors open at 6pm".to_string(),
                source: "faq#doors".to_string(),
                score: 0.05,
            },
        ],
    };

    let stored = emit_event(&conn, "CA7", &payload).unwrap();
    assert_eq!(stored.domain, EventDomain::Knowledge.as_str());
    assert_eq!(stored.payload().unwrap(), payload);
}

#[test]
fn policy_events_are_keyed_by_policy() {
    let payload = EventPayload::PolicyUpdated {
        version_id: "v1".to_string(),
        min_confidence: 0.7,
        low_confidence_action: GatingAction::Voicemail,
        enabled_tools: vec![],
    };
    assert_eq!(payload.entity_type(), "policy");
    assert_eq!(payload.domain(), EventDomain::Admin);
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["event"], "POLICY_UPDATED");
    assert_eq!(json["low_confidence_action"], "voicemail");
}

// ── query_events ─────────────────────────────────────────────────────

#[test]
fn query_filters_by_domain_entity_and_cursor() {
    let conn = test_db();
    emit_event(&conn, "CA1", &ringing("CA1")).unwrap();
    emit_event(
        &conn,
        "CA1",
        &EventPayload::ToolInvoked {
            call_sid: "CA1".to_string(),
            tool: "get_next_events".to_string(),
            ok: true,
            error: None,
            action: None,
            elapsed_ms: 12,
        },
    )
    .unwrap();
    emit_event(&conn, "CA2", &ringing("CA2")).unwrap();

    let tools = query_events(
        &conn,
        &EventFilter {
            domain: Some(EventDomain::Tool),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].event_type, "TOOL_INVOKED");

    let ca1 = query_events(
        &conn,
        &EventFilter {
            entity_id: Some("CA1".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(ca1.len(), 2);

    let after_first = query_events(
        &conn,
        &EventFilter {
            after_seq: Some(1),
            limit: Some(1),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(after_first.len(), 1);
    assert_eq!(after_first[0].seq, 2);
}

#[test]
fn domain_labels_parse() {
    for domain in [
        EventDomain::Call,
        EventDomain::Tool,
        EventDomain::Knowledge,
        EventDomain::Admin,
    ] {
        assert_eq!(domain.as_str().parse::<EventDomain>().unwrap(), domain);
    }
    assert!("IDENTITY".parse::<EventDomain>().is_err());
}

// ── outcomes ─────────────────────────────────────────────────────────

#[test]
fn outcome_is_written_once() {
    let conn = test_db();
    let started = Utc.with_ymd_and_hms(2026, 10, 1, 18, 0, 0).unwrap();
    let record = OutcomeRecord {
        call_sid: "CA5".to_string(),
        final_state: CallState::Transferred,
        outcome: "model_unavailable".to_string(),
        language: Language::Spanish,
        voice: "alloy".to_string(),
        started_at: started,
        ended_at: started + Duration::seconds(42),
        duration_secs: 42,
    };

    assert!(record_outcome(&conn, &record).unwrap());

    let mut second = record.clone();
    second.final_state = CallState::Failed;
    assert!(!record_outcome(&conn, &second).unwrap());

    assert_eq!(get_outcome(&conn, "CA5").unwrap(), Some(record));
    assert_eq!(get_outcome(&conn, "missing").unwrap(), None);
}
