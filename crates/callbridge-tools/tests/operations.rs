mod common;

use callbridge_types::ResultAction;
use common::{count, ctx, fixture, seed_event};
use serde_json::json;

#[tokio::test]
async fn next_events_are_future_active_and_capped() {
    let fx = fixture();
    let empty = fx
        .registry
        .dispatch(ctx("CA1"), "get_next_events", json!({}))
        .await;
    assert!(!empty.ok);
    assert!(empty.error.is_none());
    assert_eq!(empty.get("message"), Some(&json!("No upcoming events found")));

    seed_event(&fx.pool, "past", "Last Year", -30, &[]);
    for (id, days) in [("e4", 40), ("e2", 20), ("e1", 10), ("e3", 30), ("e5", 50)] {
        seed_event(&fx.pool, id, &format!("Event {id}"), days, &[]);
    }
    fx.pool
        .get()
        .unwrap()
        .execute("UPDATE events SET active = 0 WHERE event_id = 'e2'", [])
        .unwrap();

    let result = fx
        .registry
        .dispatch(ctx("CA1"), "get_next_events", json!({"limit": "10"}))
        .await;
    assert!(result.ok);
    let ids: Vec<&str> = result.get("events").unwrap().as_array().unwrap()
        .iter()
        .map(|e| e["eventId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["e1", "e3", "e4"]);
}

#[tokio::test]
async fn ticket_prices_default_to_the_next_event() {
    let fx = fixture();
    seed_event(&fx.pool, "later", "Autumn Ball", 60, &[("GA", 3000, 50, 0)]);
    seed_event(&fx.pool, "soon", "Spring Gala", 5, &[("VIP", 12000, 10, 10), ("GA", 4500, 500, 499)]);

    let result = fx
        .registry
        .dispatch(ctx("CA1"), "get_ticket_prices", json!({}))
        .await;
    assert!(result.ok);
    assert_eq!(result.get("event").unwrap()["eventId"], "soon");
    assert_eq!(
        result.get("tiers"),
        Some(&json!([
            {"tier": "GA", "price": "$45.00", "priceCents": 4500, "available": 1},
            {"tier": "VIP", "price": "$120.00", "priceCents": 12000, "available": 0},
        ]))
    );

    let missing = fx
        .registry
        .dispatch(ctx("CA1"), "get_ticket_prices", json!({"event": "Winter Fair"}))
        .await;
    assert_eq!(missing.get("message"), Some(&json!("No matching upcoming event found")));
}

#[tokio::test]
async fn inquiry_and_message_return_reference_codes() {
    let fx = fixture();

    let inquiry = fx
        .registry
        .dispatch(
            ctx("CA1"),
            "capture_inquiry",
            json!({"callerName": "Ada", "subject": "group booking", "notes": "party of 20"}),
        )
        .await;
    assert!(inquiry.ok, "{inquiry:?}");
    let code = inquiry.get("referenceCode").unwrap().as_str().unwrap();
    assert!(code.starts_with("INQ-") && code.len() == 10, "{code}");

    let message = fx
        .registry
        .dispatch(ctx("CA1"), "take_message", json!({"to": "box office", "body": "call me back"}))
        .await;
    assert!(message.ok, "{message:?}");
    assert!(message.get("referenceCode").unwrap().as_str().unwrap().starts_with("MSG-"));
    assert_eq!(message.get("recipient"), Some(&json!("box office")));

    assert_eq!(count(&fx.pool, "inquiries"), 1);
    assert_eq!(count(&fx.pool, "caller_messages"), 1);
    assert_eq!(fx.notifier.wait_for(2).await.len(), 2);
}

#[tokio::test]
async fn message_without_text_is_rejected() {
    let fx = fixture();
    let result = fx
        .registry
        .dispatch(ctx("CA1"), "take_message", json!({"recipient": "Sam"}))
        .await;
    assert_eq!(result.error.as_deref(), Some("Missing message text"));
    assert_eq!(count(&fx.pool, "caller_messages"), 0);
}

#[tokio::test]
async fn handoff_tools_only_return_actions() {
    let fx = fixture();
    let transfer = fx
        .registry
        .dispatch(ctx("CA1"), "transfer_to_human", json!(null))
        .await;
    assert!(transfer.ok);
    assert_eq!(transfer.action, Some(ResultAction::Transfer));

    let voicemail = fx
        .registry
        .dispatch(ctx("CA1"), "record_voicemail", json!({"reason": 7}))
        .await;
    assert_eq!(voicemail.action, Some(ResultAction::Voicemail));
    assert_eq!(count(&fx.pool, "voicemails"), 0);
}
