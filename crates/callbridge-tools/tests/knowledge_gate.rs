mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callbridge_observe::{query_events, EventFilter, EventPayload};
use callbridge_tools::{KnowledgeRetriever, ToolError};
use callbridge_types::{
    ConfidencePolicy, GatingAction, Language, ResultAction, RetrievalCandidate, ServicePolicy,
};
use common::{ctx_with_policy, fixture_with, FixedKnowledge, Fixture, RecordingNotifier};
use serde_json::json;

const NEXT_EVENT: &str = "The next event is the Spring Gala on May 3rd at the Main Hall.";
const WEATHER: &str = "Sunny skies expected for the outdoor market.";

fn policy(action: GatingAction) -> ServicePolicy {
    ServicePolicy {
        confidence: ConfidencePolicy {
            min_confidence: 0.55,
            low_confidence_action: action,
        },
        enabled_tools: Vec::new(),
    }
}

fn with_candidates(candidates: Vec<RetrievalCandidate>) -> Fixture {
    fixture_with(
        Arc::new(FixedKnowledge(candidates)),
        Arc::new(RecordingNotifier::default()),
    )
}

fn questions(fx: &Fixture, call_sid: &str) -> Vec<EventPayload> {
    let filter = EventFilter {
        entity_id: Some(call_sid.to_string()),
        event_type: Some("QUESTION_ASKED".to_string()),
        ..EventFilter::default()
    };
    query_events(&fx.pool.get().unwrap(), &filter)
        .unwrap()
        .iter()
        .map(|e| e.payload().unwrap())
        .collect()
}

#[tokio::test]
async fn confident_answer_is_approved_with_sources() {
    let fx = with_candidates(vec![
        RetrievalCandidate {
            text: "Parking is free after 6pm.".to_string(),
            source: "parking.md".to_string(),
            score: 0.30,
        },
        RetrievalCandidate {
            text: NEXT_EVENT.to_string(),
            source: "events/spring-gala.md".to_string(),
            score: 0.91,
        },
    ]);

    let result = fx
        .registry
        .dispatch(
            ctx_with_policy("CA1", policy(GatingAction::AskClarify)),
            "answer_question",
            json!({"question": "when is the next event"}),
        )
        .await;

    assert!(result.ok);
    assert_eq!(result.get("answer"), Some(&json!(NEXT_EVENT)));
    assert_eq!(result.get("sources"), Some(&json!(["events/spring-gala.md"])));
    assert_eq!(result.get("approved"), Some(&json!(true)));
    assert!(result.action.is_none());

    let recorded = questions(&fx, "CA1");
    assert_eq!(recorded.len(), 1);
    match &recorded[0] {
        EventPayload::QuestionAsked {
            question,
            language,
            gated,
            candidates,
            ..
        } => {
            assert_eq!(question, "when is the next event");
            assert_eq!(*language, Language::English);
            assert!(!gated);
            assert_eq!(candidates.len(), 2);
            assert_eq!(candidates[0].score, 0.91);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn low_confidence_asks_to_clarify_without_the_passage() {
    let fx = with_candidates(vec![RetrievalCandidate {
        text: WEATHER.to_string(),
        source: "blog/market.md".to_string(),
        score: 0.10,
    }]);

    let result = fx
        .registry
        .dispatch(
            ctx_with_policy("CA2", policy(GatingAction::AskClarify)),
            "answer_question",
            json!({"question": "what's the weather"}),
        )
        .await;

    assert!(!result.ok);
    assert_eq!(result.action, Some(ResultAction::Clarify));
    assert!(result.get("answer").is_none());
    assert!(!result.to_json_string().contains(WEATHER));

    let recorded = questions(&fx, "CA2");
    assert!(matches!(
        &recorded[..],
        [EventPayload::QuestionAsked { gated: true, candidates, .. }] if candidates.len() == 1
    ));
}

#[tokio::test]
async fn low_confidence_can_transfer() {
    let fx = with_candidates(Vec::new());
    let result = fx
        .registry
        .dispatch(
            ctx_with_policy("CA3", policy(GatingAction::Transfer)),
            "answer_question",
            json!({"query": "can I bring my dog"}),
        )
        .await;
    assert_eq!(result.action, Some(ResultAction::Transfer));
    assert_eq!(questions(&fx, "CA3").len(), 1);
}

struct Unavailable;

#[async_trait]
impl KnowledgeRetriever for Unavailable {
    async fn search(
        &self,
        _question: &str,
        _language: Language,
        _limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, ToolError> {
        Err(ToolError::Retrieval("connection refused".to_string()))
    }
}

struct Stalled;

#[async_trait]
impl KnowledgeRetriever for Stalled {
    async fn search(
        &self,
        _question: &str,
        _language: Language,
        _limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, ToolError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn retrieval_failure_is_a_failed_result_and_still_audited() {
    let fx = fixture_with(Arc::new(Unavailable), Arc::new(RecordingNotifier::default()));
    let result = fx
        .registry
        .dispatch(
            ctx_with_policy("CA4", policy(GatingAction::AskClarify)),
            "answer_question",
            json!({"question": "is there a coat check"}),
        )
        .await;
    assert_eq!(
        result.error.as_deref(),
        Some("Knowledge search failed: connection refused")
    );
    assert_eq!(questions(&fx, "CA4").len(), 1);
}

#[tokio::test]
async fn retrieval_timeout_is_bounded() {
    let fx = fixture_with(Arc::new(Stalled), Arc::new(RecordingNotifier::default()));
    let result = fx
        .registry
        .dispatch(
            ctx_with_policy("CA5", policy(GatingAction::AskClarify)),
            "answer_question",
            json!({"question": "is there a coat check"}),
        )
        .await;
    assert_eq!(
        result.error.as_deref(),
        Some("knowledge search timed out after 1s")
    );
}

#[tokio::test]
async fn missing_question_asks_for_one() {
    let fx = with_candidates(Vec::new());
    let result = fx
        .registry
        .dispatch(
            ctx_with_policy("CA6", policy(GatingAction::Transfer)),
            "answer_question",
            json!({}),
        )
        .await;
    assert!(!result.ok);
    assert_eq!(result.action, Some(ResultAction::Clarify));
    assert!(questions(&fx, "CA6").is_empty());
}
