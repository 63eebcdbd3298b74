//! Confidence-gated question answering.
//!
//! A retrieved passage is only handed to the model as an answer when the
//! best candidate clears the policy threshold. Below it the result carries
//! no passage text at all, just the configured fallback. Every question is
//! audited with its full candidate list whatever the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use callbridge_db::with_conn;
use callbridge_observe::{emit_or_warn, EventPayload};
use callbridge_types::{
    rank_candidates, GatingAction, ResultAction, RetrievalCandidate, ToolResult, ToolSpec,
};
use serde_json::{json, Value};

use crate::args::{parse_args, QuestionArgs};
use crate::error::bounded;
use crate::{Tool, ToolContext, ToolError, ToolServices};

pub struct AnswerQuestion {
    services: Arc<ToolServices>,
}

impl AnswerQuestion {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }

    async fn record(
        &self,
        ctx: &ToolContext,
        question: &str,
        gated: bool,
        candidates: &[RetrievalCandidate],
    ) {
        let call_sid = ctx.call_sid.clone();
        let payload = EventPayload::QuestionAsked {
            call_sid: ctx.call_sid.clone(),
            question: question.to_string(),
            language: ctx.language,
            threshold: ctx.policy.confidence.min_confidence,
            gated,
            candidates: candidates.to_vec(),
        };
        if let Err(e) = with_conn(&self.services.pool, move |conn| {
            emit_or_warn(conn, &call_sid, &payload)
        })
        .await
        {
            tracing::warn!(call_sid = %ctx.call_sid, "failed to record question: {}", e);
        }
    }
}

/// Applies the confidence policy to ranked candidates.
pub fn gate(ctx: &ToolContext, candidates: &[RetrievalCandidate]) -> ToolResult {
    let policy = &ctx.policy.confidence;
    let top = candidates.first().filter(|c| policy.passes(c.score));

    if let Some(top) = top {
        let mut sources: Vec<String> = Vec::new();
        for candidate in candidates.iter().filter(|c| policy.passes(c.score)) {
            if !sources.contains(&candidate.source) {
                sources.push(candidate.source.clone());
            }
        }
        return ToolResult::success()
            .with("answer", top.text.clone())
            .with("sources", json!(sources))
            .with("confidence", top.score)
            .with("approved", true);
    }

    let gated = ToolResult::negative("No confident answer was found.")
        .with("approved", false)
        .with("gate", policy.low_confidence_action.label());

    match policy.low_confidence_action {
        GatingAction::AskClarify => gated.with_action(ResultAction::Clarify).with(
            "message",
            "No confident answer was found. Do not guess. Ask the caller to rephrase or narrow the question.",
        ),
        GatingAction::Transfer => gated.with_action(ResultAction::Transfer).with(
            "message",
            "No confident answer was found. Tell the caller you are connecting them with a team member.",
        ),
        GatingAction::Voicemail => gated.with_action(ResultAction::Voicemail).with(
            "message",
            "No confident answer was found. Offer to take a voicemail so the team can follow up.",
        ),
    }
}

#[async_trait]
impl Tool for AnswerQuestion {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "answer_question".to_string(),
            description: "Look up an answer to a caller's question in the organization's knowledge base. Only state what the result approves.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string", "description": "The caller's question, as asked"}
                },
                "required": ["question"]
            }),
        }
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: QuestionArgs = parse_args("answer_question", args);
        let Some(question) = args.question else {
            return Ok(ToolResult::negative(
                "No question was given. Ask the caller what they would like to know.",
            )
            .with_action(ResultAction::Clarify));
        };

        let search = bounded(
            "knowledge search",
            self.services.external_timeout,
            self.services
                .knowledge
                .search(&question, ctx.language, self.services.max_candidates),
        )
        .await;

        let mut candidates = match search {
            Ok(candidates) => candidates,
            Err(e) => {
                self.record(ctx, &question, true, &[]).await;
                return Err(e);
            }
        };
        rank_candidates(&mut candidates);

        let result = gate(ctx, &candidates);
        self.record(ctx, &question, !result.ok, &candidates).await;
        tracing::info!(
            call_sid = %ctx.call_sid,
            top_score = candidates.first().map(|c| c.score).unwrap_or(0.0),
            approved = result.ok,
            "question answered"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_types::{ConfidencePolicy, Language, ServicePolicy};

    fn ctx(action: GatingAction) -> ToolContext {
        ToolContext::new(
            "CA1",
            Language::English,
            ServicePolicy {
                confidence: ConfidencePolicy {
                    min_confidence: 0.55,
                    low_confidence_action: action,
                },
                enabled_tools: Vec::new(),
            },
        )
    }

    fn candidate(text: &str, source: &str, score: f32) -> RetrievalCandidate {
        RetrievalCandidate {
            text: text.to_string(),
            source: source.to_string(),
            score,
        }
    }

    #[test]
    fn score_at_threshold_passes() {
        let result = gate(
            &ctx(GatingAction::AskClarify),
            &[candidate("Doors open at 7pm.", "faq.md", 0.55)],
        );
        assert!(result.ok);
        assert_eq!(result.get("answer"), Some(&json!("Doors open at 7pm.")));
        assert_eq!(result.get("sources"), Some(&json!(["faq.md"])));
    }

    #[test]
    fn sources_are_deduplicated_and_exclude_low_scores() {
        let result = gate(
            &ctx(GatingAction::AskClarify),
            &[
                candidate("a", "faq.md", 0.9),
                candidate("b", "faq.md", 0.8),
                candidate("c", "venue.md", 0.7),
                candidate("d", "blog.md", 0.2),
            ],
        );
        assert_eq!(result.get("sources"), Some(&json!(["faq.md", "venue.md"])));
    }

    #[test]
    fn every_gating_action_withholds_the_passage() {
        let passage = "It will be sunny all week.";
        for (action, tag) in [
            (GatingAction::AskClarify, ResultAction::Clarify),
            (GatingAction::Transfer, ResultAction::Transfer),
            (GatingAction::Voicemail, ResultAction::Voicemail),
        ] {
            let result = gate(&ctx(action), &[candidate(passage, "blog.md", 0.54)]);
            assert!(!result.ok);
            assert_eq!(result.action, Some(tag));
            assert_eq!(result.get("approved"), Some(&json!(false)));
            assert!(!result.to_json_string().contains(passage));
        }
    }

    #[test]
    fn no_candidates_is_gated() {
        let result = gate(&ctx(GatingAction::AskClarify), &[]);
        assert!(!result.ok);
        assert_eq!(result.action, Some(ResultAction::Clarify));
        assert_eq!(result.get("gate"), Some(&json!("ask_clarify")));
    }
}
