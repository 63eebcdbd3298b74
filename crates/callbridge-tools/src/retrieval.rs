//! Knowledge retrieval collaborators.

use std::time::Duration;

use async_trait::async_trait;
use callbridge_types::{rank_candidates, Language, RetrievalCandidate};
use serde::{Deserialize, Serialize};

use crate::ToolError;

/// Searches the organization's knowledge base.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Returns scored candidates for `question`, in any order.
    async fn search(
        &self,
        question: &str,
        language: Language,
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, ToolError>;
}

/// Retriever used when no search service is configured. Every question
/// comes back without candidates and is therefore gated.
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeRetriever for NoKnowledge {
    async fn search(
        &self,
        _question: &str,
        _language: Language,
        _limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, ToolError> {
        Ok(Vec::new())
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    question: &'a str,
    language: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    candidates: Vec<RetrievalCandidate>,
}

/// Knowledge search over HTTP: `POST {question, language, limit}` and read
/// back `{candidates: [{text, source, score}]}`.
pub struct HttpKnowledgeSearch {
    client: reqwest::Client,
    url: String,
}

impl HttpKnowledgeSearch {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Retrieval(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl KnowledgeRetriever for HttpKnowledgeSearch {
    async fn search(
        &self,
        question: &str,
        language: Language,
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, ToolError> {
        let response = self
            .client
            .post(&self.url)
            .json(&SearchRequest {
                question,
                language: language.tag(),
                limit,
            })
            .send()
            .await
            .map_err(|e| ToolError::Retrieval(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::Retrieval(format!(
                "search service returned {}",
                response.status()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Retrieval(format!("invalid search response: {e}")))?;

        let mut candidates = body.candidates;
        rank_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }
}
