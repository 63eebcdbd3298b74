use std::sync::Arc;
use std::time::Duration;

use callbridge_db::DbPool;
use callbridge_types::{Language, ServicePolicy};
use tokio_util::sync::CancellationToken;

use crate::notify::Notifier;
use crate::payments::PaymentGateway;
use crate::retrieval::KnowledgeRetriever;

/// Per-call facts a tool may need. Built when the model session connects.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_sid: String,
    pub language: Language,
    /// Caller number reported by the gateway, if any.
    pub caller: Option<String>,
    /// Policy snapshot taken at connect; admin updates do not reach
    /// calls already in progress.
    pub policy: ServicePolicy,
    /// Cancelled when the call leaves the assistant. Tools check it before
    /// side effects that cannot be undone.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(call_sid: impl Into<String>, language: Language, policy: ServicePolicy) -> Self {
        Self {
            call_sid: call_sid.into(),
            language,
            caller: None,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_caller(mut self, caller: Option<String>) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Shared collaborators every tool can reach.
pub struct ToolServices {
    pub pool: DbPool,
    pub knowledge: Arc<dyn KnowledgeRetriever>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    /// Deadline for each individual external call made by a tool.
    pub external_timeout: Duration,
    /// Candidates requested per knowledge search.
    pub max_candidates: usize,
}
