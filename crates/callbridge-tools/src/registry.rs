use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use callbridge_db::{with_conn, DbPool};
use callbridge_observe::{emit_or_warn, EventPayload};
use callbridge_types::{ServicePolicy, ToolResult, ToolSpec};
use serde_json::Value;
use tracing::{info, warn};

use crate::{ops, AnswerQuestion, ToolContext, ToolError, ToolServices};

/// One named business operation callable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Manifest entry: name, description and argument schema.
    fn spec(&self) -> ToolSpec;

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError>;
}

/// Name → tool map, built once and shared by every call.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    /// Backstop for a whole invocation; each external call inside a tool
    /// has its own shorter deadline.
    dispatch_timeout: Duration,
    audit: Option<DbPool>,
}

impl ToolRegistry {
    pub fn new(dispatch_timeout: Duration) -> Self {
        Self {
            tools: BTreeMap::new(),
            dispatch_timeout,
            audit: None,
        }
    }

    /// A registry holding every business tool, wired to `services`.
    /// Invocations are audited to the services' database.
    pub fn with_defaults(services: Arc<ToolServices>, dispatch_timeout: Duration) -> Self {
        let mut registry = Self::new(dispatch_timeout).with_audit(services.pool.clone());
        registry.register(Arc::new(ops::GetNextEvents::new(services.clone())));
        registry.register(Arc::new(ops::GetTicketPrices::new(services.clone())));
        registry.register(Arc::new(ops::PurchaseTickets::new(services.clone())));
        registry.register(Arc::new(ops::CaptureInquiry::new(services.clone())));
        registry.register(Arc::new(ops::TakeMessage::new(services.clone())));
        registry.register(Arc::new(AnswerQuestion::new(services)));
        registry.register(Arc::new(ops::TransferToHuman));
        registry.register(Arc::new(ops::RecordVoicemail));
        registry
    }

    /// Records a `TOOL_INVOKED` audit event for every dispatch.
    pub fn with_audit(mut self, pool: DbPool) -> Self {
        self.audit = Some(pool);
        self
    }

    /// Adds a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.spec().name, tool);
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Tool specs the policy enables, sorted by name.
    pub fn manifest(&self, policy: &ServicePolicy) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .filter(|(name, _)| policy.tool_enabled(name))
            .map(|(_, tool)| tool.spec())
            .collect()
    }

    /// Runs one tool call and always returns a result.
    ///
    /// Unknown and disabled names, tool errors, timeouts and panics all come
    /// back as `{ok: false, error}`. The tool runs on its own task so a
    /// panic stays inside it.
    ///
    /// Dropping the returned future (the session closed) detaches that task
    /// rather than aborting it, so a payment that was already taken still
    /// commits or refunds. Tools check [`ToolContext::is_cancelled`] before
    /// starting such work.
    pub async fn dispatch(&self, ctx: Arc<ToolContext>, name: &str, args: Value) -> ToolResult {
        let started = Instant::now();
        let result = self.run(ctx.clone(), name, args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            call_sid = %ctx.call_sid,
            tool = name,
            ok = result.ok,
            elapsed_ms,
            "tool call resolved"
        );
        self.audit(&ctx.call_sid, name, &result, elapsed_ms);
        result
    }

    async fn run(&self, ctx: Arc<ToolContext>, name: &str, args: Value) -> ToolResult {
        let tool = match self.tools.get(name) {
            Some(tool) if ctx.policy.tool_enabled(name) => tool.clone(),
            _ => {
                warn!(call_sid = %ctx.call_sid, tool = name, "unknown or disabled tool");
                return ToolResult::unknown_tool(name);
            }
        };

        let mut task = tokio::spawn(async move { tool.call(&ctx, args).await });

        match tokio::time::timeout(self.dispatch_timeout, &mut task).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!(tool = name, "tool failed: {}", e);
                ToolResult::failure(e.to_string())
            }
            Ok(Err(join_err)) => {
                warn!(tool = name, "tool task aborted: {}", join_err);
                ToolResult::failure(format!("{name} failed unexpectedly"))
            }
            Err(_) => {
                task.abort();
                let e = ToolError::timeout("tool call", self.dispatch_timeout);
                warn!(tool = name, "{}", e);
                ToolResult::failure(e.to_string())
            }
        }
    }

    fn audit(&self, call_sid: &str, tool: &str, result: &ToolResult, elapsed_ms: u64) {
        let Some(pool) = self.audit.clone() else {
            return;
        };
        let call_sid = call_sid.to_string();
        let payload = EventPayload::ToolInvoked {
            call_sid: call_sid.clone(),
            tool: tool.to_string(),
            ok: result.ok,
            error: result.error.clone(),
            action: result.action.map(|a| a.label().to_string()),
            elapsed_ms,
        };
        tokio::spawn(async move {
            if let Err(e) = with_conn(&pool, move |conn| emit_or_warn(conn, &call_sid, &payload)).await
            {
                warn!("failed to audit tool call: {}", e);
            }
        });
    }
}
