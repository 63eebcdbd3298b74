//! Tools that hand the caller off the model bridge. They only return an
//! action tag; the call state machine performs the handoff.

use async_trait::async_trait;
use callbridge_types::{ResultAction, ToolResult, ToolSpec};
use serde_json::{json, Value};

use crate::args::{parse_args, HandoffArgs};
use crate::{Tool, ToolContext, ToolError};

fn reason_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reason": {"type": "string"}
        }
    })
}

pub struct TransferToHuman;

#[async_trait]
impl Tool for TransferToHuman {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "transfer_to_human".to_string(),
            description: "Transfer the caller to a staff member. Use when asked for a person or when you cannot help.".to_string(),
            input_schema: reason_schema(),
        }
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: HandoffArgs = parse_args("transfer_to_human", args);
        tracing::info!(call_sid = %ctx.call_sid, reason = ?args.reason, "transfer requested");
        Ok(ToolResult::success()
            .with_action(ResultAction::Transfer)
            .with("message", "Connecting the caller to a team member."))
    }
}

pub struct RecordVoicemail;

#[async_trait]
impl Tool for RecordVoicemail {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "record_voicemail".to_string(),
            description: "Let the caller leave a recorded voicemail for the team.".to_string(),
            input_schema: reason_schema(),
        }
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: HandoffArgs = parse_args("record_voicemail", args);
        tracing::info!(call_sid = %ctx.call_sid, reason = ?args.reason, "voicemail requested");
        Ok(ToolResult::success()
            .with_action(ResultAction::Voicemail)
            .with("message", "The caller will leave a voicemail after the tone."))
    }
}
