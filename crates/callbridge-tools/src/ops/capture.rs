//! Data capture: inquiries and messages.

use std::sync::Arc;

use async_trait::async_trait;
use callbridge_catalog::{insert_inquiry, insert_message, CreateInquiryParams, CreateMessageParams};
use callbridge_db::with_conn;
use callbridge_types::{ToolResult, ToolSpec};
use serde_json::{json, Value};

use crate::args::{parse_args, InquiryArgs, MessageArgs};
use crate::notify::{notify_detached, Notification};
use crate::{Tool, ToolContext, ToolError, ToolServices};

const DEFAULT_RECIPIENT: &str = "front desk";
const DEFAULT_TOPIC: &str = "general inquiry";

pub struct CaptureInquiry {
    services: Arc<ToolServices>,
}

impl CaptureInquiry {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for CaptureInquiry {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "capture_inquiry".to_string(),
            description: "Record a caller's inquiry for staff follow-up and give them a reference code.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "phone": {"type": "string"},
                    "topic": {"type": "string", "description": "Short subject, e.g. group booking"},
                    "details": {"type": "string"}
                },
                "required": ["topic"]
            }),
        }
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: InquiryArgs = parse_args("capture_inquiry", args);
        let params = CreateInquiryParams {
            call_sid: ctx.call_sid.clone(),
            caller_name: args.name,
            caller_phone: args.phone.or_else(|| ctx.caller.clone()),
            topic: args.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            details: args.details.unwrap_or_default(),
        };
        let text = format!(
            "{} from {}: {}",
            params.topic,
            params
                .caller_name
                .as_deref()
                .or(params.caller_phone.as_deref())
                .unwrap_or("unknown caller"),
            params.details
        );

        let reference = with_conn(&self.services.pool, move |conn| insert_inquiry(conn, &params))
            .await??;

        tracing::info!(call_sid = %ctx.call_sid, reference = %reference, "inquiry captured");
        notify_detached(
            self.services.notifier.clone(),
            Notification {
                kind: "inquiry".to_string(),
                call_sid: ctx.call_sid.clone(),
                text: format!("Inquiry {reference}: {text}"),
            },
            self.services.external_timeout,
        );
        Ok(ToolResult::success().with("referenceCode", reference))
    }
}

pub struct TakeMessage {
    services: Arc<ToolServices>,
}

impl TakeMessage {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for TakeMessage {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "take_message".to_string(),
            description: "Take a written message for a staff member or team.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "recipient": {"type": "string", "description": "Who the message is for"},
                    "name": {"type": "string"},
                    "phone": {"type": "string"},
                    "message": {"type": "string"}
                },
                "required": ["message"]
            }),
        }
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: MessageArgs = parse_args("take_message", args);
        let Some(body) = args.message else {
            return Ok(ToolResult::failure("Missing message text"));
        };
        let params = CreateMessageParams {
            call_sid: ctx.call_sid.clone(),
            recipient: args
                .recipient
                .unwrap_or_else(|| DEFAULT_RECIPIENT.to_string()),
            caller_name: args.name,
            caller_phone: args.phone.or_else(|| ctx.caller.clone()),
            body,
        };
        let recipient = params.recipient.clone();

        let reference = with_conn(&self.services.pool, move |conn| insert_message(conn, &params))
            .await??;

        tracing::info!(call_sid = %ctx.call_sid, reference = %reference, "message taken");
        notify_detached(
            self.services.notifier.clone(),
            Notification {
                kind: "message".to_string(),
                call_sid: ctx.call_sid.clone(),
                text: format!("Message {reference} for {recipient}"),
            },
            self.services.external_timeout,
        );
        Ok(ToolResult::success()
            .with("referenceCode", reference)
            .with("recipient", recipient))
    }
}
