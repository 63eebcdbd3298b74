use std::sync::Arc;

use async_trait::async_trait;
use callbridge_catalog::{
    format_timestamp, list_tiers, list_upcoming_events, resolve_event, CatalogError, Event,
};
use callbridge_db::with_conn;
use callbridge_types::{ToolResult, ToolSpec};
use chrono::Utc;
use serde_json::{json, Value};

use super::dollars;
use crate::args::{parse_args, NextEventsArgs, TicketPricesArgs};
use crate::{Tool, ToolContext, ToolError, ToolServices};

/// Most events read out in one answer.
const MAX_EVENTS: u32 = 3;

fn event_json(event: &Event) -> Value {
    json!({
        "eventId": event.event_id,
        "name": event.name,
        "venue": event.venue,
        "startsAt": format_timestamp(event.starts_at),
        "description": event.description,
    })
}

pub struct GetNextEvents {
    services: Arc<ToolServices>,
}

impl GetNextEvents {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for GetNextEvents {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_next_events".to_string(),
            description: "List the next upcoming events, soonest first.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1, "maximum": MAX_EVENTS}
                }
            }),
        }
    }

    async fn call(&self, _ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: NextEventsArgs = parse_args("get_next_events", args);
        let limit = args.limit.unwrap_or(MAX_EVENTS).clamp(1, MAX_EVENTS);

        let events = with_conn(&self.services.pool, move |conn| {
            list_upcoming_events(conn, Utc::now(), limit as usize)
        })
        .await??;

        if events.is_empty() {
            return Ok(ToolResult::negative("No upcoming events found"));
        }
        let events: Vec<Value> = events.iter().map(event_json).collect();
        Ok(ToolResult::success().with("events", events))
    }
}

pub struct GetTicketPrices {
    services: Arc<ToolServices>,
}

impl GetTicketPrices {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for GetTicketPrices {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_ticket_prices".to_string(),
            description: "Ticket tiers, prices and remaining availability for an event. Defaults to the next upcoming event.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "event": {"type": "string", "description": "Event ID or part of the event name"}
                }
            }),
        }
    }

    async fn call(&self, _ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: TicketPricesArgs = parse_args("get_ticket_prices", args);

        let found = with_conn(&self.services.pool, move |conn| -> Result<_, CatalogError> {
            let Some(event) = resolve_event(conn, args.event.as_deref(), Utc::now())? else {
                return Ok(None);
            };
            let tiers = list_tiers(conn, &event.event_id)?;
            Ok(Some((event, tiers)))
        })
        .await??;

        let Some((event, tiers)) = found else {
            return Ok(ToolResult::negative("No matching upcoming event found"));
        };

        let tiers: Vec<Value> = tiers
            .iter()
            .map(|t| {
                json!({
                    "tier": t.tier,
                    "price": dollars(t.price_cents),
                    "priceCents": t.price_cents,
                    "available": t.available(),
                })
            })
            .collect();
        Ok(ToolResult::success()
            .with("event", event_json(&event))
            .with("tiers", tiers))
    }
}
