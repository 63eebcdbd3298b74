//! Ticket purchase.
//!
//! Order of operations: check availability, charge, then commit the
//! inventory increment and the order row in one transaction. The increment
//! is a guarded UPDATE that only applies if `sold` still holds the value the
//! availability check saw; on a lost race the tier is re-read and the
//! commit tried once more. If inventory cannot be committed the charge is
//! refunded, so a failed purchase leaves no trace.

use std::sync::Arc;

use async_trait::async_trait;
use callbridge_catalog::{
    confirmation_code, get_tier, insert_order, list_tiers, resolve_event, try_increment_sold,
    CatalogError, CreateOrderParams, Event, TicketTier,
};
use callbridge_db::with_conn;
use callbridge_types::{ToolResult, ToolSpec};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::dollars;
use crate::args::{parse_args, PurchaseArgs};
use crate::error::bounded;
use crate::notify::{notify_detached, Notification};
use crate::payments::ChargeRequest;
use crate::{Tool, ToolContext, ToolError, ToolServices};

pub const MAX_TICKETS_PER_ORDER: u32 = 10;

/// Commit attempts against the guarded counter: the first, plus one retry
/// with fresh data.
const COMMIT_ATTEMPTS: usize = 2;

pub struct PurchaseTickets {
    services: Arc<ToolServices>,
}

enum Selection {
    Ready(Event, TicketTier),
    NoEvent,
    NoTiers,
    UnknownTier(String, Vec<String>),
    ChooseTier(Vec<String>),
}

fn sold_out(tier: &TicketTier) -> ToolResult {
    ToolResult::failure(format!(
        "Only {} {} tickets remaining",
        tier.available(),
        tier.tier
    ))
}

impl PurchaseTickets {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }

    async fn select(&self, args: &PurchaseArgs) -> Result<Selection, ToolError> {
        let event_ref = args.event.clone();
        let tier_ref = args.tier.clone();
        let selection = with_conn(&self.services.pool, move |conn| -> Result<Selection, CatalogError> {
            let Some(event) = resolve_event(conn, event_ref.as_deref(), Utc::now())? else {
                return Ok(Selection::NoEvent);
            };
            let tiers = list_tiers(conn, &event.event_id)?;
            let names: Vec<String> = tiers.iter().map(|t| t.tier.clone()).collect();
            let tier = match tier_ref {
                Some(name) => match get_tier(conn, &event.event_id, &name) {
                    Ok(tier) => tier,
                    Err(CatalogError::NotFound(_)) => {
                        return Ok(Selection::UnknownTier(name, names))
                    }
                    Err(e) => return Err(e),
                },
                None => match tiers.len() {
                    0 => return Ok(Selection::NoTiers),
                    1 => tiers.into_iter().next().ok_or_else(|| {
                        CatalogError::NotFound(format!("tiers for {}", event.event_id))
                    })?,
                    _ => return Ok(Selection::ChooseTier(names)),
                },
            };
            Ok(Selection::Ready(event, tier))
        })
        .await??;
        Ok(selection)
    }

    /// Tries to move `quantity` tickets into `sold` and write the order.
    /// Returns the tier as last read when inventory could not be taken.
    async fn commit(
        &self,
        mut tier: TicketTier,
        order: CreateOrderParams,
    ) -> Result<Result<(), TicketTier>, ToolError> {
        let quantity = order.quantity;
        for attempt in 1..=COMMIT_ATTEMPTS {
            if tier.available() < quantity {
                return Ok(Err(tier));
            }
            let expected = tier.sold;
            let row = order.clone();
            let committed = with_conn(&self.services.pool, move |conn| -> Result<bool, CatalogError> {
                let tx = conn.unchecked_transaction()?;
                if !try_increment_sold(&tx, &row.event_id, &row.tier, quantity, expected)? {
                    return Ok(false);
                }
                insert_order(&tx, &row)?;
                tx.commit()?;
                Ok(true)
            })
            .await??;
            if committed {
                return Ok(Ok(()));
            }

            warn!(
                call_sid = %order.call_sid,
                tier = %order.tier,
                attempt,
                "inventory changed during purchase, re-reading"
            );
            let (event_id, name) = (tier.event_id.clone(), tier.tier.clone());
            tier = with_conn(&self.services.pool, move |conn| get_tier(conn, &event_id, &name))
                .await??;
        }
        Ok(Err(tier))
    }

    async fn refund(&self, call_sid: &str, reference: &str, amount_cents: i64) {
        let refund = bounded(
            "refund",
            self.services.external_timeout,
            self.services.payments.refund(reference, amount_cents),
        )
        .await;
        if let Err(e) = refund {
            error!(call_sid, reference, amount_cents, "refund failed: {}", e);
        }
    }
}

#[async_trait]
impl Tool for PurchaseTickets {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "purchase_tickets".to_string(),
            description: "Buy tickets for an event and charge the caller. Confirm event, tier and quantity with the caller first.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "event": {"type": "string", "description": "Event ID or part of the event name; defaults to the next event"},
                    "tier": {"type": "string", "description": "Ticket tier, e.g. GA or VIP"},
                    "quantity": {"type": "integer", "minimum": 1, "maximum": MAX_TICKETS_PER_ORDER},
                    "name": {"type": "string", "description": "Name for the order"},
                    "phone": {"type": "string", "description": "Phone number for the confirmation"}
                },
                "required": ["quantity"]
            }),
        }
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult, ToolError> {
        let args: PurchaseArgs = parse_args("purchase_tickets", args);
        let quantity = args.quantity.unwrap_or(1);
        if quantity == 0 {
            return Ok(ToolResult::failure("Quantity must be at least 1"));
        }
        if quantity > MAX_TICKETS_PER_ORDER {
            return Ok(ToolResult::failure(format!(
                "At most {MAX_TICKETS_PER_ORDER} tickets can be bought per order"
            )));
        }
        let quantity = i64::from(quantity);

        let (event, tier) = match self.select(&args).await? {
            Selection::Ready(event, tier) => (event, tier),
            Selection::NoEvent => {
                return Ok(ToolResult::failure("No matching upcoming event found"))
            }
            Selection::NoTiers => {
                return Ok(ToolResult::failure("Tickets are not on sale for this event"))
            }
            Selection::UnknownTier(name, names) => {
                return Ok(ToolResult::failure(format!("Unknown ticket tier: {name}"))
                    .with("tiers", names))
            }
            Selection::ChooseTier(names) => {
                return Ok(ToolResult::failure("Please choose a ticket tier").with("tiers", names))
            }
        };

        if tier.available() < quantity {
            return Ok(sold_out(&tier));
        }

        if ctx.is_cancelled() {
            info!(call_sid = %ctx.call_sid, "call ended before payment, not charging");
            return Ok(ToolResult::failure("The call ended before payment was taken"));
        }

        let total_cents = tier.price_cents * quantity;
        let customer_phone = args.phone.clone().or_else(|| ctx.caller.clone());
        let receipt = bounded(
            "payment",
            self.services.external_timeout,
            self.services.payments.charge(&ChargeRequest {
                call_sid: ctx.call_sid.clone(),
                amount_cents: total_cents,
                description: format!("{quantity} x {} - {}", tier.tier, event.name),
                customer_name: args.name.clone(),
                customer_phone: customer_phone.clone(),
            }),
        )
        .await?;

        let code = confirmation_code();
        let order = CreateOrderParams {
            confirmation_code: code.clone(),
            call_sid: ctx.call_sid.clone(),
            event_id: event.event_id.clone(),
            tier: tier.tier.clone(),
            quantity,
            total_cents,
            payment_ref: receipt.reference.clone(),
            customer_name: args.name.clone(),
            customer_phone,
        };

        let tier_name = tier.tier.clone();
        match self.commit(tier, order).await {
            Ok(Ok(())) => {}
            Ok(Err(latest)) => {
                self.refund(&ctx.call_sid, &receipt.reference, total_cents)
                    .await;
                return Ok(sold_out(&latest));
            }
            Err(e) => {
                self.refund(&ctx.call_sid, &receipt.reference, total_cents)
                    .await;
                return Err(e);
            }
        }

        info!(
            call_sid = %ctx.call_sid,
            confirmation = %code,
            event_id = %event.event_id,
            quantity,
            total_cents,
            "tickets purchased"
        );
        notify_detached(
            self.services.notifier.clone(),
            Notification {
                kind: "purchase".to_string(),
                call_sid: ctx.call_sid.clone(),
                text: format!(
                    "Order {code}: {quantity} {} ticket(s) for {} ({})",
                    tier_name,
                    event.name,
                    dollars(total_cents)
                ),
            },
            self.services.external_timeout,
        );

        Ok(ToolResult::success()
            .with("confirmationCode", code)
            .with("event", event.name)
            .with("tier", tier_name)
            .with("quantity", quantity)
            .with("total", dollars(total_cents))
            .with("totalCents", total_cents))
    }
}
