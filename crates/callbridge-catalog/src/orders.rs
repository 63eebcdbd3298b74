//! Completed ticket orders.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::CatalogError;

/// A paid ticket order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub confirmation_code: String,
    pub call_sid: String,
    pub event_id: String,
    pub tier: String,
    pub quantity: i64,
    pub total_cents: i64,
    /// Reference returned by the payment gateway.
    pub payment_ref: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CreateOrderParams {
    pub confirmation_code: String,
    pub call_sid: String,
    pub event_id: String,
    pub tier: String,
    pub quantity: i64,
    pub total_cents: i64,
    pub payment_ref: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
}

pub fn insert_order(conn: &Connection, params: &CreateOrderParams) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT INTO orders (
            confirmation_code, call_sid, event_id, tier, quantity,
            total_cents, payment_ref, customer_name, customer_phone
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            params.confirmation_code,
            params.call_sid,
            params.event_id,
            params.tier,
            params.quantity,
            params.total_cents,
            params.payment_ref,
            params.customer_name,
            params.customer_phone,
        ],
    )?;
    Ok(())
}

pub fn get_order(conn: &Connection, confirmation_code: &str) -> Result<Order, CatalogError> {
    conn.query_row(
        "SELECT confirmation_code, call_sid, event_id, tier, quantity,
                total_cents, payment_ref, customer_name, customer_phone, created_at
         FROM orders WHERE confirmation_code = ?1",
        [confirmation_code],
        map_row_to_order,
    )
    .optional()?
    .ok_or_else(|| CatalogError::NotFound(format!("order {confirmation_code}")))
}

fn map_row_to_order(row: &Row) -> rusqlite::Result<Order> {
    Ok(Order {
        confirmation_code: row.get(0)?,
        call_sid: row.get(1)?,
        event_id: row.get(2)?,
        tier: row.get(3)?,
        quantity: row.get(4)?,
        total_cents: row.get(5)?,
        payment_ref: row.get(6)?,
        customer_name: row.get(7)?,
        customer_phone: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use crate::{create_event, CreateEventParams};
    use chrono::Utc;

    #[test]
    fn order_insert_and_fetch() {
        let conn = setup_db();
        create_event(
            &conn,
            &CreateEventParams {
                event_id: "gala".to_string(),
                name: "Gala".to_string(),
                venue: String::new(),
                description: String::new(),
                starts_at: Utc::now(),
                active: true,
            },
        )
        .unwrap();

        insert_order(
            &conn,
            &CreateOrderParams {
                confirmation_code: "K7Q2MX9P".to_string(),
                call_sid: "CA123".to_string(),
                event_id: "gala".to_string(),
                tier: "GA".to_string(),
                quantity: 2,
                total_cents: 9_000,
                payment_ref: "sim_1".to_string(),
                customer_name: Some("Dana".to_string()),
                customer_phone: None,
            },
        )
        .unwrap();

        let order = get_order(&conn, "K7Q2MX9P").unwrap();
        assert_eq!(order.quantity, 2);
        assert_eq!(order.total_cents, 9_000);
        assert_eq!(order.customer_name.as_deref(), Some("Dana"));

        assert!(matches!(
            get_order(&conn, "NOPE"),
            Err(CatalogError::NotFound(_))
        ));
    }
}
