//! Events and their ticket tiers.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{format_timestamp, parse_timestamp, CatalogError};

const EVENT_COLUMNS: &str = "event_id, name, venue, description, starts_at, active";

/// A scheduled event callers can ask about and buy tickets for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub name: String,
    pub venue: String,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    pub active: bool,
}

/// Parameters for creating an event.
#[derive(Debug, Clone)]
pub struct CreateEventParams {
    pub event_id: String,
    pub name: String,
    pub venue: String,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    pub active: bool,
}

/// One priced tier of an event's inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketTier {
    pub event_id: String,
    pub tier: String,
    pub price_cents: i64,
    pub capacity: i64,
    pub sold: i64,
}

impl TicketTier {
    /// Remaining tickets, never negative.
    pub fn available(&self) -> i64 {
        (self.capacity - self.sold).max(0)
    }
}

pub fn create_event(conn: &Connection, params: &CreateEventParams) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT INTO events (event_id, name, venue, description, starts_at, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            params.event_id,
            params.name,
            params.venue,
            params.description,
            format_timestamp(params.starts_at),
            params.active,
        ],
    )?;
    Ok(())
}

/// Retrieves an event by its public ID.
pub fn get_event(conn: &Connection, event_id: &str) -> Result<Event, CatalogError> {
    conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = ?1"),
        [event_id],
        map_row_to_event,
    )
    .optional()?
    .ok_or_else(|| CatalogError::NotFound(format!("event {event_id}")))
}

/// Active events starting after `now`, soonest first, at most `limit`.
pub fn list_upcoming_events(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<Event>, CatalogError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE active = 1 AND starts_at > ?1
         ORDER BY starts_at ASC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(
        params![format_timestamp(now), limit as i64],
        map_row_to_event,
    )?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Finds the event a caller is referring to.
///
/// `None` means the next upcoming event. Otherwise an exact event ID wins,
/// then the soonest upcoming event whose name contains the reference
/// (case-insensitive).
pub fn resolve_event(
    conn: &Connection,
    reference: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<Event>, CatalogError> {
    let reference = reference.map(str::trim).filter(|r| !r.is_empty());
    let Some(reference) = reference else {
        return Ok(list_upcoming_events(conn, now, 1)?.into_iter().next());
    };

    match get_event(conn, reference) {
        Ok(event) => return Ok(Some(event)),
        Err(CatalogError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let event = conn
        .query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE active = 1 AND starts_at > ?1
                   AND instr(lower(name), lower(?2)) > 0
                 ORDER BY starts_at ASC
                 LIMIT 1"
            ),
            params![format_timestamp(now), reference],
            map_row_to_event,
        )
        .optional()?;
    Ok(event)
}

pub fn add_tier(
    conn: &Connection,
    event_id: &str,
    tier: &str,
    price_cents: i64,
    capacity: i64,
) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT INTO ticket_tiers (event_id, tier, price_cents, capacity) VALUES (?1, ?2, ?3, ?4)",
        params![event_id, tier, price_cents, capacity],
    )?;
    Ok(())
}

/// Lists an event's tiers, cheapest first.
pub fn list_tiers(conn: &Connection, event_id: &str) -> Result<Vec<TicketTier>, CatalogError> {
    let mut stmt = conn.prepare(
        "SELECT event_id, tier, price_cents, capacity, sold FROM ticket_tiers
         WHERE event_id = ?1 ORDER BY price_cents ASC, tier ASC",
    )?;
    let rows = stmt.query_map([event_id], map_row_to_tier)?;
    let mut tiers = Vec::new();
    for row in rows {
        tiers.push(row?);
    }
    Ok(tiers)
}

/// Reads one tier. The tier name is matched case-insensitively.
pub fn get_tier(conn: &Connection, event_id: &str, tier: &str) -> Result<TicketTier, CatalogError> {
    conn.query_row(
        "SELECT event_id, tier, price_cents, capacity, sold FROM ticket_tiers
         WHERE event_id = ?1 AND tier = ?2 COLLATE NOCASE",
        params![event_id, tier],
        map_row_to_tier,
    )
    .optional()?
    .ok_or_else(|| CatalogError::NotFound(format!("tier {tier} for event {event_id}")))
}

/// Adds `quantity` to a tier's sold counter in one conditional UPDATE.
///
/// Succeeds only if the counter still equals `expected_sold` (the value the
/// caller checked availability against) and the result stays within
/// capacity. Returns `false` when another sale got there first; the caller
/// should re-read and decide again.
pub fn try_increment_sold(
    conn: &Connection,
    event_id: &str,
    tier: &str,
    quantity: i64,
    expected_sold: i64,
) -> Result<bool, CatalogError> {
    let changed = conn.execute(
        "UPDATE ticket_tiers SET sold = sold + ?1
         WHERE event_id = ?2 AND tier = ?3 AND sold = ?4 AND sold + ?1 <= capacity",
        params![quantity, event_id, tier, expected_sold],
    )?;
    Ok(changed == 1)
}

fn map_row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let starts_at: String = row.get(4)?;
    Ok(Event {
        event_id: row.get(0)?,
        name: row.get(1)?,
        venue: row.get(2)?,
        description: row.get(3)?,
        starts_at: parse_timestamp(4, &starts_at)?,
        active: row.get(5)?,
    })
}

fn map_row_to_tier(row: &Row) -> rusqlite::Result<TicketTier> {
    Ok(TicketTier {
        event_id: row.get(0)?,
        tier: row.get(1)?,
        price_cents: row.get(2)?,
        capacity: row.get(3)?,
        sold: row.get(4)?,
    })
}
