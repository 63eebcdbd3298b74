//! Business operations exposed to the model.

mod capture;
mod catalog;
mod handoff;
mod purchase;

pub use capture::{CaptureInquiry, TakeMessage};
pub use catalog::{GetNextEvents, GetTicketPrices};
pub use handoff::{RecordVoicemail, TransferToHuman};
pub use purchase::{PurchaseTickets, MAX_TICKETS_PER_ORDER};

/// Formats cents as a spoken-friendly dollar amount.
pub(crate) fn dollars(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, (cents % 100).abs())
}
