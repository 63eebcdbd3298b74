//! Tool dispatch for the phone assistant.
//!
//! The model asks for business operations by name. A [`ToolRegistry`],
//! built once at startup and shared by every call, maps each name to a
//! [`Tool`] and turns every invocation into exactly one
//! [`ToolResult`](callbridge_types::ToolResult): errors, timeouts and even
//! panics inside a tool come back as `{ok: false, error}`.
//!
//! Tools reach the outside world through [`ToolServices`]: the database
//! pool plus the knowledge, payment and notification collaborators.

pub mod args;
mod context;
mod error;
pub mod knowledge;
pub mod notify;
pub mod ops;
pub mod payments;
mod registry;
pub mod retrieval;

pub use context::{ToolContext, ToolServices};
pub use error::ToolError;
pub use knowledge::AnswerQuestion;
pub use notify::{LogNotifier, Notification, Notifier, WebhookNotifier};
pub use payments::{ChargeRequest, PaymentGateway, PaymentReceipt, SimulatedPayments};
pub use registry::{Tool, ToolRegistry};
pub use retrieval::{HttpKnowledgeSearch, KnowledgeRetriever, NoKnowledge};
