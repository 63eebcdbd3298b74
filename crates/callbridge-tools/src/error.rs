use std::time::Duration;

use callbridge_catalog::CatalogError;
use callbridge_db::PoolError;
use thiserror::Error;

/// Failures inside a tool. They never cross the dispatch boundary: the
/// registry turns them into `{ok: false, error}` results.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error("{operation} timed out after {}s", .limit.as_secs())]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Payment failed: {0}")]
    Payment(String),

    #[error("Knowledge search failed: {0}")]
    Retrieval(String),

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ToolError {
    pub fn timeout(operation: &'static str, limit: Duration) -> Self {
        Self::Timeout { operation, limit }
    }
}

impl From<CatalogError> for ToolError {
    fn from(e: CatalogError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<PoolError> for ToolError {
    fn from(e: PoolError) -> Self {
        Self::Database(e.to_string())
    }
}

/// Runs one external call under its own deadline.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, ToolError>
where
    F: std::future::Future<Output = Result<T, ToolError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ToolError::timeout(operation, limit))?
}
