//! Staff notifications. Delivery is best-effort: callers detach it with
//! [`notify_detached`] and never wait on the outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::ToolError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Short machine tag, e.g. `purchase` or `inquiry`.
    pub kind: String,
    pub call_sid: String,
    pub text: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), ToolError>;
}

/// Writes notifications to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ToolError> {
        tracing::info!(
            kind = %notification.kind,
            call_sid = %notification.call_sid,
            "{}",
            notification.text
        );
        Ok(())
    }
}

/// Posts notifications as JSON to a chat-style incoming webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Notify(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ToolError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| ToolError::Notify(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolError::Notify(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Sends `notification` on a detached task bounded by `limit`. Failures are
/// logged and go nowhere else.
pub fn notify_detached(notifier: Arc<dyn Notifier>, notification: Notification, limit: Duration) {
    tokio::spawn(async move {
        match tokio::time::timeout(limit, notifier.notify(&notification)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                kind = %notification.kind,
                call_sid = %notification.call_sid,
                "notification failed: {}",
                e
            ),
            Err(_) => tracing::warn!(
                kind = %notification.kind,
                call_sid = %notification.call_sid,
                "notification timed out after {:?}",
                limit
            ),
        }
    });
}
