//! Payment collaborators.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ToolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub call_sid: String,
    pub amount_cents: i64,
    pub description: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// Gateway reference, needed for refunds.
    pub reference: String,
}

/// Takes and returns money.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, ToolError>;

    async fn refund(&self, reference: &str, amount_cents: i64) -> Result<(), ToolError>;
}

/// In-process gateway that approves every charge unless told to decline.
/// Keeps a ledger of charges and refunds for inspection.
#[derive(Default)]
pub struct SimulatedPayments {
    decline: AtomicBool,
    next_ref: AtomicU64,
    charges: Mutex<Vec<(String, ChargeRequest)>>,
    refunds: Mutex<Vec<(String, i64)>>,
}

impl SimulatedPayments {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway that declines every charge.
    pub fn declining() -> Self {
        let payments = Self::default();
        payments.decline.store(true, Ordering::Relaxed);
        payments
    }

    pub fn set_declining(&self, decline: bool) {
        self.decline.store(decline, Ordering::Relaxed);
    }

    /// References and requests of every approved charge.
    pub fn charges(&self) -> Vec<(String, ChargeRequest)> {
        self.charges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// References and amounts of every refund.
    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.refunds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPayments {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, ToolError> {
        if self.decline.load(Ordering::Relaxed) {
            return Err(ToolError::PaymentDeclined("card was declined".to_string()));
        }
        if request.amount_cents <= 0 {
            return Err(ToolError::Payment(format!(
                "invalid amount: {}",
                request.amount_cents
            )));
        }
        let n = self.next_ref.fetch_add(1, Ordering::Relaxed) + 1;
        let reference = format!("sim_{n:06}");
        self.charges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((reference.clone(), request.clone()));
        tracing::info!(
            call_sid = %request.call_sid,
            reference = %reference,
            amount_cents = request.amount_cents,
            "simulated charge approved"
        );
        Ok(PaymentReceipt { reference })
    }

    async fn refund(&self, reference: &str, amount_cents: i64) -> Result<(), ToolError> {
        let mut refunds = self
            .refunds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if refunds.iter().any(|(r, _)| r == reference) {
            return Err(ToolError::Payment(format!("{reference} already refunded")));
        }
        refunds.push((reference.to_string(), amount_cents));
        tracing::info!(reference, amount_cents, "simulated refund issued");
        Ok(())
    }
}
