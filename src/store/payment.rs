use crate::gateways::types::{GatewayName, ReceivedVia};
use crate::store::error::StoreError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Payment attempt status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    AwaitingConfirmation,
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    /// Terminal statuses must never be overwritten by a later event that
    /// reports a different terminal outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
        )
    }

    /// Terminal and unsuccessful: the attempt may be replaced by a retry.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Cancelled)
    }

    pub fn to_db_status(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::AwaitingConfirmation => "awaiting_confirmation",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "initiated" => Some(PaymentStatus::Initiated),
            "awaiting_confirmation" => Some(PaymentStatus::AwaitingConfirmation),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_db_status())
    }
}

/// Payment attempt entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub gateway: GatewayName,
    /// Assigned by the gateway; `None` until the first gateway round trip
    pub gateway_transaction_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// One append-only history row per status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransition {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub from_status: Option<PaymentStatus>,
    pub to_status: PaymentStatus,
    pub received_via: ReceivedVia,
    pub detail: JsonValue,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Conflicting terminal report, held for manual operator review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConflict {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub gateway_transaction_id: Option<String>,
    pub stored_status: PaymentStatus,
    pub reported_status: String,
    pub received_via: ReceivedVia,
    pub payload: JsonValue,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Persistence port for payment attempts and their history.
///
/// `transition` is the only way a status changes: it is compare-and-set
/// against the expected statuses and appends the history row atomically
/// with the update. `None` means the guard failed (the payment was no
/// longer in any expected status).
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new attempt and its creation history row.
    async fn insert(&self, payment: Payment) -> Result<Payment, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn find_by_gateway_reference(
        &self,
        gateway: GatewayName,
        reference: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Bind the gateway-assigned transaction id. No-op when already bound
    /// to the same value; `Conflict` when bound to a different one.
    async fn bind_gateway_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> Result<Payment, StoreError>;

    async fn transition(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        to: PaymentStatus,
        received_via: ReceivedVia,
        detail: JsonValue,
    ) -> Result<Option<Payment>, StoreError>;

    async fn history(&self, payment_id: Uuid) -> Result<Vec<PaymentTransition>, StoreError>;

    async fn record_conflict(&self, conflict: PaymentConflict) -> Result<(), StoreError>;

    async fn conflicts(&self) -> Result<Vec<PaymentConflict>, StoreError>;

    /// Non-terminal payments created before the cutoff, for the
    /// operator-driven expiry pass.
    async fn find_stale(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Payment>, StoreError>;
}
