use crate::gateways::error::GatewayError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Stripe,
    Paystack,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Stripe => "stripe",
            GatewayName::Paystack => "paystack",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" | "card" => Ok(GatewayName::Stripe),
            "paystack" | "redirect" => Ok(GatewayName::Paystack),
            _ => Err(GatewayError::Rejected {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// Channel through which a payment event reached the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceivedVia {
    Webhook,
    RedirectCallback,
    ClientConfirmation,
    /// Internally generated (attempt creation, stale expiry, refunds)
    System,
}

impl ReceivedVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceivedVia::Webhook => "webhook",
            ReceivedVia::RedirectCallback => "redirect_callback",
            ReceivedVia::ClientConfirmation => "client_confirmation",
            ReceivedVia::System => "system",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "webhook" => Some(ReceivedVia::Webhook),
            "redirect_callback" => Some(ReceivedVia::RedirectCallback),
            "client_confirmation" => Some(ReceivedVia::ClientConfirmation),
            "system" => Some(ReceivedVia::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReceivedVia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: String,
    pub currency: String,
}

impl Money {
    pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: currency.into(),
        }
    }

    pub fn parse_decimal(&self) -> Result<BigDecimal, GatewayError> {
        BigDecimal::from_str(&self.amount).map_err(|_| GatewayError::Rejected {
            message: format!("invalid decimal amount: {}", self.amount),
            field: Some("amount".to_string()),
        })
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), GatewayError> {
        let parsed = self.parse_decimal()?;
        if parsed <= BigDecimal::from(0) {
            return Err(GatewayError::Rejected {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::Rejected {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    /// Amount in the gateway's minor unit (cents, kobo).
    pub fn minor_units(&self) -> Result<i64, GatewayError> {
        use bigdecimal::ToPrimitive;

        let minor = self.parse_decimal()? * BigDecimal::from(100);
        if !minor.is_integer() {
            return Err(GatewayError::Rejected {
                message: format!("amount {} has sub-cent precision", self.amount),
                field: Some("amount".to_string()),
            });
        }
        minor.to_i64().ok_or_else(|| GatewayError::Rejected {
            message: format!("amount {} out of range", self.amount),
            field: Some("amount".to_string()),
        })
    }
}

/// Generic request handed to a gateway adapter to start a payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub customer_email: Option<String>,
    /// Our payment attempt id, sent to the gateway as its reference
    pub reference: String,
    pub enrollment_id: Uuid,
    pub callback_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// Gateway-specific handle the client needs to complete checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GatewayHandle {
    /// Card flow: client-side confirmation token
    ClientSecret { client_secret: String },
    /// Redirect flow: hosted checkout URL
    RedirectUrl { gateway_url: String },
}

#[derive(Debug, Clone)]
pub struct InitiateResponse {
    pub handle: GatewayHandle,
    /// Gateway-assigned transaction id, when known at initiation time
    pub gateway_transaction_id: Option<String>,
}

/// Outcome a gateway reported for a transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Succeeded,
    Failed,
    Cancelled,
    Pending,
    Unknown,
}

impl ReportedStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportedStatus::Succeeded | ReportedStatus::Failed | ReportedStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ReportedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            ReportedStatus::Succeeded => "succeeded",
            ReportedStatus::Failed => "failed",
            ReportedStatus::Cancelled => "cancelled",
            ReportedStatus::Pending => "pending",
            ReportedStatus::Unknown => "unknown",
        };
        write!(f, "{}", value)
    }
}

/// Normalized payment notification, regardless of which gateway and channel
/// produced it. Ephemeral: folded into the payment's transition history by
/// the reconciliation service, never stored as its own entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub gateway: GatewayName,
    pub gateway_transaction_id: Option<String>,
    /// Mined from gateway metadata; resolves the payment before a
    /// transaction id is bound
    pub enrollment_id: Option<Uuid>,
    pub reported_status: ReportedStatus,
    pub received_via: ReceivedVia,
    pub raw_payload: JsonValue,
    pub received_at: chrono::DateTime<chrono::Utc>,
}
