//! Redirect gateway adapter (Paystack).
//!
//! Checkout flow: the backend initializes a transaction and sends the user
//! to the hosted `authorization_url`. After payment the user lands back on
//! our callback page, which posts the transaction reference to the verify
//! endpoint. The callback carries no verifiable signature, so its reported
//! outcome is never trusted: reconciliation re-validates every reported
//! success against `/transaction/verify/:reference` before accepting it.

use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    GatewayHandle, GatewayName, InitiateResponse, PaymentEvent, PaymentRequest, ReceivedVia,
    ReportedStatus,
};
use crate::gateways::utils::GatewayHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            base_url: "https://api.paystack.co".to_string(),
            callback_url: None,
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| GatewayError::Rejected {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            secret_key,
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            callback_url: std::env::var("PAYSTACK_CALLBACK_URL").ok(),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("PAYSTACK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

pub struct PaystackAdapter {
    config: PaystackConfig,
    http: GatewayHttpClient,
}

impl PaystackAdapter {
    pub fn new(config: PaystackConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn map_transaction_status(status: &str) -> ReportedStatus {
        match status {
            "success" => ReportedStatus::Succeeded,
            "pending" | "ongoing" | "processing" => ReportedStatus::Pending,
            "failed" => ReportedStatus::Failed,
            "abandoned" => ReportedStatus::Cancelled,
            _ => ReportedStatus::Unknown,
        }
    }

    fn valid_reference(reference: &str) -> bool {
        !reference.is_empty()
            && reference.len() <= 128
            && reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

#[async_trait]
impl GatewayAdapter for PaystackAdapter {
    async fn initiate(&self, request: PaymentRequest) -> GatewayResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let email = request
            .customer_email
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(GatewayError::Rejected {
                message: "customer email is required for paystack initialization".to_string(),
                field: Some("customer_email".to_string()),
            })?;

        let payload = serde_json::json!({
            "email": email,
            "amount": request.amount.minor_units()?,
            "currency": request.amount.currency,
            "reference": request.reference,
            "callback_url": request.callback_url.clone().or_else(|| self.config.callback_url.clone()),
            "metadata": {
                "enrollment_id": request.enrollment_id,
                "extra": request.metadata,
            },
        });

        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;

        if !raw.status {
            return Err(GatewayError::Provider {
                gateway: "paystack".to_string(),
                message: raw.message,
                provider_code: None,
                retryable: false,
            });
        }
        let data = raw.data;
        info!(reference = %data.reference, "paystack transaction initialized");

        Ok(InitiateResponse {
            handle: GatewayHandle::RedirectUrl {
                gateway_url: data.authorization_url,
            },
            gateway_transaction_id: Some(data.reference),
        })
    }

    /// The redirect landing posts `{"reference": ..., "status": ...}`. The
    /// structure is validated here; the reported status is carried through
    /// only so reconciliation can compare it against the verified outcome.
    fn parse_callback(
        &self,
        payload: &[u8],
        _signature: Option<&str>,
    ) -> GatewayResult<PaymentEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::MalformedCallback {
                message: format!("invalid callback JSON payload: {}", e),
            })?;

        let reference = parsed
            .get("reference")
            .and_then(|v| v.as_str())
            .ok_or(GatewayError::MalformedCallback {
                message: "callback payload missing reference".to_string(),
            })?;
        if !Self::valid_reference(reference) {
            return Err(GatewayError::MalformedCallback {
                message: "callback reference has invalid format".to_string(),
            });
        }

        let reported_status = parsed
            .get("status")
            .and_then(|v| v.as_str())
            .map(Self::map_transaction_status)
            .unwrap_or(ReportedStatus::Unknown);
        let enrollment_id = parsed
            .get("enrollment_id")
            .and_then(|v| v.as_str())
            .and_then(|v| Uuid::parse_str(v).ok());

        Ok(PaymentEvent {
            gateway: GatewayName::Paystack,
            gateway_transaction_id: Some(reference.to_string()),
            enrollment_id,
            reported_status,
            received_via: ReceivedVia::RedirectCallback,
            raw_payload: parsed,
            received_at: chrono::Utc::now(),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> GatewayResult<PaymentEvent> {
        if !Self::valid_reference(reference) {
            return Err(GatewayError::Rejected {
                message: "transaction reference has invalid format".to_string(),
                field: Some("reference".to_string()),
            });
        }

        let raw: PaystackEnvelope<PaystackVerifyData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", reference)),
                Some(&self.config.secret_key),
                None,
            )
            .await?;

        if !raw.status {
            return Err(GatewayError::Provider {
                gateway: "paystack".to_string(),
                message: raw.message,
                provider_code: None,
                retryable: false,
            });
        }

        let status = Self::map_transaction_status(&raw.data.status);
        Ok(PaymentEvent {
            gateway: GatewayName::Paystack,
            gateway_transaction_id: Some(reference.to_string()),
            enrollment_id: None,
            reported_status: status,
            received_via: ReceivedVia::System,
            raw_payload: serde_json::json!({
                "status": raw.data.status,
                "amount": raw.data.amount,
                "currency": raw.data.currency,
                "gateway_response": raw.data.gateway_response,
            }),
            received_at: chrono::Utc::now(),
        })
    }

    fn name(&self) -> GatewayName {
        GatewayName::Paystack
    }

    fn requires_callback_verification(&self) -> bool {
        // Redirect parameters are attacker-controlled; the verify endpoint
        // is the only source of truth.
        true
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    amount: u64,
    currency: String,
    status: String,
    #[serde(default)]
    gateway_response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> PaystackAdapter {
        PaystackAdapter::new(PaystackConfig {
            secret_key: "sk_test".to_string(),
            base_url: "https://api.paystack.co".to_string(),
            callback_url: Some("https://app.example.com/checkout/return".to_string()),
            timeout_secs: 5,
            max_retries: 1,
        })
        .expect("adapter init should succeed")
    }

    #[test]
    fn callback_parses_reference_and_flags_redirect_channel() {
        let adapter = adapter();
        let payload = br#"{"reference":"pay_abc-123","status":"success"}"#;
        let event = adapter
            .parse_callback(payload, None)
            .expect("callback should parse");
        assert_eq!(event.gateway_transaction_id.as_deref(), Some("pay_abc-123"));
        assert_eq!(event.reported_status, ReportedStatus::Succeeded);
        assert_eq!(event.received_via, ReceivedVia::RedirectCallback);
    }

    #[test]
    fn callback_without_reference_is_malformed() {
        let adapter = adapter();
        let err = adapter
            .parse_callback(br#"{"status":"success"}"#, None)
            .unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCallback { .. }));
    }

    #[test]
    fn callback_with_hostile_reference_is_malformed() {
        let adapter = adapter();
        let err = adapter
            .parse_callback(br#"{"reference":"../../etc/passwd","status":"success"}"#, None)
            .unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCallback { .. }));
    }

    #[test]
    fn callback_with_invalid_json_is_malformed() {
        let adapter = adapter();
        let err = adapter.parse_callback(b"not-json", None).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCallback { .. }));
    }

    #[test]
    fn redirect_gateway_requires_server_side_verification() {
        assert!(adapter().requires_callback_verification());
    }

    #[test]
    fn transaction_status_mapping_matches_gateway_vocabulary() {
        assert_eq!(
            PaystackAdapter::map_transaction_status("success"),
            ReportedStatus::Succeeded
        );
        assert_eq!(
            PaystackAdapter::map_transaction_status("abandoned"),
            ReportedStatus::Cancelled
        );
        assert_eq!(
            PaystackAdapter::map_transaction_status("failed"),
            ReportedStatus::Failed
        );
        assert_eq!(
            PaystackAdapter::map_transaction_status("ongoing"),
            ReportedStatus::Pending
        );
    }
}
