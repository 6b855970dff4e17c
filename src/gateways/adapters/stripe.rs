//! Card gateway adapter (Stripe).
//!
//! Checkout flow: a payment intent is created server-side and its
//! `client_secret` is handed to the client for confirmation. The
//! authoritative outcome arrives through signed webhooks; the client may
//! additionally report its own confirmation result, which reconciliation
//! treats as just another event channel.

use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    GatewayHandle, GatewayName, InitiateResponse, PaymentEvent, PaymentRequest, ReceivedVia,
    ReportedStatus,
};
use crate::gateways::utils::{hmac_sha256_hex, secure_eq, GatewayHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub publishable_key: Option<String>,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Webhook signature timestamp tolerance; rejects replayed payloads
    pub signature_tolerance_secs: i64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            publishable_key: None,
            webhook_secret: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            signature_tolerance_secs: 300,
        }
    }
}

impl StripeConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("STRIPE_SECRET_KEY").map_err(|_| GatewayError::Rejected {
                message: "STRIPE_SECRET_KEY environment variable is required".to_string(),
                field: Some("STRIPE_SECRET_KEY".to_string()),
            })?;
        let webhook_secret =
            std::env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| GatewayError::Rejected {
                message: "STRIPE_WEBHOOK_SECRET environment variable is required".to_string(),
                field: Some("STRIPE_WEBHOOK_SECRET".to_string()),
            })?;

        Ok(Self {
            secret_key,
            publishable_key: std::env::var("STRIPE_PUBLISHABLE_KEY").ok(),
            webhook_secret,
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("STRIPE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
            signature_tolerance_secs: std::env::var("STRIPE_SIGNATURE_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(300),
        })
    }
}

pub struct StripeAdapter {
    config: StripeConfig,
    http: GatewayHttpClient,
}

impl StripeAdapter {
    pub fn new(config: StripeConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Verify a `stripe-signature` header: `t=<unix>,v1=<hmac>`, where the
    /// HMAC-SHA256 is computed over `"{t}.{payload}"` with the webhook
    /// secret. Stale timestamps are rejected to stop replays.
    fn verify_signature(&self, payload: &[u8], header: &str) -> GatewayResult<()> {
        let mut timestamp: Option<&str> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(GatewayError::MalformedCallback {
            message: "signature header missing timestamp".to_string(),
        })?;
        if candidates.is_empty() {
            return Err(GatewayError::MalformedCallback {
                message: "signature header missing v1 signature".to_string(),
            });
        }

        let timestamp_secs: i64 =
            timestamp
                .parse()
                .map_err(|_| GatewayError::MalformedCallback {
                    message: "signature timestamp is not a number".to_string(),
                })?;
        let age = (chrono::Utc::now().timestamp() - timestamp_secs).abs();
        if age > self.config.signature_tolerance_secs {
            return Err(GatewayError::MalformedCallback {
                message: format!("signature timestamp outside tolerance ({}s old)", age),
            });
        }

        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let expected = hmac_sha256_hex(signed_payload.as_bytes(), &self.config.webhook_secret);
        let valid = candidates
            .iter()
            .any(|candidate| secure_eq(expected.as_bytes(), candidate.trim().as_bytes()));
        if !valid {
            return Err(GatewayError::MalformedCallback {
                message: "invalid stripe signature".to_string(),
            });
        }
        Ok(())
    }

    fn map_intent_status(status: &str) -> ReportedStatus {
        match status {
            "succeeded" => ReportedStatus::Succeeded,
            "processing" | "requires_action" | "requires_confirmation" => ReportedStatus::Pending,
            "requires_payment_method" => ReportedStatus::Failed,
            "canceled" => ReportedStatus::Cancelled,
            _ => ReportedStatus::Unknown,
        }
    }

    fn enrollment_id_from_metadata(object: &JsonValue) -> Option<Uuid> {
        object
            .get("metadata")
            .and_then(|m| m.get("enrollment_id"))
            .and_then(|v| v.as_str())
            .and_then(|v| Uuid::parse_str(v).ok())
    }
}

#[async_trait]
impl GatewayAdapter for StripeAdapter {
    async fn initiate(&self, request: PaymentRequest) -> GatewayResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let minor = request.amount.minor_units()?;

        let mut form: Vec<(&str, String)> = vec![
            ("amount", minor.to_string()),
            ("currency", request.amount.currency.to_lowercase()),
            ("metadata[reference]", request.reference.clone()),
            (
                "metadata[enrollment_id]",
                request.enrollment_id.to_string(),
            ),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("receipt_email", email.clone()));
        }

        let intent: StripePaymentIntent = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/payment_intents"),
                Some(&self.config.secret_key),
                &form,
            )
            .await?;

        info!(intent_id = %intent.id, "stripe payment intent created");

        let client_secret = intent.client_secret.ok_or(GatewayError::Provider {
            gateway: "stripe".to_string(),
            message: "payment intent response missing client_secret".to_string(),
            provider_code: None,
            retryable: false,
        })?;

        Ok(InitiateResponse {
            handle: GatewayHandle::ClientSecret { client_secret },
            gateway_transaction_id: Some(intent.id),
        })
    }

    fn parse_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> GatewayResult<PaymentEvent> {
        let signature = signature.ok_or(GatewayError::MalformedCallback {
            message: "missing stripe signature header".to_string(),
        })?;
        self.verify_signature(payload, signature)?;

        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::MalformedCallback {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(GatewayError::MalformedCallback {
                message: "webhook payload missing event type".to_string(),
            })?;
        let object = parsed
            .get("data")
            .and_then(|d| d.get("object"))
            .ok_or(GatewayError::MalformedCallback {
                message: "webhook payload missing data.object".to_string(),
            })?;
        let intent_id = object
            .get("id")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let reported_status = match event_type {
            "payment_intent.succeeded" => ReportedStatus::Succeeded,
            "payment_intent.payment_failed" => ReportedStatus::Failed,
            "payment_intent.canceled" => ReportedStatus::Cancelled,
            "payment_intent.processing" => ReportedStatus::Pending,
            _ => ReportedStatus::Unknown,
        };

        Ok(PaymentEvent {
            gateway: GatewayName::Stripe,
            gateway_transaction_id: intent_id,
            enrollment_id: Self::enrollment_id_from_metadata(object),
            reported_status,
            received_via: ReceivedVia::Webhook,
            raw_payload: parsed,
            received_at: chrono::Utc::now(),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> GatewayResult<PaymentEvent> {
        let intent: StripePaymentIntent = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payment_intents/{}", reference)),
                Some(&self.config.secret_key),
                None,
            )
            .await?;

        let status = intent
            .status
            .as_deref()
            .map(Self::map_intent_status)
            .unwrap_or(ReportedStatus::Unknown);

        Ok(PaymentEvent {
            gateway: GatewayName::Stripe,
            gateway_transaction_id: Some(intent.id),
            enrollment_id: None,
            reported_status: status,
            received_via: ReceivedVia::System,
            raw_payload: serde_json::json!({"status": intent.status}),
            received_at: chrono::Utc::now(),
        })
    }

    fn name(&self) -> GatewayName {
        GatewayName::Stripe
    }

    fn requires_callback_verification(&self) -> bool {
        // Webhooks carry a verifiable signature; no second round trip needed.
        false
    }
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> StripeAdapter {
        StripeAdapter::new(StripeConfig {
            secret_key: "sk_test".to_string(),
            publishable_key: Some("pk_test".to_string()),
            webhook_secret: "whsec_test123secret456".to_string(),
            base_url: "https://api.stripe.com".to_string(),
            timeout_secs: 5,
            max_retries: 1,
            signature_tolerance_secs: 300,
        })
        .expect("adapter init should succeed")
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        format!(
            "t={},v1={}",
            timestamp,
            hmac_sha256_hex(signed_payload.as_bytes(), secret)
        )
    }

    #[test]
    fn callback_with_valid_signature_parses_success_event() {
        let adapter = adapter();
        let payload = serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_123",
                "metadata": {"enrollment_id": "7f2d6a1e-0b6f-4f8e-9a34-0f1f2e3d4c5b"}
            }}
        });
        let bytes = serde_json::to_vec(&payload).unwrap();
        let header = sign(&bytes, "whsec_test123secret456", chrono::Utc::now().timestamp());

        let event = adapter
            .parse_callback(&bytes, Some(&header))
            .expect("callback should parse");
        assert_eq!(event.reported_status, ReportedStatus::Succeeded);
        assert_eq!(event.gateway_transaction_id.as_deref(), Some("pi_123"));
        assert!(event.enrollment_id.is_some());
        assert_eq!(event.received_via, ReceivedVia::Webhook);
    }

    #[test]
    fn callback_with_wrong_secret_is_rejected() {
        let adapter = adapter();
        let payload = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;
        let header = sign(payload, "wrong_secret", chrono::Utc::now().timestamp());

        let err = adapter.parse_callback(payload, Some(&header)).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCallback { .. }));
    }

    #[test]
    fn callback_with_tampered_payload_is_rejected() {
        let adapter = adapter();
        let original = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;
        let tampered =
            br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_other"}}}"#;
        let header = sign(
            original,
            "whsec_test123secret456",
            chrono::Utc::now().timestamp(),
        );

        let err = adapter.parse_callback(tampered, Some(&header)).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCallback { .. }));
    }

    #[test]
    fn callback_with_stale_timestamp_is_rejected() {
        let adapter = adapter();
        let payload = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;
        let stale = chrono::Utc::now().timestamp() - 600;
        let header = sign(payload, "whsec_test123secret456", stale);

        let err = adapter.parse_callback(payload, Some(&header)).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCallback { .. }));
    }

    #[test]
    fn callback_without_signature_is_rejected() {
        let adapter = adapter();
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let err = adapter.parse_callback(payload, None).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCallback { .. }));
    }

    #[test]
    fn intent_status_mapping_covers_terminal_states() {
        assert_eq!(
            StripeAdapter::map_intent_status("succeeded"),
            ReportedStatus::Succeeded
        );
        assert_eq!(
            StripeAdapter::map_intent_status("requires_payment_method"),
            ReportedStatus::Failed
        );
        assert_eq!(
            StripeAdapter::map_intent_status("canceled"),
            ReportedStatus::Cancelled
        );
        assert_eq!(
            StripeAdapter::map_intent_status("processing"),
            ReportedStatus::Pending
        );
    }
}
