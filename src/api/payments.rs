use crate::api::{require_user_id, AppState};
use crate::error::AppError;
use crate::gateways::error::GatewayError;
use crate::gateways::types::{
    GatewayHandle, GatewayName, PaymentEvent, ReceivedVia, ReportedStatus,
};
use crate::services::reconciliation::{ReconcileError, ReconcileOutcome};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentIntentRequest {
    pub enrollment_id: Uuid,
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// POST /payments/create-payment-intent
pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentIntentRequest>,
) -> Result<Json<GatewayHandle>, AppError> {
    let user_id = require_user_id(&headers)?;
    let handle = state
        .checkout
        .create_payment_intent(body.enrollment_id, user_id, body.customer_email)
        .await?;
    Ok(Json(handle))
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

fn outcome_label(outcome: &ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::Applied {
            payment_status,
            enrollment_activated,
            ..
        } => {
            if *enrollment_activated {
                "enrollment_activated".to_string()
            } else {
                format!("payment_{}", payment_status)
            }
        }
        ReconcileOutcome::Duplicate { .. } => "duplicate".to_string(),
        ReconcileOutcome::Ignored { .. } => "ignored".to_string(),
    }
}

/// POST /payments/stripe/webhook
///
/// Gateway-origin channel. Returns 401 when the signature fails; once the
/// event is accepted for reconciliation the response is always 200 so the
/// gateway does not build a retry storm — processing failures are logged
/// and land in the conflict log, never in the HTTP status.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let adapter = match state.gateways.adapter(GatewayName::Stripe) {
        Ok(adapter) => adapter,
        Err(e) => {
            error!(error = %e, "stripe webhook received but gateway is not enabled");
            return (StatusCode::SERVICE_UNAVAILABLE, "gateway disabled").into_response();
        }
    };

    let event = match adapter.parse_callback(body.as_bytes(), signature) {
        Ok(event) => event,
        Err(e @ GatewayError::MalformedCallback { .. }) => {
            warn!(error = %e, "rejected stripe webhook");
            return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
        }
        Err(e) => {
            error!(error = %e, "failed to parse stripe webhook");
            return (StatusCode::BAD_REQUEST, "invalid payload").into_response();
        }
    };

    match state.reconciliation.process_event(event).await {
        Ok(outcome) => {
            info!(outcome = %outcome_label(&outcome), "stripe webhook reconciled");
        }
        Err(ReconcileError::ConflictingPaymentEvent { payment_id, .. }) => {
            // Already in the conflict log; acknowledged so the gateway
            // stops redelivering.
            error!(payment_id = %payment_id, "stripe webhook raised a payment conflict");
        }
        Err(e) => {
            error!(error = %e, "stripe webhook processing failed");
        }
    }
    (
        StatusCode::OK,
        Json(CallbackResponse {
            status: "ok",
            outcome: None,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct StripeConfirmRequest {
    pub payment_intent_id: String,
    /// Client-observed confirmation result
    pub status: String,
}

/// POST /payments/stripe/confirm
///
/// Client-confirmation channel: the browser reports what the gateway told
/// it after confirming the intent. Races the webhook for the same payment;
/// whichever is processed first wins and the loser is absorbed by the
/// idempotency check.
pub async fn stripe_confirm(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StripeConfirmRequest>,
) -> Result<Json<CallbackResponse>, AppError> {
    require_user_id(&headers)?;

    let reported_status = match body.status.as_str() {
        "succeeded" => ReportedStatus::Succeeded,
        "processing" => ReportedStatus::Pending,
        "failed" | "requires_payment_method" => ReportedStatus::Failed,
        "canceled" | "cancelled" => ReportedStatus::Cancelled,
        _ => ReportedStatus::Unknown,
    };

    let event = PaymentEvent {
        gateway: GatewayName::Stripe,
        gateway_transaction_id: Some(body.payment_intent_id.clone()),
        enrollment_id: None,
        reported_status,
        received_via: ReceivedVia::ClientConfirmation,
        raw_payload: serde_json::json!({
            "payment_intent_id": body.payment_intent_id,
            "status": body.status,
        }),
        received_at: chrono::Utc::now(),
    };

    let outcome = state.reconciliation.process_event(event).await?;
    Ok(Json(CallbackResponse {
        status: "ok",
        outcome: Some(outcome_label(&outcome)),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PaystackVerifyRequest {
    pub reference: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// POST /payments/paystack/verify
///
/// Redirect-callback landing. The posted parameters are never trusted:
/// reconciliation re-validates any reported success against the gateway's
/// verification endpoint before a single byte of state changes. Once the
/// payload passes structure validation the response is 200 with the
/// outcome in the body.
pub async fn paystack_verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PaystackVerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let adapter = state
        .gateways
        .adapter(GatewayName::Paystack)
        .map_err(AppError::from)?;

    let payload = serde_json::json!({
        "reference": body.reference,
        "status": body.status,
    });
    let raw = serde_json::to_vec(&payload).unwrap_or_default();
    let event = adapter.parse_callback(&raw, None).map_err(AppError::from)?;

    match state.reconciliation.process_event(event).await {
        Ok(outcome) => Ok((
            StatusCode::OK,
            Json(CallbackResponse {
                status: "ok",
                outcome: Some(outcome_label(&outcome)),
            }),
        )),
        Err(ReconcileError::ConflictingPaymentEvent { payment_id, .. }) => {
            error!(payment_id = %payment_id, "paystack verify raised a payment conflict");
            Ok((
                StatusCode::OK,
                Json(CallbackResponse {
                    status: "ok",
                    outcome: Some("held_for_review".to_string()),
                }),
            ))
        }
        Err(e) => {
            error!(error = %e, "paystack verify processing failed");
            Ok((
                StatusCode::OK,
                Json(CallbackResponse {
                    status: "ok",
                    outcome: Some("pending".to_string()),
                }),
            ))
        }
    }
}
