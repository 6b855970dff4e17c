pub mod enrollments;
pub mod payments;

use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::gateways::factory::GatewayFactory;
use crate::services::checkout::CheckoutService;
use crate::services::enrollment::EnrollmentStateMachine;
use crate::services::reconciliation::ReconciliationService;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handler state
pub struct AppState {
    pub machine: Arc<EnrollmentStateMachine>,
    pub checkout: Arc<CheckoutService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub gateways: Arc<GatewayFactory>,
    pub pool: Option<PgPool>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/enrollments", post(enrollments::create_enrollment))
        .route(
            "/enrollments/{id}/cancel",
            put(enrollments::cancel_enrollment),
        )
        .route(
            "/payments/create-payment-intent",
            post(payments::create_payment_intent),
        )
        .route("/payments/stripe/webhook", post(payments::stripe_webhook))
        .route("/payments/stripe/confirm", post(payments::stripe_confirm))
        .route("/payments/paystack/verify", post(payments::paystack_verify))
        .with_state(state)
}

async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Json<crate::health::HealthStatus> {
    Json(crate::health::check(state.pool.as_ref()).await)
}

/// Identity is explicit: the out-of-scope auth layer authenticates the
/// session and forwards the user id in `x-user-id`. Core operations take
/// it as a parameter, never as ambient state.
pub(crate) fn require_user_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                field: "x-user-id".to_string(),
            }))
        })?;
    Uuid::parse_str(raw).map_err(|_| {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: "x-user-id".to_string(),
            reason: "must be a UUID".to_string(),
        }))
    })
}
