use crate::api::{require_user_id, AppState};
use crate::error::AppError;
use crate::gateways::types::GatewayName;
use crate::store::enrollment::Enrollment;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateEnrollmentRequest {
    pub course_id: Uuid,
    /// Gateway to collect payment with; defaults to the configured one.
    /// Ignored for free courses.
    #[serde(default)]
    pub gateway: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnrollmentResponse {
    pub enrollment: Enrollment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
}

/// POST /enrollments
pub async fn create_enrollment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateEnrollmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = require_user_id(&headers)?;
    let gateway = match &body.gateway {
        Some(raw) => GatewayName::from_str(raw).map_err(AppError::from)?,
        None => state.gateways.default_gateway(),
    };

    let created = state
        .machine
        .create_enrollment(user_id, body.course_id, gateway)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(EnrollmentResponse {
            payment_id: created.payment.map(|p| p.id),
            enrollment: created.enrollment,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelEnrollmentRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// PUT /enrollments/:id/cancel
pub async fn cancel_enrollment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CancelEnrollmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = require_user_id(&headers)?;
    let reason = body.reason.as_deref();

    let enrollment = state.machine.cancel(id, user_id, reason).await?;
    Ok((
        StatusCode::OK,
        Json(EnrollmentResponse {
            enrollment,
            payment_id: None,
        }),
    ))
}
