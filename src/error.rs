//! Unified error handling for the skillpath backend
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "DUPLICATE_ENROLLMENT")]
    DuplicateEnrollment,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "PAYMENT_IN_PROGRESS")]
    PaymentInProgress,
    #[serde(rename = "ENROLLMENT_NOT_FOUND")]
    EnrollmentNotFound,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "NOT_OWNER")]
    NotOwner,
    #[serde(rename = "CONFLICTING_PAYMENT_EVENT")]
    ConflictingPaymentEvent,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (4xx/5xx depending on gateway outcome)
    #[serde(rename = "GATEWAY_REJECTED")]
    GatewayRejected,
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "GATEWAY_TIMEOUT")]
    GatewayTimeout,

    // Security errors (401)
    #[serde(rename = "MALFORMED_CALLBACK")]
    MalformedCallback,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// An active or completed enrollment already exists for (user, course)
    DuplicateEnrollment { user_id: String, course_id: String },
    /// Requested state change violates the enrollment/payment lifecycle
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },
    /// The current payment attempt is not terminal, so it cannot be replaced
    PaymentInProgress { payment_id: String },
    /// Enrollment with given id doesn't exist
    EnrollmentNotFound { enrollment_id: String },
    /// Payment could not be resolved from the given reference
    PaymentNotFound { reference: String },
    /// Caller does not own the enrollment
    NotOwner { enrollment_id: String },
    /// Two terminal payment events disagree; held for operator review
    ConflictingPaymentEvent {
        payment_id: String,
        stored: String,
        reported: String,
    },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment gateways)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Gateway rejected the request outright (validation); not retryable
    GatewayRejected { gateway: String, message: String },
    /// Gateway unreachable or returned a server error; retryable by the client
    GatewayUnavailable { gateway: String, message: String },
    /// Other gateway-reported error
    Gateway {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Security-relevant rejections. Callbacks are the attack surface for
/// payment spoofing, so these are rejected outright and logged, never
/// partially processed.
#[derive(Debug, Clone)]
pub enum SecurityError {
    /// Signature or structure validation of a gateway callback failed
    MalformedCallback { gateway: String, message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field value failed to parse
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Security(SecurityError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateEnrollment { .. } => 409,
                DomainError::InvalidTransition { .. } => 422,
                DomainError::PaymentInProgress { .. } => 409,
                DomainError::EnrollmentNotFound { .. } => 404,
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::NotOwner { .. } => 403,
                DomainError::ConflictingPaymentEvent { .. } => 409,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayRejected { .. } => 400,
                ExternalError::GatewayUnavailable { .. } => 503,
                ExternalError::Gateway { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::MalformedCallback { .. } => 401,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateEnrollment { .. } => ErrorCode::DuplicateEnrollment,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::PaymentInProgress { .. } => ErrorCode::PaymentInProgress,
                DomainError::EnrollmentNotFound { .. } => ErrorCode::EnrollmentNotFound,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::NotOwner { .. } => ErrorCode::NotOwner,
                DomainError::ConflictingPaymentEvent { .. } => ErrorCode::ConflictingPaymentEvent,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayRejected { .. } => ErrorCode::GatewayRejected,
                ExternalError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::GatewayTimeout,
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::MalformedCallback { .. } => ErrorCode::MalformedCallback,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Whether the client may retry the request as-is
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayRejected { .. } => false,
                ExternalError::GatewayUnavailable { .. } => true,
                ExternalError::Gateway { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Security(_) => false,
            AppErrorKind::Validation(_) => false,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateEnrollment { course_id, .. } => {
                    format!("You are already enrolled in course '{}'", course_id)
                }
                DomainError::InvalidTransition { entity, from, to } => {
                    format!("{} cannot move from '{}' to '{}'", entity, from, to)
                }
                DomainError::PaymentInProgress { .. } => {
                    "A payment attempt for this enrollment is still in progress".to_string()
                }
                DomainError::EnrollmentNotFound { enrollment_id } => {
                    format!("Enrollment '{}' not found", enrollment_id)
                }
                DomainError::PaymentNotFound { reference } => {
                    format!("No payment found for reference '{}'", reference)
                }
                DomainError::NotOwner { .. } => {
                    "You do not have access to this enrollment".to_string()
                }
                DomainError::ConflictingPaymentEvent { payment_id, .. } => {
                    format!(
                        "Payment '{}' received conflicting gateway reports and is held for review",
                        payment_id
                    )
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayRejected { gateway, message } => {
                    format!("Payment gateway ({}) rejected the request: {}", gateway, message)
                }
                ExternalError::GatewayUnavailable { gateway, .. } => {
                    format!(
                        "Payment gateway ({}) is temporarily unavailable. Please try again",
                        gateway
                    )
                }
                ExternalError::Gateway { is_retryable, .. } => {
                    if *is_retryable {
                        "Payment gateway error. Please try again".to_string()
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Security(err) => match err {
                SecurityError::MalformedCallback { .. } => "Invalid callback".to_string(),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid field '{}': {}", field, reason)
                }
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AppErrorKind::Domain(err) => write!(f, "Domain error: {:?}", err),
            AppErrorKind::Infrastructure(err) => write!(f, "Infrastructure error: {:?}", err),
            AppErrorKind::External(err) => write!(f, "External error: {:?}", err),
            AppErrorKind::Security(err) => write!(f, "Security error: {:?}", err),
            AppErrorKind::Validation(err) => write!(f, "Validation error: {:?}", err),
        }?;
        if let Some(context) = &self.context {
            write!(f, " (context: {})", context)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_client_status_codes() {
        let duplicate = AppError::new(AppErrorKind::Domain(DomainError::DuplicateEnrollment {
            user_id: "u1".to_string(),
            course_id: "c1".to_string(),
        }));
        assert_eq!(duplicate.status_code(), 409);
        assert_eq!(duplicate.error_code(), ErrorCode::DuplicateEnrollment);
        assert!(!duplicate.is_retryable());

        let not_owner = AppError::new(AppErrorKind::Domain(DomainError::NotOwner {
            enrollment_id: "e1".to_string(),
        }));
        assert_eq!(not_owner.status_code(), 403);
    }

    #[test]
    fn gateway_rejection_is_a_client_error() {
        let rejected = AppError::new(AppErrorKind::External(ExternalError::GatewayRejected {
            gateway: "stripe".to_string(),
            message: "amount too small".to_string(),
        }));
        assert_eq!(rejected.status_code(), 400);
        assert!(!rejected.is_retryable());

        let unavailable = AppError::new(AppErrorKind::External(ExternalError::GatewayUnavailable {
            gateway: "paystack".to_string(),
            message: "connect timeout".to_string(),
        }));
        assert_eq!(unavailable.status_code(), 503);
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn malformed_callback_is_unauthorized_and_never_retryable() {
        let err = AppError::new(AppErrorKind::Security(SecurityError::MalformedCallback {
            gateway: "stripe".to_string(),
            message: "bad signature".to_string(),
        }));
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.error_code(), ErrorCode::MalformedCallback);
        assert!(!err.is_retryable());
    }
}
