use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Gateway rejected request: {message}")]
    Rejected {
        message: String,
        field: Option<String>,
    },

    #[error("Gateway unavailable: {message}")]
    Unavailable { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Malformed callback: {message}")]
    MalformedCallback { message: String },

    #[error("Gateway error: gateway={gateway}, message={message}")]
    Provider {
        gateway: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Rejected { .. } => false,
            GatewayError::Unavailable { .. } => true,
            GatewayError::RateLimited { .. } => true,
            GatewayError::MalformedCallback { .. } => false,
            GatewayError::Provider { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::Rejected { .. } => 400,
            GatewayError::Unavailable { .. } => 503,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::MalformedCallback { .. } => 401,
            GatewayError::Provider { .. } => 502,
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, SecurityError};

        let kind = match &err {
            GatewayError::Rejected { message, .. } => {
                AppErrorKind::External(ExternalError::GatewayRejected {
                    gateway: "gateway".to_string(),
                    message: message.clone(),
                })
            }
            GatewayError::Unavailable { message } => {
                AppErrorKind::External(ExternalError::GatewayUnavailable {
                    gateway: "gateway".to_string(),
                    message: message.clone(),
                })
            }
            GatewayError::RateLimited {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "gateway".to_string(),
                retry_after: *retry_after_seconds,
            }),
            GatewayError::MalformedCallback { message } => {
                AppErrorKind::Security(SecurityError::MalformedCallback {
                    gateway: "gateway".to_string(),
                    message: message.clone(),
                })
            }
            GatewayError::Provider {
                gateway,
                message,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::Gateway {
                gateway: gateway.clone(),
                message: message.clone(),
                is_retryable: *retryable,
            }),
        };
        AppError::new(kind)
    }
}
