use std::fmt;

/// Persistence-layer error with a classified kind.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub kind: StoreErrorKind,
}

#[derive(Debug, Clone)]
pub enum StoreErrorKind {
    /// Row lookup that the caller required to exist came back empty
    NotFound { entity: String, id: String },
    /// Unique/constraint violation
    Conflict { message: String },
    /// Connection-level failure (pool exhausted, network)
    Connection { message: String },
    /// Query-level failure
    Query { message: String },
    Unknown { message: String },
}

impl StoreError {
    pub fn new(kind: StoreErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => StoreErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db) => {
                // 23505 = unique_violation
                if db.code().as_deref() == Some("23505") {
                    StoreErrorKind::Conflict {
                        message: db.message().to_string(),
                    }
                } else {
                    StoreErrorKind::Query {
                        message: db.message().to_string(),
                    }
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            _ => StoreErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, StoreErrorKind::Connection { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StoreErrorKind::NotFound { entity, id } => {
                write!(f, "{} '{}' not found", entity, id)
            }
            StoreErrorKind::Conflict { message } => write!(f, "Conflict: {}", message),
            StoreErrorKind::Connection { message } => {
                write!(f, "Database connection error: {}", message)
            }
            StoreErrorKind::Query { message } => write!(f, "Query error: {}", message),
            StoreErrorKind::Unknown { message } => write!(f, "Database error: {}", message),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for crate::error::AppError {
    fn from(err: StoreError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}
