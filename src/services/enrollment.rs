//! Enrollment state machine.
//!
//! The only component allowed to mutate an enrollment's status or its
//! payment reference. Lifecycle:
//!
//! ```text
//! pending_payment -> active -> completed
//!        |             |
//!        v             +-> cancelled
//!    cancelled         +-> refunded
//! ```

use crate::gateways::types::{GatewayName, ReceivedVia};
use crate::services::catalog::{CatalogError, CourseCatalog};
use crate::store::enrollment::{Enrollment, EnrollmentStatus, EnrollmentStore};
use crate::store::error::StoreError;
use crate::store::payment::{Payment, PaymentStatus, PaymentStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("Duplicate enrollment for user {user_id} in course {course_id}")]
    DuplicateEnrollment { user_id: Uuid, course_id: Uuid },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },

    #[error("Payment {payment_id} is still in progress")]
    PaymentInProgress { payment_id: Uuid },

    #[error("Enrollment not found: {enrollment_id}")]
    NotFound { enrollment_id: Uuid },

    #[error("User {user_id} does not own enrollment {enrollment_id}")]
    NotOwner { enrollment_id: Uuid, user_id: Uuid },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type EnrollmentResult<T> = Result<T, EnrollmentError>;

impl From<EnrollmentError> for crate::error::AppError {
    fn from(err: EnrollmentError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError};

        match err {
            EnrollmentError::DuplicateEnrollment { user_id, course_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::DuplicateEnrollment {
                    user_id: user_id.to_string(),
                    course_id: course_id.to_string(),
                }))
            }
            EnrollmentError::InvalidTransition { from, to } => {
                AppError::new(AppErrorKind::Domain(DomainError::InvalidTransition {
                    entity: "Enrollment".to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                }))
            }
            EnrollmentError::PaymentInProgress { payment_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentInProgress {
                    payment_id: payment_id.to_string(),
                }))
            }
            EnrollmentError::NotFound { enrollment_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::EnrollmentNotFound {
                    enrollment_id: enrollment_id.to_string(),
                }))
            }
            EnrollmentError::NotOwner { enrollment_id, .. } => {
                AppError::new(AppErrorKind::Domain(DomainError::NotOwner {
                    enrollment_id: enrollment_id.to_string(),
                }))
            }
            EnrollmentError::Catalog(err) => err.into(),
            EnrollmentError::Store(err) => err.into(),
        }
    }
}

/// Result of a successful enrollment creation.
#[derive(Debug, Clone)]
pub struct CreatedEnrollment {
    pub enrollment: Enrollment,
    /// `None` for the free-enrollment fast path
    pub payment: Option<Payment>,
}

pub struct EnrollmentStateMachine {
    enrollments: Arc<dyn EnrollmentStore>,
    payments: Arc<dyn PaymentStore>,
    catalog: Arc<dyn CourseCatalog>,
}

impl EnrollmentStateMachine {
    pub fn new(
        enrollments: Arc<dyn EnrollmentStore>,
        payments: Arc<dyn PaymentStore>,
        catalog: Arc<dyn CourseCatalog>,
    ) -> Self {
        Self {
            enrollments,
            payments,
            catalog,
        }
    }

    pub async fn get(&self, enrollment_id: Uuid) -> EnrollmentResult<Enrollment> {
        self.enrollments
            .find_by_id(enrollment_id)
            .await?
            .ok_or(EnrollmentError::NotFound { enrollment_id })
    }

    /// Create an enrollment for (user, course).
    ///
    /// Free courses activate immediately and never touch the payment
    /// store. Priced courses start in `pending_payment` with one
    /// `initiated` payment attempt referenced by `payment_ref`.
    pub async fn create_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        gateway: GatewayName,
    ) -> EnrollmentResult<CreatedEnrollment> {
        let existing = self
            .enrollments
            .find_for_user_course(user_id, course_id)
            .await?;
        if existing.iter().any(|e| {
            matches!(
                e.status,
                EnrollmentStatus::Active | EnrollmentStatus::Completed
            )
        }) {
            return Err(EnrollmentError::DuplicateEnrollment { user_id, course_id });
        }

        let price = self.catalog.get_price(course_id).await?;
        let now = chrono::Utc::now();

        if price.is_free() {
            let enrollment = self
                .enrollments
                .insert(Enrollment {
                    id: Uuid::new_v4(),
                    user_id,
                    course_id,
                    status: EnrollmentStatus::Active,
                    payment_ref: None,
                    amount: price.amount,
                    currency: price.currency,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            info!(
                enrollment_id = %enrollment.id,
                course_id = %course_id,
                "free enrollment activated"
            );
            return Ok(CreatedEnrollment {
                enrollment,
                payment: None,
            });
        }

        let enrollment = self
            .enrollments
            .insert(Enrollment {
                id: Uuid::new_v4(),
                user_id,
                course_id,
                status: EnrollmentStatus::PendingPayment,
                payment_ref: None,
                amount: price.amount.clone(),
                currency: price.currency.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let payment = self
            .payments
            .insert(Payment {
                id: Uuid::new_v4(),
                enrollment_id: enrollment.id,
                gateway,
                gateway_transaction_id: None,
                amount: price.amount,
                currency: price.currency,
                status: PaymentStatus::Initiated,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let enrollment = self
            .enrollments
            .set_payment_ref(enrollment.id, EnrollmentStatus::PendingPayment, payment.id)
            .await?
            .ok_or(EnrollmentError::NotFound {
                enrollment_id: enrollment.id,
            })?;

        info!(
            enrollment_id = %enrollment.id,
            payment_id = %payment.id,
            gateway = %gateway,
            amount = %payment.amount,
            "enrollment created, awaiting payment"
        );

        Ok(CreatedEnrollment {
            enrollment,
            payment: Some(payment),
        })
    }

    /// Activate an enrollment whose referenced payment succeeded.
    ///
    /// Intended to be called by the reconciliation service only; the
    /// payment id must match the enrollment's current `payment_ref`.
    pub async fn mark_active(
        &self,
        enrollment_id: Uuid,
        payment_id: Uuid,
    ) -> EnrollmentResult<Enrollment> {
        let enrollment = self.get(enrollment_id).await?;

        if enrollment.status != EnrollmentStatus::PendingPayment {
            return Err(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::Active,
            });
        }
        if enrollment.payment_ref != Some(payment_id) {
            warn!(
                enrollment_id = %enrollment_id,
                payment_id = %payment_id,
                payment_ref = ?enrollment.payment_ref,
                "activation attempted with a stale payment reference"
            );
            return Err(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::Active,
            });
        }

        let updated = self
            .enrollments
            .update_status(
                enrollment_id,
                EnrollmentStatus::PendingPayment,
                EnrollmentStatus::Active,
            )
            .await?
            .ok_or(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::Active,
            })?;

        info!(enrollment_id = %enrollment_id, payment_id = %payment_id, "enrollment activated");
        Ok(updated)
    }

    /// User-initiated cancellation. Idempotent: cancelling an
    /// already-cancelled enrollment is a no-op.
    pub async fn cancel(
        &self,
        enrollment_id: Uuid,
        user_id: Uuid,
        reason: Option<&str>,
    ) -> EnrollmentResult<Enrollment> {
        let enrollment = self.get(enrollment_id).await?;
        if enrollment.user_id != user_id {
            return Err(EnrollmentError::NotOwner {
                enrollment_id,
                user_id,
            });
        }

        match enrollment.status {
            EnrollmentStatus::Cancelled => Ok(enrollment),
            EnrollmentStatus::PendingPayment | EnrollmentStatus::Active => {
                let from = enrollment.status;
                let updated = self
                    .enrollments
                    .update_status(enrollment_id, from, EnrollmentStatus::Cancelled)
                    .await?
                    .ok_or(EnrollmentError::InvalidTransition {
                        from,
                        to: EnrollmentStatus::Cancelled,
                    })?;
                info!(
                    enrollment_id = %enrollment_id,
                    from = %from,
                    reason = reason.unwrap_or("unspecified"),
                    "enrollment cancelled"
                );
                Ok(updated)
            }
            status => Err(EnrollmentError::InvalidTransition {
                from: status,
                to: EnrollmentStatus::Cancelled,
            }),
        }
    }

    /// Driven by the progress-tracking collaborator when all lessons are
    /// finished. Independent of payment state, but only reachable from
    /// `active`.
    pub async fn mark_completed(&self, enrollment_id: Uuid) -> EnrollmentResult<Enrollment> {
        let enrollment = self.get(enrollment_id).await?;
        let updated = self
            .enrollments
            .update_status(
                enrollment_id,
                EnrollmentStatus::Active,
                EnrollmentStatus::Completed,
            )
            .await?
            .ok_or(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::Completed,
            })?;
        info!(enrollment_id = %enrollment_id, "enrollment completed");
        Ok(updated)
    }

    /// Separately-authorized operator refund: the referenced payment gets
    /// its `refunded` terminal state and the enrollment follows.
    pub async fn refund(&self, enrollment_id: Uuid) -> EnrollmentResult<Enrollment> {
        let enrollment = self.get(enrollment_id).await?;
        if enrollment.status != EnrollmentStatus::Active {
            return Err(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::Refunded,
            });
        }
        let payment_id = enrollment.payment_ref.ok_or(EnrollmentError::InvalidTransition {
            from: enrollment.status,
            to: EnrollmentStatus::Refunded,
        })?;

        let refunded = self
            .payments
            .transition(
                payment_id,
                &[PaymentStatus::Succeeded],
                PaymentStatus::Refunded,
                ReceivedVia::System,
                serde_json::json!({"event": "operator_refund"}),
            )
            .await?;
        if refunded.is_none() {
            return Err(EnrollmentError::PaymentInProgress { payment_id });
        }

        let updated = self
            .enrollments
            .update_status(
                enrollment_id,
                EnrollmentStatus::Active,
                EnrollmentStatus::Refunded,
            )
            .await?
            .ok_or(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::Refunded,
            })?;

        info!(enrollment_id = %enrollment_id, payment_id = %payment_id, "enrollment refunded");
        Ok(updated)
    }

    /// Point `payment_ref` at a new attempt. Permitted only while the
    /// currently referenced payment is terminal and non-successful;
    /// anything else is a `PaymentInProgress` conflict.
    pub async fn reassign_payment_ref(
        &self,
        enrollment_id: Uuid,
        new_payment_id: Uuid,
    ) -> EnrollmentResult<Enrollment> {
        let enrollment = self.get(enrollment_id).await?;
        if enrollment.status != EnrollmentStatus::PendingPayment {
            return Err(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::PendingPayment,
            });
        }

        if let Some(current_id) = enrollment.payment_ref {
            if current_id != new_payment_id {
                let current = self.payments.find_by_id(current_id).await?;
                if let Some(current) = current {
                    if !current.status.is_terminal_failure() {
                        return Err(EnrollmentError::PaymentInProgress {
                            payment_id: current_id,
                        });
                    }
                }
            }
        }

        self.enrollments
            .set_payment_ref(enrollment_id, EnrollmentStatus::PendingPayment, new_payment_id)
            .await?
            .ok_or(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::PendingPayment,
            })
    }
}
