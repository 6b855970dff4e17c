//! Payment reconciliation service.
//!
//! Consumes normalized `PaymentEvent`s from every channel (webhook,
//! redirect callback, client confirmation), decides exactly once whether
//! and how to mutate payment and enrollment state, and fires the receipt
//! emitter on activation.
//!
//! Guarantees:
//! - per-payment processing is serialized (keyed async mutex plus the
//!   store's compare-and-set transition), so two racing duplicates cannot
//!   both pass the idempotency check;
//! - a terminal payment is never overwritten: matching redeliveries are
//!   discarded silently, disagreeing terminal reports go to the conflict
//!   log for operator review;
//! - redirect-gateway success reports are re-validated against the
//!   gateway's verification endpoint before acceptance.

use crate::config::CheckoutConfig;
use crate::gateways::error::GatewayError;
use crate::gateways::factory::GatewayFactory;
use crate::gateways::types::{PaymentEvent, ReceivedVia, ReportedStatus};
use crate::services::enrollment::{EnrollmentError, EnrollmentStateMachine};
use crate::services::receipt::ReceiptEmitter;
use crate::store::error::StoreError;
use crate::store::payment::{Payment, PaymentConflict, PaymentStatus, PaymentStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Conflicting payment event for {payment_id}: stored {stored}, reported {reported}")]
    ConflictingPaymentEvent {
        payment_id: Uuid,
        stored: PaymentStatus,
        reported: ReportedStatus,
    },

    #[error("No payment found for event (reference {reference:?}, enrollment {enrollment_id:?})")]
    PaymentNotFound {
        reference: Option<String>,
        enrollment_id: Option<Uuid>,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

impl From<ReconcileError> for crate::error::AppError {
    fn from(err: ReconcileError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError};

        match err {
            ReconcileError::ConflictingPaymentEvent {
                payment_id,
                stored,
                reported,
            } => AppError::new(AppErrorKind::Domain(DomainError::ConflictingPaymentEvent {
                payment_id: payment_id.to_string(),
                stored: stored.to_string(),
                reported: reported.to_string(),
            })),
            ReconcileError::PaymentNotFound {
                reference,
                enrollment_id,
            } => AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
                reference: reference
                    .or_else(|| enrollment_id.map(|id| id.to_string()))
                    .unwrap_or_else(|| "unknown".to_string()),
            })),
            ReconcileError::Gateway(e) => e.into(),
            ReconcileError::Store(e) => e.into(),
            ReconcileError::Enrollment(e) => e.into(),
        }
    }
}

/// What a processed event did to the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Event advanced the payment (and possibly activated the enrollment)
    Applied {
        payment_id: Uuid,
        payment_status: PaymentStatus,
        enrollment_activated: bool,
    },
    /// Redelivery of an already-recorded terminal outcome; discarded
    Duplicate { payment_id: Uuid },
    /// Event carried nothing actionable (stale pending report, unknown status)
    Ignored { payment_id: Uuid, reason: String },
}

/// Keyed mutex map serializing reconciliation per payment id.
#[derive(Default)]
struct PaymentLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl PaymentLocks {
    async fn acquire(&self, payment_id: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(payment_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct ReconciliationService {
    payments: Arc<dyn PaymentStore>,
    machine: Arc<EnrollmentStateMachine>,
    gateways: Arc<GatewayFactory>,
    emitter: Arc<dyn ReceiptEmitter>,
    config: CheckoutConfig,
    locks: PaymentLocks,
}

impl ReconciliationService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        machine: Arc<EnrollmentStateMachine>,
        gateways: Arc<GatewayFactory>,
        emitter: Arc<dyn ReceiptEmitter>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            payments,
            machine,
            gateways,
            emitter,
            config,
            locks: PaymentLocks::default(),
        }
    }

    /// Process one payment event end to end.
    pub async fn process_event(&self, event: PaymentEvent) -> ReconcileResult<ReconcileOutcome> {
        let payment = self.resolve_payment(&event).await?;

        // Redirect-style gateways: never trust a reported success; ask the
        // gateway before taking any lock, so the network round trip cannot
        // stall other events for this payment.
        let event = self.verify_if_required(event, &payment).await?;

        let _guard = self.locks.acquire(payment.id).await;

        // Re-read under the lock; a racing event may have won.
        let payment = self
            .payments
            .find_by_id(payment.id)
            .await?
            .ok_or_else(|| StoreError::not_found("Payment", payment.id.to_string()))?;

        if payment.status.is_terminal() {
            return self.handle_terminal(&payment, &event).await;
        }
        self.apply(&payment, &event).await
    }

    /// Resolve the target payment: by gateway transaction id first, then by
    /// the enrollment's current payment reference (first event for an
    /// attempt that has no bound transaction id yet).
    async fn resolve_payment(&self, event: &PaymentEvent) -> ReconcileResult<Payment> {
        if let Some(reference) = &event.gateway_transaction_id {
            if let Some(payment) = self
                .payments
                .find_by_gateway_reference(event.gateway, reference)
                .await?
            {
                return Ok(payment);
            }
        }

        if let Some(enrollment_id) = event.enrollment_id {
            let enrollment = self.machine.get(enrollment_id).await?;
            if let Some(payment_id) = enrollment.payment_ref {
                if let Some(payment) = self.payments.find_by_id(payment_id).await? {
                    // Late-binding: remember the transaction id for the
                    // dedup of every later delivery.
                    if payment.gateway_transaction_id.is_none() {
                        if let Some(reference) = &event.gateway_transaction_id {
                            let bound = self
                                .payments
                                .bind_gateway_reference(payment.id, reference)
                                .await?;
                            return Ok(bound);
                        }
                    }
                    return Ok(payment);
                }
            }
        }

        Err(ReconcileError::PaymentNotFound {
            reference: event.gateway_transaction_id.clone(),
            enrollment_id: event.enrollment_id,
        })
    }

    async fn verify_if_required(
        &self,
        event: PaymentEvent,
        payment: &Payment,
    ) -> ReconcileResult<PaymentEvent> {
        if event.reported_status != ReportedStatus::Succeeded {
            return Ok(event);
        }
        if event.received_via == ReceivedVia::System {
            // Already the output of a verification call.
            return Ok(event);
        }
        let adapter = self.gateways.adapter(payment.gateway)?;
        if !adapter.requires_callback_verification() {
            return Ok(event);
        }

        let reference = event
            .gateway_transaction_id
            .clone()
            .or_else(|| payment.gateway_transaction_id.clone())
            .ok_or(GatewayError::MalformedCallback {
                message: "success report without a transaction reference".to_string(),
            })?;

        let deadline = Duration::from_secs(self.config.verify_timeout_secs);
        let verified = tokio::time::timeout(deadline, adapter.verify_transaction(&reference))
            .await
            .map_err(|_| GatewayError::Unavailable {
                message: format!(
                    "gateway verification exceeded {}s deadline",
                    self.config.verify_timeout_secs
                ),
            })??;

        if verified.reported_status != event.reported_status {
            warn!(
                payment_id = %payment.id,
                reported = %event.reported_status,
                verified = %verified.reported_status,
                "gateway verification overruled the callback-reported status"
            );
        }

        // Keep the original channel for the audit trail; only the status
        // and payload come from the verification call.
        Ok(PaymentEvent {
            reported_status: verified.reported_status,
            raw_payload: serde_json::json!({
                "callback": event.raw_payload,
                "verification": verified.raw_payload,
            }),
            ..event
        })
    }

    /// Idempotency check for events hitting a terminal payment (step 2 of
    /// the reconciliation algorithm).
    async fn handle_terminal(
        &self,
        payment: &Payment,
        event: &PaymentEvent,
    ) -> ReconcileResult<ReconcileOutcome> {
        if !event.reported_status.is_terminal() {
            return Ok(ReconcileOutcome::Ignored {
                payment_id: payment.id,
                reason: format!(
                    "non-terminal report '{}' for terminal payment",
                    event.reported_status
                ),
            });
        }

        let stored_success = payment.status == PaymentStatus::Succeeded;
        let reported_success = event.reported_status == ReportedStatus::Succeeded;

        // A refunded payment once succeeded; stale success redeliveries
        // for it are duplicates, not conflicts.
        if payment.status == PaymentStatus::Refunded {
            debug!(payment_id = %payment.id, "terminal event for refunded payment discarded");
            return Ok(ReconcileOutcome::Duplicate {
                payment_id: payment.id,
            });
        }

        if stored_success == reported_success {
            debug!(
                payment_id = %payment.id,
                status = %payment.status,
                via = %event.received_via,
                "duplicate terminal event discarded"
            );
            return Ok(ReconcileOutcome::Duplicate {
                payment_id: payment.id,
            });
        }

        // Terminal disagreement: never auto-resolved, never downgraded.
        let conflict = PaymentConflict {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            gateway_transaction_id: event
                .gateway_transaction_id
                .clone()
                .or_else(|| payment.gateway_transaction_id.clone()),
            stored_status: payment.status,
            reported_status: event.reported_status.to_string(),
            received_via: event.received_via,
            payload: event.raw_payload.clone(),
            created_at: chrono::Utc::now(),
        };
        self.payments.record_conflict(conflict).await?;
        error!(
            payment_id = %payment.id,
            stored = %payment.status,
            reported = %event.reported_status,
            via = %event.received_via,
            "conflicting terminal payment event held for operator review"
        );
        Err(ReconcileError::ConflictingPaymentEvent {
            payment_id: payment.id,
            stored: payment.status,
            reported: event.reported_status,
        })
    }

    /// Apply the transition implied by the event to a non-terminal payment
    /// (steps 3-5 of the reconciliation algorithm).
    async fn apply(
        &self,
        payment: &Payment,
        event: &PaymentEvent,
    ) -> ReconcileResult<ReconcileOutcome> {
        let detail = serde_json::json!({
            "reported_status": event.reported_status,
            "payload": event.raw_payload,
        });

        match event.reported_status {
            ReportedStatus::Succeeded => {
                let updated = match self
                    .payments
                    .transition(
                        payment.id,
                        &[PaymentStatus::Initiated, PaymentStatus::AwaitingConfirmation],
                        PaymentStatus::Succeeded,
                        event.received_via,
                        detail,
                    )
                    .await?
                {
                    Some(updated) => updated,
                    // A non-reconciliation writer (expiry pass) slipped in.
                    None => return self.reroute_lost_race(payment.id, event).await,
                };

                let activated = match self
                    .machine
                    .mark_active(updated.enrollment_id, updated.id)
                    .await
                {
                    Ok(enrollment) => {
                        self.emitter
                            .on_enrollment_activated(&enrollment, &updated)
                            .await;
                        true
                    }
                    Err(EnrollmentError::InvalidTransition { from, to }) => {
                        // Payment money arrived for an enrollment that left
                        // pending_payment (user cancelled mid-flight).
                        // Operators refund from here.
                        warn!(
                            enrollment_id = %updated.enrollment_id,
                            payment_id = %updated.id,
                            from = %from,
                            to = %to,
                            "payment succeeded but enrollment could not be activated"
                        );
                        false
                    }
                    Err(other) => return Err(other.into()),
                };

                info!(
                    payment_id = %updated.id,
                    enrollment_id = %updated.enrollment_id,
                    via = %event.received_via,
                    activated,
                    "payment succeeded"
                );
                Ok(ReconcileOutcome::Applied {
                    payment_id: updated.id,
                    payment_status: PaymentStatus::Succeeded,
                    enrollment_activated: activated,
                })
            }
            ReportedStatus::Failed | ReportedStatus::Cancelled => {
                let target = if event.reported_status == ReportedStatus::Cancelled {
                    PaymentStatus::Cancelled
                } else {
                    PaymentStatus::Failed
                };
                let updated = match self
                    .payments
                    .transition(
                        payment.id,
                        &[PaymentStatus::Initiated, PaymentStatus::AwaitingConfirmation],
                        target,
                        event.received_via,
                        detail,
                    )
                    .await?
                {
                    Some(updated) => updated,
                    None => return self.reroute_lost_race(payment.id, event).await,
                };

                // Enrollment stays pending_payment so checkout can retry.
                info!(
                    payment_id = %updated.id,
                    enrollment_id = %updated.enrollment_id,
                    status = %target,
                    via = %event.received_via,
                    "payment attempt closed without success"
                );
                Ok(ReconcileOutcome::Applied {
                    payment_id: updated.id,
                    payment_status: target,
                    enrollment_activated: false,
                })
            }
            ReportedStatus::Pending => {
                let updated = self
                    .payments
                    .transition(
                        payment.id,
                        &[PaymentStatus::Initiated],
                        PaymentStatus::AwaitingConfirmation,
                        event.received_via,
                        detail,
                    )
                    .await?;
                match updated {
                    Some(updated) => Ok(ReconcileOutcome::Applied {
                        payment_id: updated.id,
                        payment_status: PaymentStatus::AwaitingConfirmation,
                        enrollment_activated: false,
                    }),
                    None => Ok(ReconcileOutcome::Ignored {
                        payment_id: payment.id,
                        reason: "pending report for payment already awaiting confirmation"
                            .to_string(),
                    }),
                }
            }
            ReportedStatus::Unknown => Ok(ReconcileOutcome::Ignored {
                payment_id: payment.id,
                reason: "gateway reported an unknown status".to_string(),
            }),
        }
    }

    /// The transition guard failed under the lock: a writer outside the
    /// reconciliation path changed the status. Re-read and fold the event
    /// into the terminal handling.
    async fn reroute_lost_race(
        &self,
        payment_id: Uuid,
        event: &PaymentEvent,
    ) -> ReconcileResult<ReconcileOutcome> {
        let current = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Payment", payment_id.to_string()))?;
        if current.status.is_terminal() {
            return self.handle_terminal(&current, event).await;
        }
        Ok(ReconcileOutcome::Ignored {
            payment_id,
            reason: format!("transition guard lost to concurrent '{}' status", current.status),
        })
    }

    /// Operator view of the conflict log.
    pub async fn conflicts(&self) -> ReconcileResult<Vec<PaymentConflict>> {
        Ok(self.payments.conflicts().await?)
    }
}
