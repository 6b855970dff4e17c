//! Checkout service: payment-intent creation and checkout retry.
//!
//! Bridges the enrollment state machine and the gateway adapters. Gateway
//! calls run under a deadline so a stalled gateway can never wedge a
//! request, and no store lock is held across them.

use crate::config::CheckoutConfig;
use crate::gateways::error::GatewayError;
use crate::gateways::factory::GatewayFactory;
use crate::gateways::types::{GatewayHandle, Money, PaymentRequest, ReceivedVia};
use crate::services::enrollment::{EnrollmentError, EnrollmentStateMachine};
use crate::store::enrollment::EnrollmentStatus;
use crate::store::error::StoreError;
use crate::store::payment::{Payment, PaymentStatus, PaymentStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Enrollment {enrollment_id} has no payment attempt")]
    MissingPaymentRef { enrollment_id: Uuid },
}

pub type CheckoutResult<T> = Result<T, CheckoutError>;

impl From<CheckoutError> for crate::error::AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Enrollment(e) => e.into(),
            CheckoutError::Gateway(e) => e.into(),
            CheckoutError::Store(e) => e.into(),
            CheckoutError::MissingPaymentRef { enrollment_id } => {
                use crate::error::{AppError, AppErrorKind, DomainError};
                AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
                    reference: enrollment_id.to_string(),
                }))
            }
        }
    }
}

pub struct CheckoutService {
    payments: Arc<dyn PaymentStore>,
    machine: Arc<EnrollmentStateMachine>,
    gateways: Arc<GatewayFactory>,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        machine: Arc<EnrollmentStateMachine>,
        gateways: Arc<GatewayFactory>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            payments,
            machine,
            gateways,
            config,
        }
    }

    /// Create (or retry) a payment intent for an enrollment.
    ///
    /// A fresh `initiated` attempt goes straight to the gateway. A failed
    /// or cancelled attempt is replaced by a new one and `payment_ref` is
    /// reassigned; the old attempt stays in history. Anything in flight
    /// (or already succeeded) is `PaymentInProgress`.
    pub async fn create_payment_intent(
        &self,
        enrollment_id: Uuid,
        user_id: Uuid,
        customer_email: Option<String>,
    ) -> CheckoutResult<GatewayHandle> {
        let enrollment = self.machine.get(enrollment_id).await?;
        if enrollment.user_id != user_id {
            return Err(EnrollmentError::NotOwner {
                enrollment_id,
                user_id,
            }
            .into());
        }
        if enrollment.status != EnrollmentStatus::PendingPayment {
            return Err(EnrollmentError::InvalidTransition {
                from: enrollment.status,
                to: EnrollmentStatus::PendingPayment,
            }
            .into());
        }

        let payment_id = enrollment
            .payment_ref
            .ok_or(CheckoutError::MissingPaymentRef { enrollment_id })?;
        let current = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Payment", payment_id.to_string()))?;

        let payment = match current.status {
            PaymentStatus::Initiated if current.gateway_transaction_id.is_none() => current,
            PaymentStatus::Failed | PaymentStatus::Cancelled => {
                self.new_attempt(&current).await?
            }
            _ => {
                return Err(EnrollmentError::PaymentInProgress {
                    payment_id: current.id,
                }
                .into())
            }
        };

        let adapter = self.gateways.adapter(payment.gateway)?;
        let request = PaymentRequest {
            amount: Money::new(payment.amount.to_string(), payment.currency.clone()),
            customer_email,
            reference: payment.id.to_string(),
            enrollment_id,
            callback_url: None,
            metadata: Some(serde_json::json!({"enrollment_id": enrollment_id})),
        };

        let deadline = Duration::from_secs(self.config.intent_timeout_secs);
        let response = tokio::time::timeout(deadline, adapter.initiate(request))
            .await
            .map_err(|_| GatewayError::Unavailable {
                message: format!(
                    "gateway intent creation exceeded {}s deadline",
                    self.config.intent_timeout_secs
                ),
            })??;

        if let Some(reference) = &response.gateway_transaction_id {
            self.payments
                .bind_gateway_reference(payment.id, reference)
                .await?;
        }
        // The user is now off completing checkout with the gateway.
        self.payments
            .transition(
                payment.id,
                &[PaymentStatus::Initiated],
                PaymentStatus::AwaitingConfirmation,
                ReceivedVia::System,
                serde_json::json!({"event": "intent_created"}),
            )
            .await?;

        info!(
            enrollment_id = %enrollment_id,
            payment_id = %payment.id,
            gateway = %payment.gateway,
            "payment intent created"
        );
        Ok(response.handle)
    }

    async fn new_attempt(&self, failed: &Payment) -> CheckoutResult<Payment> {
        let now = chrono::Utc::now();
        let attempt = self
            .payments
            .insert(Payment {
                id: Uuid::new_v4(),
                enrollment_id: failed.enrollment_id,
                gateway: failed.gateway,
                gateway_transaction_id: None,
                amount: failed.amount.clone(),
                currency: failed.currency.clone(),
                status: PaymentStatus::Initiated,
                created_at: now,
                updated_at: now,
            })
            .await?;

        self.machine
            .reassign_payment_ref(failed.enrollment_id, attempt.id)
            .await?;

        info!(
            enrollment_id = %failed.enrollment_id,
            old_payment_id = %failed.id,
            new_payment_id = %attempt.id,
            "checkout retried with a new payment attempt"
        );
        Ok(attempt)
    }

    /// Operator-driven expiry pass: mark stale non-terminal attempts
    /// failed so their enrollments become retryable. Disabled unless a
    /// TTL is configured. Returns the number of payments expired.
    pub async fn expire_stale_payments(&self) -> CheckoutResult<usize> {
        let ttl_secs = match self.config.stale_payment_ttl_secs {
            Some(ttl) => ttl,
            None => return Ok(0),
        };
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(ttl_secs as i64);
        let stale = self.payments.find_stale(cutoff).await?;

        let mut expired = 0;
        for payment in stale {
            let result = self
                .payments
                .transition(
                    payment.id,
                    &[PaymentStatus::Initiated, PaymentStatus::AwaitingConfirmation],
                    PaymentStatus::Failed,
                    ReceivedVia::System,
                    serde_json::json!({"event": "stale_expiry", "ttl_secs": ttl_secs}),
                )
                .await?;
            if result.is_some() {
                warn!(payment_id = %payment.id, "stale payment attempt expired");
                expired += 1;
            }
        }
        Ok(expired)
    }
}
