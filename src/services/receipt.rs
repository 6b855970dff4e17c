//! Receipt and notification emission on enrollment activation.
//!
//! The reconciliation service invokes `on_enrollment_activated` at most
//! once per (enrollment, payment) pair; the compare-and-set payment
//! transition it performs beforehand is the idempotency guard, so
//! implementations do not need their own deduplication.

use crate::store::enrollment::Enrollment;
use crate::store::payment::Payment;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait ReceiptEmitter: Send + Sync {
    async fn on_enrollment_activated(&self, enrollment: &Enrollment, payment: &Payment);
}

/// Default emitter: structured log entries that downstream delivery
/// (email, push, access-grant queue) consumes.
pub struct LoggingReceiptEmitter;

impl LoggingReceiptEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingReceiptEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReceiptEmitter for LoggingReceiptEmitter {
    async fn on_enrollment_activated(&self, enrollment: &Enrollment, payment: &Payment) {
        info!(
            enrollment_id = %enrollment.id,
            user_id = %enrollment.user_id,
            course_id = %enrollment.course_id,
            payment_id = %payment.id,
            gateway = %payment.gateway,
            amount = %payment.amount,
            currency = %payment.currency,
            "NOTIFICATION: enrollment activated, receipt queued"
        );
    }
}
