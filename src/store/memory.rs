//! In-memory store implementations.
//!
//! Thread-safe `Arc<RwLock<HashMap>>`-backed stores used by the test
//! suites and local development without a database. Mutations take the
//! write lock for the whole compare-and-set, which gives the same
//! serialization guarantee the Postgres implementation gets from row
//! locking.

use crate::gateways::types::{GatewayName, ReceivedVia};
use crate::store::enrollment::{Enrollment, EnrollmentStatus, EnrollmentStore};
use crate::store::error::{StoreError, StoreErrorKind};
use crate::store::payment::{
    Payment, PaymentConflict, PaymentStatus, PaymentStore, PaymentTransition,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default, Clone)]
pub struct InMemoryEnrollmentStore {
    enrollments: Arc<RwLock<HashMap<Uuid, Enrollment>>>,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn insert(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        let mut enrollments = self.enrollments.write().await;
        if enrollments.contains_key(&enrollment.id) {
            return Err(StoreError::new(StoreErrorKind::Conflict {
                message: format!("enrollment {} already exists", enrollment.id),
            }));
        }
        enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        let enrollments = self.enrollments.read().await;
        Ok(enrollments.get(&id).cloned())
    }

    async fn find_for_user_course(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Vec<Enrollment>, StoreError> {
        let enrollments = self.enrollments.read().await;
        Ok(enrollments
            .values()
            .filter(|e| e.user_id == user_id && e.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: EnrollmentStatus,
        new_status: EnrollmentStatus,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut enrollments = self.enrollments.write().await;
        match enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.status == expected => {
                enrollment.status = new_status;
                enrollment.updated_at = chrono::Utc::now();
                Ok(Some(enrollment.clone()))
            }
            Some(_) => Ok(None),
            None => Err(StoreError::not_found("Enrollment", id.to_string())),
        }
    }

    async fn set_payment_ref(
        &self,
        id: Uuid,
        expected_status: EnrollmentStatus,
        payment_ref: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut enrollments = self.enrollments.write().await;
        match enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.status == expected_status => {
                enrollment.payment_ref = Some(payment_ref);
                enrollment.updated_at = chrono::Utc::now();
                Ok(Some(enrollment.clone()))
            }
            Some(_) => Ok(None),
            None => Err(StoreError::not_found("Enrollment", id.to_string())),
        }
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<Uuid, Payment>>>,
    transitions: Arc<RwLock<Vec<PaymentTransition>>>,
    conflicts: Arc<RwLock<Vec<PaymentConflict>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn append_transition(
        &self,
        payment_id: Uuid,
        from_status: Option<PaymentStatus>,
        to_status: PaymentStatus,
        received_via: ReceivedVia,
        detail: JsonValue,
    ) {
        let mut transitions = self.transitions.write().await;
        transitions.push(PaymentTransition {
            id: Uuid::new_v4(),
            payment_id,
            from_status,
            to_status,
            received_via,
            detail,
            created_at: chrono::Utc::now(),
        });
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<Payment, StoreError> {
        {
            let mut payments = self.payments.write().await;
            if payments.contains_key(&payment.id) {
                return Err(StoreError::new(StoreErrorKind::Conflict {
                    message: format!("payment {} already exists", payment.id),
                }));
            }
            payments.insert(payment.id, payment.clone());
        }
        self.append_transition(
            payment.id,
            None,
            payment.status,
            ReceivedVia::System,
            serde_json::json!({"event": "created"}),
        )
        .await;
        Ok(payment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let payments = self.payments.read().await;
        Ok(payments.get(&id).cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        gateway: GatewayName,
        reference: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .find(|p| {
                p.gateway == gateway && p.gateway_transaction_id.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn bind_gateway_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> Result<Payment, StoreError> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Payment", id.to_string()))?;
        match &payment.gateway_transaction_id {
            Some(existing) if existing == reference => {}
            Some(existing) => {
                return Err(StoreError::new(StoreErrorKind::Conflict {
                    message: format!(
                        "payment {} already bound to gateway reference {}",
                        id, existing
                    ),
                }));
            }
            None => {
                payment.gateway_transaction_id = Some(reference.to_string());
                payment.updated_at = chrono::Utc::now();
            }
        }
        Ok(payment.clone())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        to: PaymentStatus,
        received_via: ReceivedVia,
        detail: JsonValue,
    ) -> Result<Option<Payment>, StoreError> {
        let updated = {
            let mut payments = self.payments.write().await;
            let payment = payments
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("Payment", id.to_string()))?;
            if !expected.contains(&payment.status) {
                return Ok(None);
            }
            let from = payment.status;
            payment.status = to;
            payment.updated_at = chrono::Utc::now();
            (payment.clone(), from)
        };
        self.append_transition(id, Some(updated.1), to, received_via, detail)
            .await;
        Ok(Some(updated.0))
    }

    async fn history(&self, payment_id: Uuid) -> Result<Vec<PaymentTransition>, StoreError> {
        let transitions = self.transitions.read().await;
        Ok(transitions
            .iter()
            .filter(|t| t.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn record_conflict(&self, conflict: PaymentConflict) -> Result<(), StoreError> {
        let mut conflicts = self.conflicts.write().await;
        conflicts.push(conflict);
        Ok(())
    }

    async fn conflicts(&self) -> Result<Vec<PaymentConflict>, StoreError> {
        let conflicts = self.conflicts.read().await;
        Ok(conflicts.clone())
    }

    async fn find_stale(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Payment>, StoreError> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .filter(|p| !p.status.is_terminal() && p.created_at < cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn payment(status: PaymentStatus) -> Payment {
        let now = chrono::Utc::now();
        Payment {
            id: Uuid::new_v4(),
            enrollment_id: Uuid::new_v4(),
            gateway: GatewayName::Stripe,
            gateway_transaction_id: None,
            amount: BigDecimal::from(50),
            currency: "USD".to_string(),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn transition_guard_rejects_unexpected_status() {
        let store = InMemoryPaymentStore::new();
        let p = store.insert(payment(PaymentStatus::Initiated)).await.unwrap();

        let moved = store
            .transition(
                p.id,
                &[PaymentStatus::Initiated],
                PaymentStatus::Succeeded,
                ReceivedVia::Webhook,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(moved.is_some());

        // Second transition from Initiated must fail the guard.
        let second = store
            .transition(
                p.id,
                &[PaymentStatus::Initiated],
                PaymentStatus::Failed,
                ReceivedVia::Webhook,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(second.is_none());

        let stored = store.find_by_id(p.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn history_is_append_only_and_ordered() {
        let store = InMemoryPaymentStore::new();
        let p = store.insert(payment(PaymentStatus::Initiated)).await.unwrap();
        store
            .transition(
                p.id,
                &[PaymentStatus::Initiated],
                PaymentStatus::AwaitingConfirmation,
                ReceivedVia::System,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        store
            .transition(
                p.id,
                &[PaymentStatus::AwaitingConfirmation],
                PaymentStatus::Succeeded,
                ReceivedVia::Webhook,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let history = store.history(p.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].from_status, None);
        assert_eq!(history[2].to_status, PaymentStatus::Succeeded);
        assert_eq!(history[2].received_via, ReceivedVia::Webhook);
    }

    #[tokio::test]
    async fn bind_gateway_reference_is_idempotent_but_not_reassignable() {
        let store = InMemoryPaymentStore::new();
        let p = store.insert(payment(PaymentStatus::Initiated)).await.unwrap();

        store.bind_gateway_reference(p.id, "pi_1").await.unwrap();
        store.bind_gateway_reference(p.id, "pi_1").await.unwrap();
        assert!(store.bind_gateway_reference(p.id, "pi_2").await.is_err());

        let found = store
            .find_by_gateway_reference(GatewayName::Stripe, "pi_1")
            .await
            .unwrap();
        assert_eq!(found.map(|f| f.id), Some(p.id));
    }

    #[tokio::test]
    async fn stale_lookup_skips_terminal_payments() {
        let store = InMemoryPaymentStore::new();
        let mut old_pending = payment(PaymentStatus::AwaitingConfirmation);
        old_pending.created_at = chrono::Utc::now() - chrono::Duration::hours(2);
        let mut old_done = payment(PaymentStatus::Succeeded);
        old_done.created_at = chrono::Utc::now() - chrono::Duration::hours(2);
        store.insert(old_pending.clone()).await.unwrap();
        store.insert(old_done).await.unwrap();

        let cutoff = chrono::Utc::now() - chrono::Duration::hours(1);
        let stale = store.find_stale(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old_pending.id);
    }
}
