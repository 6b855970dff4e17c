use crate::gateways::types::{GatewayName, ReceivedVia};
use crate::store::error::{StoreError, StoreErrorKind};
use crate::store::payment::{
    Payment, PaymentConflict, PaymentStatus, PaymentStore, PaymentTransition,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction as PgTransaction};
use std::str::FromStr;
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, enrollment_id, gateway, gateway_transaction_id, amount, \
                               currency, status, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    enrollment_id: Uuid,
    gateway: String,
    gateway_transaction_id: Option<String>,
    amount: BigDecimal,
    currency: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> Result<Payment, StoreError> {
        let gateway = GatewayName::from_str(&self.gateway).map_err(|_| {
            StoreError::new(StoreErrorKind::Unknown {
                message: format!("payment {} has unknown gateway '{}'", self.id, self.gateway),
            })
        })?;
        let status = PaymentStatus::from_db_status(&self.status).ok_or_else(|| {
            StoreError::new(StoreErrorKind::Unknown {
                message: format!("payment {} has unknown status '{}'", self.id, self.status),
            })
        })?;
        Ok(Payment {
            id: self.id,
            enrollment_id: self.enrollment_id,
            gateway,
            gateway_transaction_id: self.gateway_transaction_id,
            amount: self.amount,
            currency: self.currency,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct TransitionRow {
    id: Uuid,
    payment_id: Uuid,
    from_status: Option<String>,
    to_status: String,
    received_via: String,
    detail: JsonValue,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TransitionRow {
    fn into_transition(self) -> Result<PaymentTransition, StoreError> {
        let to_status = PaymentStatus::from_db_status(&self.to_status).ok_or_else(|| {
            StoreError::new(StoreErrorKind::Unknown {
                message: format!("transition {} has unknown status", self.id),
            })
        })?;
        let received_via = ReceivedVia::from_db_value(&self.received_via).ok_or_else(|| {
            StoreError::new(StoreErrorKind::Unknown {
                message: format!("transition {} has unknown channel", self.id),
            })
        })?;
        Ok(PaymentTransition {
            id: self.id,
            payment_id: self.payment_id,
            from_status: self
                .from_status
                .as_deref()
                .and_then(PaymentStatus::from_db_status),
            to_status,
            received_via,
            detail: self.detail,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct ConflictRow {
    id: Uuid,
    payment_id: Uuid,
    gateway_transaction_id: Option<String>,
    stored_status: String,
    reported_status: String,
    received_via: String,
    payload: JsonValue,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl ConflictRow {
    fn into_conflict(self) -> Result<PaymentConflict, StoreError> {
        let stored_status = PaymentStatus::from_db_status(&self.stored_status).ok_or_else(|| {
            StoreError::new(StoreErrorKind::Unknown {
                message: format!("conflict {} has unknown stored status", self.id),
            })
        })?;
        let received_via = ReceivedVia::from_db_value(&self.received_via).ok_or_else(|| {
            StoreError::new(StoreErrorKind::Unknown {
                message: format!("conflict {} has unknown channel", self.id),
            })
        })?;
        Ok(PaymentConflict {
            id: self.id,
            payment_id: self.payment_id,
            gateway_transaction_id: self.gateway_transaction_id,
            stored_status,
            reported_status: self.reported_status,
            received_via,
            payload: self.payload,
            created_at: self.created_at,
        })
    }
}

/// Postgres-backed payment store.
///
/// Status changes and their history rows are written in one database
/// transaction; the status guard on the UPDATE is the row-level
/// serialization point for racing events.
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_transition(
        tx: &mut PgTransaction<'_, Postgres>,
        payment_id: Uuid,
        from_status: Option<PaymentStatus>,
        to_status: PaymentStatus,
        received_via: ReceivedVia,
        detail: &JsonValue,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payment_transitions \
             (id, payment_id, from_status, to_status, received_via, detail) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(payment_id)
        .bind(from_status.map(|s| s.to_db_status()))
        .bind(to_status.to_db_status())
        .bind(received_via.as_str())
        .bind(detail)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<Payment, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments \
             (id, enrollment_id, gateway, gateway_transaction_id, amount, currency, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment.id)
        .bind(payment.enrollment_id)
        .bind(payment.gateway.as_str())
        .bind(&payment.gateway_transaction_id)
        .bind(&payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.to_db_status())
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::insert_transition(
            &mut tx,
            payment.id,
            None,
            payment.status,
            ReceivedVia::System,
            &serde_json::json!({"event": "created"}),
        )
        .await?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        row.into_payment()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(PaymentRow::into_payment).transpose()
    }

    async fn find_by_gateway_reference(
        &self,
        gateway: GatewayName,
        reference: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE gateway = $1 AND gateway_transaction_id = $2"
        ))
        .bind(gateway.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(PaymentRow::into_payment).transpose()
    }

    async fn bind_gateway_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> Result<Payment, StoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments \
             SET gateway_transaction_id = $2, updated_at = NOW() \
             WHERE id = $1 \
               AND (gateway_transaction_id IS NULL OR gateway_transaction_id = $2) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => row.into_payment(),
            None => {
                // Either missing or bound to a different reference.
                let existing = self.find_by_id(id).await?;
                match existing {
                    Some(payment) => Err(StoreError::new(StoreErrorKind::Conflict {
                        message: format!(
                            "payment {} already bound to gateway reference {:?}",
                            id, payment.gateway_transaction_id
                        ),
                    })),
                    None => Err(StoreError::not_found("Payment", id.to_string())),
                }
            }
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        to: PaymentStatus,
        received_via: ReceivedVia,
        detail: JsonValue,
    ) -> Result<Option<Payment>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        // Lock the row so concurrent events serialize here.
        let current = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        let current = match current {
            Some(row) => row.into_payment()?,
            None => return Err(StoreError::not_found("Payment", id.to_string())),
        };
        if !expected.contains(&current.status) {
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(to.to_db_status())
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        Self::insert_transition(&mut tx, id, Some(current.status), to, received_via, &detail)
            .await?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        row.into_payment().map(Some)
    }

    async fn history(&self, payment_id: Uuid) -> Result<Vec<PaymentTransition>, StoreError> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            "SELECT id, payment_id, from_status, to_status, received_via, detail, created_at \
             FROM payment_transitions \
             WHERE payment_id = $1 \
             ORDER BY created_at ASC",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.into_iter().map(TransitionRow::into_transition).collect()
    }

    async fn record_conflict(&self, conflict: PaymentConflict) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payment_conflicts \
             (id, payment_id, gateway_transaction_id, stored_status, reported_status, \
              received_via, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(conflict.id)
        .bind(conflict.payment_id)
        .bind(&conflict.gateway_transaction_id)
        .bind(conflict.stored_status.to_db_status())
        .bind(&conflict.reported_status)
        .bind(conflict.received_via.as_str())
        .bind(&conflict.payload)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn conflicts(&self) -> Result<Vec<PaymentConflict>, StoreError> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            "SELECT id, payment_id, gateway_transaction_id, stored_status, reported_status, \
                    received_via, payload, created_at \
             FROM payment_conflicts \
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.into_iter().map(ConflictRow::into_conflict).collect()
    }

    async fn find_stale(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status IN ('initiated', 'awaiting_confirmation') AND created_at < $1 \
             ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.into_iter().map(PaymentRow::into_payment).collect()
    }
}
