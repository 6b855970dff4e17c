use crate::store::enrollment::{Enrollment, EnrollmentStatus, EnrollmentStore};
use crate::store::error::{StoreError, StoreErrorKind};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const ENROLLMENT_COLUMNS: &str =
    "id, user_id, course_id, status, payment_ref, amount, currency, created_at, updated_at";

/// Raw enrollment row; status is converted to the typed enum on the way out.
#[derive(Debug, Clone, FromRow)]
struct EnrollmentRow {
    id: Uuid,
    user_id: Uuid,
    course_id: Uuid,
    status: String,
    payment_ref: Option<Uuid>,
    amount: BigDecimal,
    currency: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl EnrollmentRow {
    fn into_enrollment(self) -> Result<Enrollment, StoreError> {
        let status = EnrollmentStatus::from_db_status(&self.status).ok_or_else(|| {
            StoreError::new(StoreErrorKind::Unknown {
                message: format!("enrollment {} has unknown status '{}'", self.id, self.status),
            })
        })?;
        Ok(Enrollment {
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
            status,
            payment_ref: self.payment_ref,
            amount: self.amount,
            currency: self.currency,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Postgres-backed enrollment store
pub struct PgEnrollmentStore {
    pool: PgPool,
}

impl PgEnrollmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentStore for PgEnrollmentStore {
    async fn insert(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "INSERT INTO enrollments \
             (id, user_id, course_id, status, payment_ref, amount, currency) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(enrollment.id)
        .bind(enrollment.user_id)
        .bind(enrollment.course_id)
        .bind(enrollment.status.to_db_status())
        .bind(enrollment.payment_ref)
        .bind(&enrollment.amount)
        .bind(&enrollment.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.into_enrollment()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(EnrollmentRow::into_enrollment).transpose()
    }

    async fn find_for_user_course(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Vec<Enrollment>, StoreError> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE user_id = $1 AND course_id = $2 \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.into_iter()
            .map(EnrollmentRow::into_enrollment)
            .collect()
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: EnrollmentStatus,
        new_status: EnrollmentStatus,
    ) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "UPDATE enrollments \
             SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(expected.to_db_status())
        .bind(new_status.to_db_status())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(EnrollmentRow::into_enrollment).transpose()
    }

    async fn set_payment_ref(
        &self,
        id: Uuid,
        expected_status: EnrollmentStatus,
        payment_ref: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "UPDATE enrollments \
             SET payment_ref = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(expected_status.to_db_status())
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        row.map(EnrollmentRow::into_enrollment).transpose()
    }
}
