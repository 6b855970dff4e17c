use crate::store::error::StoreError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Enrollment lifecycle status.
///
/// Transitions follow only the edges in `valid_transitions`; the state
/// machine service is the sole mutator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    PendingPayment,
    Active,
    Completed,
    Cancelled,
    Refunded,
}

impl EnrollmentStatus {
    pub fn valid_transitions(&self) -> Vec<EnrollmentStatus> {
        match self {
            EnrollmentStatus::PendingPayment => {
                vec![EnrollmentStatus::Active, EnrollmentStatus::Cancelled]
            }
            EnrollmentStatus::Active => vec![
                EnrollmentStatus::Completed,
                EnrollmentStatus::Cancelled,
                EnrollmentStatus::Refunded,
            ],
            // Terminal states
            EnrollmentStatus::Completed => vec![],
            EnrollmentStatus::Cancelled => vec![],
            EnrollmentStatus::Refunded => vec![],
        }
    }

    pub fn can_transition_to(&self, target: EnrollmentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Completed
                | EnrollmentStatus::Cancelled
                | EnrollmentStatus::Refunded
        )
    }

    pub fn to_db_status(&self) -> &'static str {
        match self {
            EnrollmentStatus::PendingPayment => "pending_payment",
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Cancelled => "cancelled",
            EnrollmentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending_payment" => Some(EnrollmentStatus::PendingPayment),
            "active" => Some(EnrollmentStatus::Active),
            "completed" => Some(EnrollmentStatus::Completed),
            "cancelled" => Some(EnrollmentStatus::Cancelled),
            "refunded" => Some(EnrollmentStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_db_status())
    }
}

/// Enrollment entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub status: EnrollmentStatus,
    /// Currently-authoritative payment attempt, when one exists.
    /// Reassigned on checkout retry; `None` for free enrollments.
    pub payment_ref: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Persistence port for enrollments.
///
/// `update_status` and `set_payment_ref` are compare-and-set: they apply
/// only when the row still has the expected status and return `None` when
/// the guard fails, so racing writers cannot both win.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn insert(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError>;

    async fn find_for_user_course(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Vec<Enrollment>, StoreError>;

    async fn update_status(
        &self,
        id: Uuid,
        expected: EnrollmentStatus,
        new_status: EnrollmentStatus,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn set_payment_ref(
        &self,
        id: Uuid,
        expected_status: EnrollmentStatus,
        payment_ref: Uuid,
    ) -> Result<Option<Enrollment>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_edges_match_lifecycle() {
        assert!(EnrollmentStatus::PendingPayment.can_transition_to(EnrollmentStatus::Active));
        assert!(EnrollmentStatus::PendingPayment.can_transition_to(EnrollmentStatus::Cancelled));
        assert!(EnrollmentStatus::Active.can_transition_to(EnrollmentStatus::Completed));
        assert!(EnrollmentStatus::Active.can_transition_to(EnrollmentStatus::Refunded));
    }

    #[test]
    fn no_shortcut_from_pending_to_completed() {
        assert!(!EnrollmentStatus::PendingPayment.can_transition_to(EnrollmentStatus::Completed));
        assert!(!EnrollmentStatus::PendingPayment.can_transition_to(EnrollmentStatus::Refunded));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in [
            EnrollmentStatus::Completed,
            EnrollmentStatus::Cancelled,
            EnrollmentStatus::Refunded,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn db_status_round_trips() {
        for status in [
            EnrollmentStatus::PendingPayment,
            EnrollmentStatus::Active,
            EnrollmentStatus::Completed,
            EnrollmentStatus::Cancelled,
            EnrollmentStatus::Refunded,
        ] {
            assert_eq!(
                EnrollmentStatus::from_db_status(status.to_db_status()),
                Some(status)
            );
        }
        assert_eq!(EnrollmentStatus::from_db_status("bogus"), None);
    }
}
