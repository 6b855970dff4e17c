//! Enrollment state machine lifecycle tests against the in-memory stores.

mod common;

use common::build_world;
use skillpath_backend::gateways::types::GatewayName;
use skillpath_backend::services::enrollment::EnrollmentError;
use skillpath_backend::store::enrollment::EnrollmentStatus;
use skillpath_backend::store::payment::{PaymentStatus, PaymentStore};
use uuid::Uuid;

#[tokio::test]
async fn free_course_activates_immediately_without_a_payment() {
    let world = build_world();
    let user = Uuid::new_v4();

    let created = world
        .machine
        .create_enrollment(user, world.free_course, GatewayName::Stripe)
        .await
        .expect("free enrollment should succeed");

    assert_eq!(created.enrollment.status, EnrollmentStatus::Active);
    assert!(created.payment.is_none());
    assert!(created.enrollment.payment_ref.is_none());
    // The receipt emitter is payment-bound; the free path never fires it.
    assert_eq!(world.emitter.count(), 0);
}

#[tokio::test]
async fn paid_course_starts_pending_with_one_initiated_attempt() {
    let world = build_world();
    let user = Uuid::new_v4();

    let created = world
        .machine
        .create_enrollment(user, world.paid_course, GatewayName::Stripe)
        .await
        .expect("enrollment should succeed");

    assert_eq!(created.enrollment.status, EnrollmentStatus::PendingPayment);
    let payment = created.payment.expect("paid enrollment creates a payment");
    assert_eq!(payment.status, PaymentStatus::Initiated);
    assert_eq!(created.enrollment.payment_ref, Some(payment.id));
    assert_eq!(payment.enrollment_id, created.enrollment.id);
}

#[tokio::test]
async fn duplicate_enrollment_is_rejected_while_active_or_completed() {
    let world = build_world();
    let user = Uuid::new_v4();

    let first = world
        .machine
        .create_enrollment(user, world.free_course, GatewayName::Stripe)
        .await
        .unwrap();
    assert_eq!(first.enrollment.status, EnrollmentStatus::Active);

    let second = world
        .machine
        .create_enrollment(user, world.free_course, GatewayName::Stripe)
        .await;
    assert!(matches!(
        second,
        Err(EnrollmentError::DuplicateEnrollment { .. })
    ));

    world
        .machine
        .mark_completed(first.enrollment.id)
        .await
        .unwrap();
    let third = world
        .machine
        .create_enrollment(user, world.free_course, GatewayName::Stripe)
        .await;
    assert!(matches!(
        third,
        Err(EnrollmentError::DuplicateEnrollment { .. })
    ));
}

#[tokio::test]
async fn cancelled_enrollment_does_not_block_re_enrollment() {
    let world = build_world();
    let user = Uuid::new_v4();

    let first = world
        .machine
        .create_enrollment(user, world.free_course, GatewayName::Stripe)
        .await
        .unwrap();
    world
        .machine
        .cancel(first.enrollment.id, user, Some("changed my mind"))
        .await
        .unwrap();

    let again = world
        .machine
        .create_enrollment(user, world.free_course, GatewayName::Stripe)
        .await;
    assert!(again.is_ok());
}

#[tokio::test]
async fn cancel_is_idempotent_and_owner_checked() {
    let world = build_world();
    let user = Uuid::new_v4();
    let stranger = Uuid::new_v4();

    let created = world
        .machine
        .create_enrollment(user, world.paid_course, GatewayName::Stripe)
        .await
        .unwrap();
    let id = created.enrollment.id;

    let denied = world.machine.cancel(id, stranger, None).await;
    assert!(matches!(denied, Err(EnrollmentError::NotOwner { .. })));

    let cancelled = world.machine.cancel(id, user, None).await.unwrap();
    assert_eq!(cancelled.status, EnrollmentStatus::Cancelled);

    // Second cancel is a no-op, not an error.
    let again = world.machine.cancel(id, user, None).await.unwrap();
    assert_eq!(again.status, EnrollmentStatus::Cancelled);
}

#[tokio::test]
async fn completion_requires_an_active_enrollment() {
    let world = build_world();
    let user = Uuid::new_v4();

    let pending = world
        .machine
        .create_enrollment(user, world.paid_course, GatewayName::Stripe)
        .await
        .unwrap();

    // No shortcut from pending_payment to completed.
    let blocked = world.machine.mark_completed(pending.enrollment.id).await;
    assert!(matches!(
        blocked,
        Err(EnrollmentError::InvalidTransition { .. })
    ));

    let active = world
        .machine
        .create_enrollment(user, world.free_course, GatewayName::Stripe)
        .await
        .unwrap();
    let completed = world
        .machine
        .mark_completed(active.enrollment.id)
        .await
        .unwrap();
    assert_eq!(completed.status, EnrollmentStatus::Completed);
}

#[tokio::test]
async fn mark_active_requires_matching_payment_ref() {
    let world = build_world();
    let user = Uuid::new_v4();

    let created = world
        .machine
        .create_enrollment(user, world.paid_course, GatewayName::Stripe)
        .await
        .unwrap();

    let wrong = world
        .machine
        .mark_active(created.enrollment.id, Uuid::new_v4())
        .await;
    assert!(matches!(
        wrong,
        Err(EnrollmentError::InvalidTransition { .. })
    ));

    let enrollment = world.machine.get(created.enrollment.id).await.unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::PendingPayment);
}

#[tokio::test]
async fn refund_closes_payment_and_enrollment_together() {
    let world = build_world();
    let user = Uuid::new_v4();

    let created = world
        .machine
        .create_enrollment(user, world.paid_course, GatewayName::Stripe)
        .await
        .unwrap();
    let payment = created.payment.unwrap();

    // Cannot refund before activation.
    let early = world.machine.refund(created.enrollment.id).await;
    assert!(matches!(
        early,
        Err(EnrollmentError::InvalidTransition { .. })
    ));

    // Drive the payment to success through the reconciliation path.
    world
        .checkout
        .create_payment_intent(created.enrollment.id, user, None)
        .await
        .unwrap();
    world
        .reconciliation
        .process_event(common::event(
            GatewayName::Stripe,
            &format!("txn_{}", payment.id),
            skillpath_backend::gateways::types::ReportedStatus::Succeeded,
            skillpath_backend::gateways::types::ReceivedVia::Webhook,
        ))
        .await
        .unwrap();

    let refunded = world.machine.refund(created.enrollment.id).await.unwrap();
    assert_eq!(refunded.status, EnrollmentStatus::Refunded);

    let stored = world
        .payments
        .find_by_id(payment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PaymentStatus::Refunded);
}
