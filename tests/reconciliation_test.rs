//! Reconciliation scenarios: duplicate deliveries, racing channels,
//! conflicting terminal reports, redirect re-validation and checkout retry.

mod common;

use common::{build_world, build_world_with_config, event};
use skillpath_backend::config::CheckoutConfig;
use skillpath_backend::gateways::types::{GatewayHandle, GatewayName, ReceivedVia, ReportedStatus};
use skillpath_backend::services::enrollment::EnrollmentError;
use skillpath_backend::services::reconciliation::{ReconcileError, ReconcileOutcome};
use skillpath_backend::store::enrollment::EnrollmentStatus;
use skillpath_backend::store::payment::{PaymentStatus, PaymentStore};
use uuid::Uuid;

/// Enroll in the paid course and run checkout up to the point where the
/// gateway holds an open transaction. Returns (enrollment_id, payment_id,
/// gateway reference).
async fn checkout(world: &common::TestWorld, gateway: GatewayName) -> (Uuid, Uuid, String) {
    let user = Uuid::new_v4();
    let created = world
        .machine
        .create_enrollment(user, world.paid_course, gateway)
        .await
        .expect("enrollment should succeed");
    let payment = created.payment.expect("paid course creates a payment");

    let handle = world
        .checkout
        .create_payment_intent(created.enrollment.id, user, Some("s@example.com".to_string()))
        .await
        .expect("intent creation should succeed");
    match (gateway, &handle) {
        (GatewayName::Stripe, GatewayHandle::ClientSecret { .. }) => {}
        (GatewayName::Paystack, GatewayHandle::RedirectUrl { .. }) => {}
        other => panic!("unexpected handle for {:?}", other),
    }

    (
        created.enrollment.id,
        payment.id,
        format!("txn_{}", payment.id),
    )
}

#[tokio::test]
async fn card_webhook_success_activates_enrollment_once() {
    let world = build_world();
    let (enrollment_id, payment_id, reference) = checkout(&world, GatewayName::Stripe).await;

    let outcome = world
        .reconciliation
        .process_event(event(
            GatewayName::Stripe,
            &reference,
            ReportedStatus::Succeeded,
            ReceivedVia::Webhook,
        ))
        .await
        .expect("reconciliation should succeed");

    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            payment_id,
            payment_status: PaymentStatus::Succeeded,
            enrollment_activated: true,
        }
    );
    let enrollment = world.machine.get(enrollment_id).await.unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(world.emitter.count(), 1);

    // The audit trail shows which channel triggered activation.
    let history = world.payments.history(payment_id).await.unwrap();
    let activation = history
        .iter()
        .find(|t| t.to_status == PaymentStatus::Succeeded)
        .expect("success transition recorded");
    assert_eq!(activation.received_via, ReceivedVia::Webhook);
}

#[tokio::test]
async fn redelivered_webhook_changes_nothing() {
    let world = build_world();
    let (enrollment_id, payment_id, reference) = checkout(&world, GatewayName::Stripe).await;

    let success = event(
        GatewayName::Stripe,
        &reference,
        ReportedStatus::Succeeded,
        ReceivedVia::Webhook,
    );
    world
        .reconciliation
        .process_event(success.clone())
        .await
        .unwrap();

    let redelivery = world
        .reconciliation
        .process_event(success)
        .await
        .expect("duplicate must be absorbed, not errored");
    assert_eq!(redelivery, ReconcileOutcome::Duplicate { payment_id });

    let payment = world.payments.find_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    let enrollment = world.machine.get(enrollment_id).await.unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(world.emitter.count(), 1, "emitter must not fire twice");
}

#[tokio::test]
async fn conflicting_terminal_events_never_downgrade_success() {
    let world = build_world();
    let (_, payment_id, reference) = checkout(&world, GatewayName::Stripe).await;

    world
        .reconciliation
        .process_event(event(
            GatewayName::Stripe,
            &reference,
            ReportedStatus::Succeeded,
            ReceivedVia::Webhook,
        ))
        .await
        .unwrap();

    let conflict = world
        .reconciliation
        .process_event(event(
            GatewayName::Stripe,
            &reference,
            ReportedStatus::Failed,
            ReceivedVia::Webhook,
        ))
        .await;
    assert!(matches!(
        conflict,
        Err(ReconcileError::ConflictingPaymentEvent { .. })
    ));

    let payment = world.payments.find_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);

    let conflicts = world.payments.conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].payment_id, payment_id);
    assert_eq!(conflicts[0].stored_status, PaymentStatus::Succeeded);
    assert_eq!(world.emitter.count(), 1);
}

#[tokio::test]
async fn redirect_success_is_overruled_by_failed_verification() {
    let world = build_world();
    let (enrollment_id, payment_id, reference) = checkout(&world, GatewayName::Paystack).await;

    // The redirect callback claims success; the gateway's verify endpoint
    // says otherwise. The verified status must win.
    world.paystack.set_verify_status(ReportedStatus::Failed);

    let outcome = world
        .reconciliation
        .process_event(event(
            GatewayName::Paystack,
            &reference,
            ReportedStatus::Succeeded,
            ReceivedVia::RedirectCallback,
        ))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            payment_id,
            payment_status: PaymentStatus::Failed,
            enrollment_activated: false,
        }
    );

    let payment = world.payments.find_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    let enrollment = world.machine.get(enrollment_id).await.unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::PendingPayment);
    assert_eq!(world.emitter.count(), 0);
}

#[tokio::test]
async fn redirect_success_with_passing_verification_activates() {
    let world = build_world();
    let (enrollment_id, _, reference) = checkout(&world, GatewayName::Paystack).await;

    let outcome = world
        .reconciliation
        .process_event(event(
            GatewayName::Paystack,
            &reference,
            ReportedStatus::Succeeded,
            ReceivedVia::RedirectCallback,
        ))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Applied {
            enrollment_activated: true,
            ..
        }
    ));
    let enrollment = world.machine.get(enrollment_id).await.unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
}

#[tokio::test]
async fn failed_payment_leaves_enrollment_retryable() {
    let world = build_world();
    let (enrollment_id, payment_id, reference) = checkout(&world, GatewayName::Stripe).await;
    let user = world.machine.get(enrollment_id).await.unwrap().user_id;

    world
        .reconciliation
        .process_event(event(
            GatewayName::Stripe,
            &reference,
            ReportedStatus::Failed,
            ReceivedVia::Webhook,
        ))
        .await
        .unwrap();

    let enrollment = world.machine.get(enrollment_id).await.unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::PendingPayment);

    // Retry checkout: a fresh attempt replaces the failed one.
    world
        .checkout
        .create_payment_intent(enrollment_id, user, None)
        .await
        .expect("retry should succeed");

    let enrollment = world.machine.get(enrollment_id).await.unwrap();
    let new_payment_id = enrollment.payment_ref.unwrap();
    assert_ne!(new_payment_id, payment_id);

    // The failed attempt is retained, append-only.
    let old = world.payments.find_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(old.status, PaymentStatus::Failed);
    assert!(!world.payments.history(payment_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reassignment_is_blocked_while_payment_in_flight() {
    let world = build_world();
    let (enrollment_id, payment_id, _) = checkout(&world, GatewayName::Stripe).await;
    let user = world.machine.get(enrollment_id).await.unwrap().user_id;

    // The attempt is awaiting confirmation: a second checkout must not
    // replace it.
    let blocked = world
        .checkout
        .create_payment_intent(enrollment_id, user, None)
        .await;
    assert!(matches!(
        blocked,
        Err(skillpath_backend::services::checkout::CheckoutError::Enrollment(
            EnrollmentError::PaymentInProgress { .. }
        ))
    ));

    let enrollment = world.machine.get(enrollment_id).await.unwrap();
    assert_eq!(enrollment.payment_ref, Some(payment_id));
}

#[tokio::test]
async fn client_confirmation_and_webhook_agree_first_wins() {
    let world = build_world();
    let (_, payment_id, reference) = checkout(&world, GatewayName::Stripe).await;

    let confirm = world
        .reconciliation
        .process_event(event(
            GatewayName::Stripe,
            &reference,
            ReportedStatus::Succeeded,
            ReceivedVia::ClientConfirmation,
        ))
        .await
        .unwrap();
    assert!(matches!(confirm, ReconcileOutcome::Applied { .. }));

    let webhook = world
        .reconciliation
        .process_event(event(
            GatewayName::Stripe,
            &reference,
            ReportedStatus::Succeeded,
            ReceivedVia::Webhook,
        ))
        .await
        .unwrap();
    assert_eq!(webhook, ReconcileOutcome::Duplicate { payment_id });
    assert_eq!(world.emitter.count(), 1);

    // The audit trail attributes activation to the client channel.
    let history = world.payments.history(payment_id).await.unwrap();
    let activation = history
        .iter()
        .find(|t| t.to_status == PaymentStatus::Succeeded)
        .unwrap();
    assert_eq!(activation.received_via, ReceivedVia::ClientConfirmation);
}

#[tokio::test]
async fn concurrent_duplicate_events_activate_exactly_once() {
    let world = build_world();
    let (_, _, reference) = checkout(&world, GatewayName::Stripe).await;

    let success = event(
        GatewayName::Stripe,
        &reference,
        ReportedStatus::Succeeded,
        ReceivedVia::Webhook,
    );
    let (a, b) = tokio::join!(
        world.reconciliation.process_event(success.clone()),
        world.reconciliation.process_event(success),
    );

    let outcomes = [a.unwrap(), b.unwrap()];
    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Applied { .. }))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Duplicate { .. }))
        .count();
    assert_eq!(applied, 1, "exactly one event may apply");
    assert_eq!(duplicates, 1, "the loser is absorbed");
    assert_eq!(world.emitter.count(), 1, "activation is at-most-once");
}

#[tokio::test]
async fn unknown_reference_is_reported_not_swallowed() {
    let world = build_world();
    let result = world
        .reconciliation
        .process_event(event(
            GatewayName::Stripe,
            "txn_nonexistent",
            ReportedStatus::Succeeded,
            ReceivedVia::Webhook,
        ))
        .await;
    assert!(matches!(
        result,
        Err(ReconcileError::PaymentNotFound { .. })
    ));
}

#[tokio::test]
async fn event_resolves_through_enrollment_before_reference_is_bound() {
    let world = build_world();
    let user = Uuid::new_v4();
    let created = world
        .machine
        .create_enrollment(user, world.paid_course, GatewayName::Stripe)
        .await
        .unwrap();
    let payment = created.payment.unwrap();

    // No intent was created, so no gateway reference is bound yet; the
    // event carries the enrollment id from gateway metadata instead.
    let mut ev = event(
        GatewayName::Stripe,
        "pi_fresh",
        ReportedStatus::Succeeded,
        ReceivedVia::Webhook,
    );
    ev.enrollment_id = Some(created.enrollment.id);

    let outcome = world.reconciliation.process_event(ev).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));

    // The reference is now bound for future dedup.
    let stored = world.payments.find_by_id(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.gateway_transaction_id.as_deref(), Some("pi_fresh"));
    assert_eq!(stored.status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn stale_attempts_expire_only_with_a_configured_ttl() {
    // TTL disabled: the pass is a no-op.
    let world = build_world();
    let (_, _, _) = checkout(&world, GatewayName::Stripe).await;
    assert_eq!(world.checkout.expire_stale_payments().await.unwrap(), 0);

    // TTL of zero: everything non-terminal is already stale.
    let world = build_world_with_config(CheckoutConfig {
        intent_timeout_secs: 5,
        verify_timeout_secs: 5,
        stale_payment_ttl_secs: Some(0),
    });
    let (enrollment_id, payment_id, _) = checkout(&world, GatewayName::Stripe).await;

    let expired = world.checkout.expire_stale_payments().await.unwrap();
    assert_eq!(expired, 1);

    let payment = world.payments.find_by_id(payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);

    // The enrollment is now retryable with a new attempt.
    let user = world.machine.get(enrollment_id).await.unwrap().user_id;
    let retried = world
        .checkout
        .create_payment_intent(enrollment_id, user, None)
        .await;
    assert!(retried.is_ok());
}
