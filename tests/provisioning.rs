//! Enrollment provisioning integration tests.
//!
//! Exercises the approval resolution transaction end to end against an
//! in-memory database: idempotent replays, decline semantics, lazy
//! customer materialization, and the linked notification lifecycle.

mod common;

use common::{approved_card, count_rows, setup, ACCOUNT};
use punchcard::model::{Decision, EnrollmentStatus};
use uuid::Uuid;

#[tokio::test]
async fn test_approve_provisions_enrollment_and_card() {
    let world = setup().await;

    let request = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .unwrap();
    let outcome = world
        .loyalty
        .resolve_approval(request.id, Decision::Approve)
        .await
        .unwrap();

    let card_id = outcome.card_id.expect("approval should produce a card");
    let card = world.loyalty.ledger().card(card_id).await.unwrap().unwrap();
    assert!(card.active);
    assert_eq!(card.points, 0);
    assert_eq!(card.card_number.len(), 16);

    let customer = world
        .loyalty
        .ledger()
        .customer_by_account(ACCOUNT)
        .await
        .unwrap()
        .expect("customer row should be materialized");
    assert_eq!(customer.name, "Ada Lovelace");

    let enrollment = world
        .loyalty
        .ledger()
        .enrollment(customer.id, world.program.id)
        .await
        .unwrap()
        .expect("enrollment should exist");
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(enrollment.points, 0);

    let relationship = world
        .loyalty
        .ledger()
        .relationship_status(customer.id, world.business.id)
        .await
        .unwrap();
    assert_eq!(relationship.as_deref(), Some("ACTIVE"));

    let approval = world
        .loyalty
        .ledger()
        .approval_request(request.id)
        .await
        .unwrap()
        .unwrap();
    assert!(approval.responded_at.is_some());

    // The enrollment-request notification is closed by the decision.
    let notification = world
        .loyalty
        .ledger()
        .notification(request.notification_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(notification.actioned);
}

#[tokio::test]
async fn test_resolve_twice_returns_same_card_and_creates_one_row_pair() {
    let world = setup().await;

    let request = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .unwrap();
    let first = world
        .loyalty
        .resolve_approval(request.id, Decision::Approve)
        .await
        .unwrap();
    let second = world
        .loyalty
        .resolve_approval(request.id, Decision::Approve)
        .await
        .unwrap();

    assert_eq!(first.card_id, second.card_id);
    assert_eq!(count_rows(&world, "SELECT COUNT(*) FROM cards").await, 1);
    assert_eq!(count_rows(&world, "SELECT COUNT(*) FROM enrollments").await, 1);
}

#[tokio::test]
async fn test_decline_creates_no_enrollment_or_card() {
    let world = setup().await;

    let request = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .unwrap();
    let outcome = world
        .loyalty
        .resolve_approval(request.id, Decision::Decline)
        .await
        .unwrap();

    assert_eq!(outcome.card_id, None);
    assert_eq!(count_rows(&world, "SELECT COUNT(*) FROM cards").await, 0);
    assert_eq!(count_rows(&world, "SELECT COUNT(*) FROM enrollments").await, 0);

    // Declines still materialize the customer and record the declined
    // relationship.
    let customer = world
        .loyalty
        .ledger()
        .customer_by_account(ACCOUNT)
        .await
        .unwrap()
        .expect("declines still materialize the customer row");
    let relationship = world
        .loyalty
        .ledger()
        .relationship_status(customer.id, world.business.id)
        .await
        .unwrap();
    assert_eq!(relationship.as_deref(), Some("DECLINED"));

    // The business still hears about the decision.
    let decisions = world
        .loyalty
        .ledger()
        .notifications_of_kind("enrollment_decision")
        .await
        .unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].business_id, Some(world.business.id));
}

#[tokio::test]
async fn test_conflicting_redecision_is_rejected() {
    let world = setup().await;

    let request = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .unwrap();
    world
        .loyalty
        .resolve_approval(request.id, Decision::Decline)
        .await
        .unwrap();

    let err = world
        .loyalty
        .resolve_approval(request.id, Decision::Approve)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_RESOLVED");

    // The conflicting attempt must not have provisioned anything.
    assert_eq!(count_rows(&world, "SELECT COUNT(*) FROM cards").await, 0);
    assert_eq!(count_rows(&world, "SELECT COUNT(*) FROM enrollments").await, 0);
}

#[tokio::test]
async fn test_decline_replay_is_idempotent() {
    let world = setup().await;

    let request = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .unwrap();
    let first = world
        .loyalty
        .resolve_approval(request.id, Decision::Decline)
        .await
        .unwrap();
    let second = world
        .loyalty
        .resolve_approval(request.id, Decision::Decline)
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_resolve_unknown_request_is_not_found() {
    let world = setup().await;

    let err = world
        .loyalty
        .resolve_approval(Uuid::new_v4(), Decision::Approve)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_request_enrollment_is_idempotent_while_pending() {
    let world = setup().await;

    let first = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .unwrap();
    let second = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(
        count_rows(&world, "SELECT COUNT(*) FROM approval_requests").await,
        1
    );
    assert_eq!(
        count_rows(
            &world,
            "SELECT COUNT(*) FROM notifications WHERE kind = 'enrollment_request'"
        )
        .await,
        1
    );
}

#[tokio::test]
async fn test_request_enrollment_unknown_account_is_not_found() {
    let world = setup().await;

    let err = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, "nobody")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_request_enrollment_program_of_other_business_is_rejected() {
    let world = setup().await;
    let other = world
        .loyalty
        .ledger()
        .create_business("Rival Roasters")
        .await
        .unwrap();

    let err = world
        .loyalty
        .request_enrollment(other.id, world.program.id, ACCOUNT)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
}

#[tokio::test]
async fn test_customer_row_is_created_lazily() {
    let world = setup().await;

    let request = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .unwrap();
    assert!(world
        .loyalty
        .ledger()
        .customer_by_account(ACCOUNT)
        .await
        .unwrap()
        .is_none());

    world
        .loyalty
        .resolve_approval(request.id, Decision::Approve)
        .await
        .unwrap();
    assert!(world
        .loyalty
        .ledger()
        .customer_by_account(ACCOUNT)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_card_ready_notification_reaches_customer() {
    let world = setup().await;
    let card = approved_card(&world).await;

    let ready = world
        .loyalty
        .ledger()
        .notifications_of_kind("card_ready")
        .await
        .unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].customer_account_id.as_deref(), Some(ACCOUNT));
    assert_eq!(ready[0].payload["card_number"], card.card_number.as_str());
}
