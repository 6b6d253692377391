//! Points award integration tests.
//!
//! Exercises the award transaction end to end: exact balance increments,
//! the enrollment mirror, idempotency-key replays, rate limiting, and
//! on-the-fly card provisioning for enrolled-but-card-less customers.

mod common;

use common::{approved_card, count_rows, setup, setup_with, ACCOUNT};
use punchcard::config::Config;
use punchcard::model::{AwardSource, CardRef, EnrollmentStatus};
use punchcard::signature::QrPayload;

fn scan(actor: &str) -> AwardSource {
    AwardSource::Scan {
        actor: actor.to_string(),
    }
}

#[tokio::test]
async fn test_award_changes_balance_by_exactly_n() {
    let world = setup().await;
    let card = approved_card(&world).await;

    let outcome = world
        .loyalty
        .award_points(&CardRef::Number(card.card_number.clone()), 25, &scan("pos-1"), "tx-1")
        .await
        .unwrap();

    assert_eq!(outcome.balance, 25);
    assert!(!outcome.replayed);

    let card = world.loyalty.ledger().card(card.id).await.unwrap().unwrap();
    assert_eq!(card.points, 25);

    // The enrollment counter is a mirror, equal to the card balance.
    let enrollment = world
        .loyalty
        .ledger()
        .enrollment(card.customer_id, card.program_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(enrollment.points, 25);

    let entries = world
        .loyalty
        .ledger()
        .audit_entries_for_card(card.id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].delta, 25);
    assert_eq!(entries[0].balance_after, 25);
    assert_eq!(entries[0].entry_type, "SCAN");
    assert_eq!(entries[0].reference.as_deref(), Some("tx-1"));
}

#[tokio::test]
async fn test_award_replay_with_same_key_is_a_no_op() {
    let world = setup().await;
    let card = approved_card(&world).await;
    let card_ref = CardRef::Number(card.card_number.clone());

    let first = world
        .loyalty
        .award_points(&card_ref, 25, &scan("pos-1"), "tx-1")
        .await
        .unwrap();
    let second = world
        .loyalty
        .award_points(&card_ref, 25, &scan("pos-1"), "tx-1")
        .await
        .unwrap();

    assert_eq!(first.balance, 25);
    assert_eq!(second.balance, 25);
    assert!(second.replayed);

    let card = world.loyalty.ledger().card(card.id).await.unwrap().unwrap();
    assert_eq!(card.points, 25);
    assert_eq!(
        count_rows(&world, "SELECT COUNT(*) FROM audit_entries").await,
        1
    );
}

#[tokio::test]
async fn test_sequential_awards_accumulate_and_derive_tier() {
    let world = setup().await;
    let card = approved_card(&world).await;
    let card_ref = CardRef::Number(card.card_number.clone());

    world
        .loyalty
        .award_points(&card_ref, 25, &scan("pos-1"), "tx-1")
        .await
        .unwrap();
    world
        .loyalty
        .award_points(&card_ref, 30, &scan("pos-1"), "tx-2")
        .await
        .unwrap();
    let outcome = world
        .loyalty
        .award_points(&card_ref, 500, &scan("pos-1"), "tx-3")
        .await
        .unwrap();

    assert_eq!(outcome.balance, 555);
    let card = world.loyalty.ledger().card(card.id).await.unwrap().unwrap();
    assert_eq!(card.points, 555);
    assert_eq!(card.tier, "SILVER");

    let enrollment = world
        .loyalty
        .ledger()
        .enrollment(card.customer_id, card.program_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(enrollment.points, 555);
}

#[tokio::test]
async fn test_award_by_enrollment_provisions_missing_card() {
    let world = setup().await;
    let card = approved_card(&world).await;

    // Simulate legacy data: the enrollment is ACTIVE but its card was
    // deactivated out of band.
    sqlx::query("UPDATE cards SET active = 0")
        .execute(world.loyalty.pool())
        .await
        .unwrap();

    let outcome = world
        .loyalty
        .award_points(
            &CardRef::Enrollment {
                account_id: ACCOUNT.to_string(),
                program_id: world.program.id,
            },
            10,
            &scan("pos-1"),
            "tx-1",
        )
        .await
        .unwrap();

    assert_ne!(outcome.card_id, card.id);
    assert_eq!(outcome.balance, 10);

    let fresh = world
        .loyalty
        .ledger()
        .card(outcome.card_id)
        .await
        .unwrap()
        .unwrap();
    assert!(fresh.active);
    assert_eq!(fresh.points, 10);
    assert_eq!(count_rows(&world, "SELECT COUNT(*) FROM cards").await, 2);
}

#[tokio::test]
async fn test_award_unknown_card_is_not_enrolled() {
    let world = setup().await;

    let err = world
        .loyalty
        .award_points(
            &CardRef::Number("0000111122223333".to_string()),
            10,
            &scan("pos-1"),
            "tx-1",
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_ENROLLED");
}

#[tokio::test]
async fn test_award_without_enrollment_is_not_enrolled() {
    let world = setup().await;

    // Account exists but never enrolled: a scan must not create an
    // enrollment.
    let err = world
        .loyalty
        .award_points(
            &CardRef::Enrollment {
                account_id: ACCOUNT.to_string(),
                program_id: world.program.id,
            },
            10,
            &scan("pos-1"),
            "tx-1",
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_ENROLLED");
    assert_eq!(count_rows(&world, "SELECT COUNT(*) FROM enrollments").await, 0);
}

#[tokio::test]
async fn test_award_validation_failures() {
    let world = setup().await;
    let card = approved_card(&world).await;
    let card_ref = CardRef::Number(card.card_number.clone());

    for (points, key) in [(0, "tx-1"), (-5, "tx-1"), (10, ""), (10, "has space")] {
        let err = world
            .loyalty
            .award_points(&card_ref, points, &scan("pos-1"), key)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION", "points={points} key={key:?}");
    }

    let err = world
        .loyalty
        .award_points(&CardRef::Number("short".to_string()), 10, &scan("pos-1"), "tx-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    // Nothing above should have touched the ledger.
    let card = world.loyalty.ledger().card(card.id).await.unwrap().unwrap();
    assert_eq!(card.points, 0);
}

#[tokio::test]
async fn test_rate_limit_bounds_scanning_actor() {
    let mut config = Config::for_test();
    config.rate_limit.max_hits = 2;
    // Wide window so the test cannot straddle a window boundary.
    config.rate_limit.window_secs = 3600;
    let world = setup_with(config).await;
    let card = approved_card(&world).await;
    let card_ref = CardRef::Number(card.card_number.clone());

    world
        .loyalty
        .award_points(&card_ref, 5, &scan("pos-1"), "tx-1")
        .await
        .unwrap();
    world
        .loyalty
        .award_points(&card_ref, 5, &scan("pos-1"), "tx-2")
        .await
        .unwrap();
    let err = world
        .loyalty
        .award_points(&card_ref, 5, &scan("pos-1"), "tx-3")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMITED");

    // The limit is per actor, not per customer.
    world
        .loyalty
        .award_points(&card_ref, 5, &scan("pos-2"), "tx-4")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_manual_award_records_manual_audit_type() {
    let world = setup().await;
    let card = approved_card(&world).await;

    world
        .loyalty
        .award_points(
            &CardRef::Number(card.card_number.clone()),
            15,
            &AwardSource::Manual {
                actor: "staff-7".to_string(),
            },
            "tx-1",
        )
        .await
        .unwrap();

    let entries = world
        .loyalty
        .ledger()
        .audit_entries_for_card(card.id)
        .await
        .unwrap();
    assert_eq!(entries[0].entry_type, "MANUAL");
    assert!(entries[0].description.contains("staff-7"));
}

#[tokio::test]
async fn test_qr_scan_scenario_end_to_end() {
    let world = setup().await;
    approved_card(&world).await;

    // The customer presents a signed QR; the scanner validates it and
    // awards from the embedded identity.
    let token = world
        .loyalty
        .sign_qr(&QrPayload {
            account_id: ACCOUNT.to_string(),
            program_id: world.program.id,
            card_number: None,
        })
        .unwrap();
    let payload = world.loyalty.verify_qr(&token).unwrap();

    let card_ref = CardRef::Enrollment {
        account_id: payload.account_id,
        program_id: payload.program_id,
    };
    let first = world
        .loyalty
        .award_points(&card_ref, 25, &scan("pos-1"), "tx-1")
        .await
        .unwrap();
    assert_eq!(first.balance, 25);

    let replay = world
        .loyalty
        .award_points(&card_ref, 25, &scan("pos-1"), "tx-1")
        .await
        .unwrap();
    assert_eq!(replay.balance, 25);
    assert!(replay.replayed);

    let enrollment = world
        .loyalty
        .ledger()
        .enrollment_by_account(ACCOUNT, world.program.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(enrollment.points, 25);
}
