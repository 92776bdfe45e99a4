//! Payment completion integration tests.
//!
//! Donations become funded capacity exactly once, whichever path (webhook
//! or reconciliation) gets there first and however often the gateway
//! redelivers.
//!
//! Run with: `cargo test --test payment_completion_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{checkout_completed, profile, request, Harness};
use mealshare::app::WebhookAck;
use mealshare::capacity::{CapacitySource, MealSelection};
use mealshare::roles::Actor;
use mealshare::store::Repository;
use mealshare::types::{Money, PaymentMethod, PaymentStatus, UnitStatus};
use mealshare::{AppContext, Config, MealshareApp, VoucherError};
use mealshare_testing::FixedClock;
use std::sync::Arc;

/// Scenario A: 650 at 65 per meal funds exactly ten units.
#[tokio::test]
async fn test_completed_donation_mints_one_unit_per_meal() {
    println!("🧪 Donation completion mints units");

    let h = Harness::new();
    let donation = h
        .app
        .payments
        .submit_donation(Actor::donor(), "donor@example.com", Money::from_major(650), PaymentMethod::Card)
        .await
        .unwrap();
    assert_eq!(donation.meal_count, 10);
    assert_eq!(donation.payment_status, PaymentStatus::Pending);

    let payload = checkout_completed("evt_a", "cs_a", donation.id);
    let ack = h.app.payments.process_webhook(payload.as_bytes(), &h.sign(&payload)).await;
    assert_eq!(ack, WebhookAck::Processed);

    let stored = h.repo.donation(donation.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert_eq!(stored.payment_intent_id.as_deref(), Some("pi_evt_a"));
    assert!(stored.completed_at.is_some());

    let units = h.repo.units_for_donation(donation.id).await.unwrap();
    assert_eq!(units.len(), 10);
    assert!(units.iter().all(|u| u.status == UnitStatus::Available));
    assert!(units.iter().all(|u| u.donation_id == donation.id));

    let snapshot = h.app.dashboard.metrics_snapshot().await.unwrap();
    assert_eq!(snapshot.total_donations, Money::from_major(650));
    assert_eq!(snapshot.total_meals_donated, 10);
    assert_eq!(snapshot.total_donors, 1);
    assert_eq!(snapshot.meals_available, 10);

    println!("  ✅ 10 units available");
}

/// Scenario D: the same event delivered twice completes the donation once.
#[tokio::test]
async fn test_replayed_webhook_is_a_no_op_success() {
    println!("🧪 Webhook replay");

    let h = Harness::new();
    let donation = h
        .app
        .payments
        .submit_donation(Actor::donor(), "donor@example.com", Money::from_major(130), PaymentMethod::EWallet)
        .await
        .unwrap();

    let payload = checkout_completed("evt_d", "cs_d", donation.id);
    let signature = h.sign(&payload);
    let first = h.app.payments.process_webhook(payload.as_bytes(), &signature).await;
    let second = h.app.payments.process_webhook(payload.as_bytes(), &signature).await;

    assert_eq!(first, WebhookAck::Processed);
    assert_eq!(second, WebhookAck::Duplicate);
    assert_eq!(second.status_code(), 200);
    assert_eq!(h.repo.units_for_donation(donation.id).await.unwrap().len(), 2);
    assert_eq!(h.repo.webhook_event_count().await, 1);

    println!("  ✅ Second delivery acknowledged without side effects");
}

/// Different events for the same payment must not mint twice either.
#[tokio::test]
async fn test_distinct_events_for_one_payment_mint_once() {
    let h = Harness::new();
    let donation = h
        .app
        .payments
        .submit_donation(Actor::donor(), "donor@example.com", Money::from_major(195), PaymentMethod::Card)
        .await
        .unwrap();

    let checkout = checkout_completed("evt_1", "cs_1", donation.id);
    let intent = format!(
        r#"{{"id":"evt_2","type":"payment_intent.succeeded","data":{{"object":{{"id":"pi_evt_1","metadata":{{"donation_id":"{}"}}}}}}}}"#,
        donation.id
    );
    h.app.payments.process_webhook(checkout.as_bytes(), &h.sign(&checkout)).await;
    let ack = h.app.payments.process_webhook(intent.as_bytes(), &h.sign(&intent)).await;

    assert_eq!(ack, WebhookAck::Processed);
    assert_eq!(h.repo.units_for_donation(donation.id).await.unwrap().len(), 3);
}

/// Webhook and reconciliation racing for the same donation.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_webhook_and_reconciliation_race() {
    let h = Harness::new();
    let donation = h
        .app
        .payments
        .submit_donation(Actor::donor(), "donor@example.com", Money::from_major(650), PaymentMethod::Card)
        .await
        .unwrap();
    let session = h.app.payments.create_checkout_session(donation.id).await.unwrap();
    h.gateway.mark_paid(&session.session_id);

    let payload = checkout_completed("evt_race", &session.session_id, donation.id);
    let signature = h.sign(&payload);

    let webhook = {
        let payments = h.app.payments.clone();
        tokio::spawn(async move { payments.process_webhook(payload.as_bytes(), &signature).await })
    };
    let reconcile = {
        let payments = h.app.payments.clone();
        let id = donation.id;
        tokio::spawn(async move { payments.process_payment_completion(id).await })
    };

    assert_eq!(webhook.await.unwrap(), WebhookAck::Processed);
    assert!(reconcile.await.unwrap().unwrap());
    assert_eq!(h.repo.units_for_donation(donation.id).await.unwrap().len(), 10);
}

/// A webhook signed with the wrong secret changes nothing and asks for redelivery.
#[tokio::test]
async fn test_unverified_webhook_changes_nothing() {
    let h = Harness::new();
    let donation = h
        .app
        .payments
        .submit_donation(Actor::donor(), "donor@example.com", Money::from_major(650), PaymentMethod::Card)
        .await
        .unwrap();

    let payload = checkout_completed("evt_forged", "cs_x", donation.id);
    let forged = h.sign(&payload.replace("cs_x", "cs_y"));
    let ack = h.app.payments.process_webhook(payload.as_bytes(), &forged).await;

    assert!(matches!(ack, WebhookAck::Rejected(_)));
    assert_eq!(ack.status_code(), 400);
    let stored = h.repo.donation(donation.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(h.repo.units_for_donation(donation.id).await.unwrap().is_empty());
}

/// Checkout can only be opened for pending donations.
#[tokio::test]
async fn test_checkout_requires_pending_donation() {
    let h = Harness::new();
    let donation = h
        .app
        .payments
        .submit_donation(Actor::donor(), "donor@example.com", Money::from_major(65), PaymentMethod::Card)
        .await
        .unwrap();
    h.app.payments.mark_payment_cancelled(donation.id).await.unwrap();

    let result = h.app.payments.create_checkout_session(donation.id).await;
    assert!(matches!(result, Err(VoucherError::InvalidTransition { .. })));
}

/// Lapsed units stop counting as available before any sweep runs.
#[tokio::test]
async fn test_lapsed_units_are_not_advertised() {
    let mut config = Config::default();
    config.payments.unit_expiry_days = Some(1);
    config.vouchers.capacity_policy = vec![CapacitySource::UnitPool];
    let h = Harness::with_config(config.clone());
    let slot = h.lunch_slot().await;

    let donation = h
        .app
        .payments
        .submit_donation(Actor::donor(), "donor@example.com", Money::from_major(65), PaymentMethod::Card)
        .await
        .unwrap();
    let payload = checkout_completed("evt_lapse", "cs_lapse", donation.id);
    h.app.payments.process_webhook(payload.as_bytes(), &h.sign(&payload)).await;
    assert_eq!(h.app.dashboard.metrics_snapshot().await.unwrap().meals_available, 1);

    let later = AppContext::new(Arc::new(h.repo.clone()), Arc::new(h.gateway.clone()), config)
        .with_clock(Arc::new(FixedClock::at_noon(2024, 1, 18).unwrap()));
    let app = MealshareApp::new(later);

    let snapshot = app.dashboard.metrics_snapshot().await.unwrap();
    assert_eq!(snapshot.meals_available, 0);
    assert_eq!(snapshot.total_meals_donated, 1);

    let mut req = request(&slot, profile(1), MealSelection::Any);
    req.scheduled_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 19).unwrap();
    let result = app.issuance.issue_voucher(req).await;
    assert_eq!(result.unwrap_err(), VoucherError::OutOfCapacity);

    let units = h.repo.units_for_donation(donation.id).await.unwrap();
    assert_eq!(units[0].status, UnitStatus::Available);
}
