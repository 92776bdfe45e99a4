//! Voucher lifecycle integration tests: issue, claim, cancel, sweep.
//!
//! Run with: `cargo test --test voucher_lifecycle_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{checkout_completed, document, profile, request, Harness};
use futures::future::join_all;
use mealshare::app::{BulkAction, VoucherLookup};
use mealshare::capacity::MealSelection;
use mealshare::reference::ScriptedReferenceGenerator;
use mealshare::roles::Actor;
use mealshare::store::Repository;
use mealshare::types::{Money, PaymentMethod, UnitId, UnitStatus, VoucherStatus};
use mealshare::{AppContext, Config, MealshareApp, VoucherError};
use mealshare_testing::FixedClock;
use std::sync::Arc;

/// Scenario C: claim by reference, then a second claim fails untouched.
#[tokio::test]
async fn test_claim_is_exclusive() {
    println!("🧪 Claim exclusivity");

    let h = Harness::with_references(Arc::new(ScriptedReferenceGenerator::new(["BB-240115-AB12"])));
    let slot = h.lunch_slot().await;
    h.meal("Chicken Adobo", 5).await;

    let voucher = h
        .app
        .issuance
        .issue_voucher(request(&slot, profile(1), MealSelection::Any))
        .await
        .unwrap();
    assert_eq!(voucher.reference_number, "BB-240115-AB12");

    let staff = Actor::staff();
    let claimed = h
        .app
        .redemption
        .claim(VoucherLookup::Reference("BB-240115-AB12".to_string()), staff)
        .await
        .unwrap();
    assert_eq!(claimed.status, VoucherStatus::Claimed);
    assert_eq!(claimed.claimed_by, Some(staff.user_id));
    let claimed_at = claimed.claimed_at.expect("claim timestamp set");

    let second = h
        .app
        .redemption
        .claim(VoucherLookup::Reference("BB-240115-AB12".to_string()), Actor::staff())
        .await;
    let err = second.unwrap_err();
    assert!(matches!(err, VoucherError::InvalidTransition { .. }));
    assert_eq!(err.user_message(), "This voucher has already been processed.");

    let stored = h.repo.voucher(voucher.id).await.unwrap().unwrap();
    assert_eq!(stored.claimed_by, Some(staff.user_id));
    assert_eq!(stored.claimed_at, Some(claimed_at));

    println!("  ✅ Second claim refused, original claim kept");
}

/// Many staff scanning the same voucher at once: exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let h = Harness::new();
    let slot = h.lunch_slot().await;
    h.meal("Chicken Adobo", 1).await;
    let voucher = h
        .app
        .issuance
        .issue_voucher(request(&slot, profile(1), MealSelection::Any))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let redemption = h.app.redemption.clone();
            let id = voucher.id;
            tokio::spawn(async move { redemption.claim(id.into(), Actor::staff()).await })
        })
        .collect();
    let results: Vec<_> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, VoucherError::InvalidTransition { .. })));
}

/// Claiming a unit-backed voucher marks its unit claimed; cancelling keeps it consumed.
#[tokio::test]
async fn test_unit_follows_voucher() {
    let h = Harness::new();
    let slot = h.lunch_slot().await;
    let donation = h
        .app
        .payments
        .submit_donation(Actor::donor(), "donor@example.com", Money::from_major(130), PaymentMethod::Card)
        .await
        .unwrap();
    let payload = checkout_completed("evt_units", "cs_units", donation.id);
    h.app.payments.process_webhook(payload.as_bytes(), &h.sign(&payload)).await;

    let student = Actor::student();
    let mut first = request(&slot, profile(1), MealSelection::Any);
    first.actor = student;
    let claimed = h.app.issuance.issue_voucher(first).await.unwrap();
    let mut second = request(&slot, profile(1), MealSelection::Any);
    second.actor = student;
    second.document = None;
    let cancelled = h.app.issuance.issue_voucher(second).await.unwrap();

    h.app.redemption.claim(claimed.id.into(), Actor::staff()).await.unwrap();
    h.app.redemption.cancel(cancelled.id, student).await.unwrap();

    let units = h.repo.units_for_donation(donation.id).await.unwrap();
    let status_of = |id: Option<UnitId>| units.iter().find(|u| Some(u.id) == id).unwrap().status;
    assert_eq!(status_of(claimed.unit_id), UnitStatus::Claimed);
    assert_eq!(status_of(cancelled.unit_id), UnitStatus::Reserved);

    let snapshot = h.app.dashboard.metrics_snapshot().await.unwrap();
    assert_eq!(snapshot.meals_available, 0);
}

/// Students may only cancel their own vouchers.
#[tokio::test]
async fn test_student_cannot_cancel_someone_elses_voucher() {
    let h = Harness::new();
    let slot = h.lunch_slot().await;
    h.meal("Chicken Adobo", 1).await;
    let voucher = h
        .app
        .issuance
        .issue_voucher(request(&slot, profile(1), MealSelection::Any))
        .await
        .unwrap();

    let result = h.app.redemption.cancel(voucher.id, Actor::student()).await;
    assert!(matches!(result, Err(VoucherError::Forbidden { .. })));
    assert_eq!(
        h.repo.voucher(voucher.id).await.unwrap().unwrap().status,
        VoucherStatus::Active
    );
}

/// Bulk actions report per voucher and are not atomic as a batch.
#[tokio::test]
async fn test_bulk_action_is_per_voucher() {
    let h = Harness::new();
    let slot = h.lunch_slot().await;
    h.meal("Chicken Adobo", 3).await;

    let mut ids = Vec::new();
    for n in 0..3 {
        let voucher = h
            .app
            .issuance
            .issue_voucher(request(&slot, profile(n), MealSelection::Any))
            .await
            .unwrap();
        ids.push(voucher.id);
    }
    h.app.redemption.claim(ids[1].into(), Actor::staff()).await.unwrap();

    let outcomes = h.app.redemption.bulk_action(&ids, BulkAction::Cancel, Actor::admin()).await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(outcomes[1].result, Err(VoucherError::InvalidTransition { .. })));
    assert!(outcomes[2].result.is_ok());

    let statuses: Vec<_> = h
        .repo
        .vouchers()
        .await
        .into_iter()
        .filter(|v| v.status == VoucherStatus::Cancelled)
        .collect();
    assert_eq!(statuses.len(), 2);
}

/// A sweep run after the scheduled date expires only what is still active.
#[tokio::test]
async fn test_sweep_expires_only_active_vouchers() {
    let h = Harness::new();
    let slot = h.lunch_slot().await;
    h.meal("Chicken Adobo", 2).await;

    let unclaimed = h
        .app
        .issuance
        .issue_voucher(request(&slot, profile(1), MealSelection::Any))
        .await
        .unwrap();
    let claimed = h
        .app
        .issuance
        .issue_voucher(request(&slot, profile(2), MealSelection::Any))
        .await
        .unwrap();
    h.app.redemption.claim(claimed.id.into(), Actor::staff()).await.unwrap();

    // Both are scheduled tomorrow, so nothing is overdue today.
    let report = h.app.redemption.expire_overdue(h.context.today()).await.unwrap();
    assert_eq!(report.vouchers_expired, 0);

    let later = AppContext::new(Arc::new(h.repo.clone()), Arc::new(h.gateway.clone()), Config::default())
        .with_clock(Arc::new(FixedClock::at_noon(2024, 1, 17).unwrap()));
    let sweeper = MealshareApp::new(later.clone());
    let report = sweeper.redemption.expire_overdue(later.today()).await.unwrap();
    assert_eq!(report.vouchers_expired, 1);
    assert_eq!(report.vouchers_failed, 0);

    assert_eq!(
        h.repo.voucher(unclaimed.id).await.unwrap().unwrap().status,
        VoucherStatus::Expired
    );
    assert_eq!(
        h.repo.voucher(claimed.id).await.unwrap().unwrap().status,
        VoucherStatus::Claimed
    );

    let again = sweeper.redemption.expire(unclaimed.id, Actor::admin()).await;
    assert!(matches!(again, Err(VoucherError::InvalidTransition { .. })));
}

/// Scenario E: a returning requester reuses the document on file.
#[tokio::test]
async fn test_document_on_file_is_reused() {
    println!("🧪 Document reuse");

    let h = Harness::new();
    let slot = h.lunch_slot().await;
    h.meal("Chicken Adobo", 3).await;

    let first = h
        .app
        .issuance
        .issue_voucher(request(&slot, profile(7), MealSelection::Any))
        .await
        .unwrap();

    let mut again = request(&slot, profile(7), MealSelection::Any);
    again.document = None;
    let second = h.app.issuance.issue_voucher(again).await.unwrap();

    let student = h.repo.student_by_email("student7@example.edu").await.unwrap().unwrap();
    let documents = h.repo.documents_for_student(student.id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].voucher_id, Some(first.id));
    assert_eq!(second.student_id, student.id);

    let mut third = request(&slot, profile(7), MealSelection::Any);
    third.document = Some(document("cor-2024.pdf"));
    let third = h.app.issuance.issue_voucher(third).await.unwrap();

    let documents = h.repo.documents_for_student(student.id).await.unwrap();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].file_name, "cor-2024.pdf");
    assert_eq!(documents[0].voucher_id, Some(third.id));
    assert_eq!(documents[1].voucher_id, Some(first.id));

    println!("  ✅ Existing document kept its linkage");
}

/// An upload stored through issuance backs the requester's first voucher.
#[tokio::test]
async fn test_uploaded_document_backs_first_request() {
    let h = Harness::new();
    let slot = h.lunch_slot().await;
    h.meal("Chicken Adobo", 1).await;

    let student = Actor::student();
    let stored = h
        .app
        .issuance
        .upload_document(student, "cor.pdf", "application/pdf", b"%PDF-1.4")
        .await
        .unwrap();
    assert_eq!(stored.size_bytes, 8);

    let mut req = request(&slot, profile(3), MealSelection::Any);
    req.actor = student;
    req.document = Some(stored.clone());
    let voucher = h.app.issuance.issue_voucher(req).await.unwrap();

    let owner = h.repo.student_by_email("student3@example.edu").await.unwrap().unwrap();
    let documents = h.repo.documents_for_student(owner.id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].url, stored.url);
    assert_eq!(documents[0].voucher_id, Some(voucher.id));

    let admin = h
        .app
        .issuance
        .upload_document(Actor::admin(), "cor.pdf", "application/pdf", b"%PDF-1.4")
        .await;
    assert!(matches!(admin, Err(VoucherError::Forbidden { .. })));
    let text = h
        .app
        .issuance
        .upload_document(student, "notes.txt", "text/plain", b"hello")
        .await;
    assert!(matches!(text, Err(VoucherError::Validation(_))));
}
