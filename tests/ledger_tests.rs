//! Credit ledger property tests.
//!
//! The ledger invariants under test:
//! 1. balance always equals the sum of transaction amounts;
//! 2. no deduction leaves a balance negative;
//! 3. every refund references exactly one prior deduction and is applied
//!    at most once (net effect zero).

mod common;

use common::mocks::{build_harness, claims_for, HarnessOptions};
use mevzuat::types::{AppError, TransactionKind, UserRole};

#[tokio::test]
async fn test_initial_grant_applied_once() {
    let harness = build_harness(HarnessOptions::default()).await;
    let claims = claims_for("u-1", "u1@example.com", UserRole::User);

    let account = harness.state.ledger.ensure_account(&claims, 30).await.unwrap();
    assert_eq!(account.credit_balance, 30);

    // A second sight must not grant again.
    let account = harness.state.ledger.ensure_account(&claims, 30).await.unwrap();
    assert_eq!(account.credit_balance, 30);

    let entries = harness.meta.list_transactions("u-1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, TransactionKind::Initial);
    harness.state.ledger.verify_ledger("u-1").await.unwrap();
}

#[tokio::test]
async fn test_reserve_deducts_and_matches_log_sum() {
    let harness = build_harness(HarnessOptions::default()).await;
    let claims = claims_for("u-2", "u2@example.com", UserRole::User);
    let account = harness.state.ledger.ensure_account(&claims, 10).await.unwrap();

    for _ in 0..4 {
        harness.state.ledger.reserve(&account, 1, None).await.unwrap();
    }
    assert_eq!(harness.state.ledger.balance("u-2").await.unwrap(), 6);
    assert_eq!(harness.meta.sum_transactions("u-2").await.unwrap(), 6);
    harness.state.ledger.verify_ledger("u-2").await.unwrap();
}

#[tokio::test]
async fn test_reserve_rejects_overdraft() {
    let harness = build_harness(HarnessOptions::default()).await;
    let claims = claims_for("u-3", "u3@example.com", UserRole::User);
    let account = harness.state.ledger.ensure_account(&claims, 2).await.unwrap();

    harness.state.ledger.reserve(&account, 1, None).await.unwrap();
    harness.state.ledger.reserve(&account, 1, None).await.unwrap();
    let err = harness.state.ledger.reserve(&account, 1, None).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientCredits));

    // The failed reserve left no row behind.
    assert_eq!(harness.state.ledger.balance("u-3").await.unwrap(), 0);
    let entries = harness.meta.list_transactions("u-3").await.unwrap();
    assert_eq!(entries.len(), 3); // initial + two deductions
    harness.state.ledger.verify_ledger("u-3").await.unwrap();
}

#[tokio::test]
async fn test_refund_applied_at_most_once() {
    let harness = build_harness(HarnessOptions::default()).await;
    let claims = claims_for("u-4", "u4@example.com", UserRole::User);
    let account = harness.state.ledger.ensure_account(&claims, 5).await.unwrap();

    let deduction = harness.state.ledger.reserve(&account, 1, None).await.unwrap();
    assert_eq!(harness.state.ledger.balance("u-4").await.unwrap(), 4);

    let refund = harness
        .state
        .ledger
        .refund(deduction.id, "GeneratorFailed")
        .await
        .unwrap();
    assert_eq!(refund.kind, TransactionKind::Refund);
    assert_eq!(refund.amount, 1);
    assert_eq!(refund.refund_of, Some(deduction.id));
    assert_eq!(harness.state.ledger.balance("u-4").await.unwrap(), 5);

    // Second refund is idempotent: same entry, no double credit.
    let again = harness
        .state
        .ledger
        .refund(deduction.id, "GeneratorFailed")
        .await
        .unwrap();
    assert_eq!(again.id, refund.id);
    assert_eq!(harness.state.ledger.balance("u-4").await.unwrap(), 5);
    harness.state.ledger.verify_ledger("u-4").await.unwrap();
}

#[tokio::test]
async fn test_refund_requires_a_deduction() {
    let harness = build_harness(HarnessOptions::default()).await;
    let claims = claims_for("u-5", "u5@example.com", UserRole::User);
    harness.state.ledger.ensure_account(&claims, 5).await.unwrap();

    let grant = harness
        .state
        .ledger
        .grant("u-5", 10, TransactionKind::Bonus, "kampanya")
        .await
        .unwrap();
    let err = harness
        .state
        .ledger
        .refund(grant.id, "oops")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = harness
        .state
        .ledger
        .refund(uuid::Uuid::new_v4(), "oops")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_admin_reserve_writes_zero_amount_audit_row() {
    let harness = build_harness(HarnessOptions::default()).await;
    let claims = claims_for("admin-1", "admin@example.com", UserRole::Admin);
    let account = harness.state.ledger.ensure_account(&claims, 30).await.unwrap();

    let entry = harness.state.ledger.reserve(&account, 1, None).await.unwrap();
    assert_eq!(entry.kind, TransactionKind::Deduction);
    assert_eq!(entry.amount, 0);
    assert_eq!(harness.state.ledger.balance("admin-1").await.unwrap(), 30);
    harness.state.ledger.verify_ledger("admin-1").await.unwrap();
}

#[tokio::test]
async fn test_grant_validation() {
    let harness = build_harness(HarnessOptions::default()).await;
    let claims = claims_for("u-6", "u6@example.com", UserRole::User);
    harness.state.ledger.ensure_account(&claims, 0).await.unwrap();

    assert!(harness
        .state
        .ledger
        .grant("u-6", 0, TransactionKind::Bonus, "boş")
        .await
        .is_err());
    assert!(harness
        .state
        .ledger
        .grant("u-6", 5, TransactionKind::Deduction, "yanlış tür")
        .await
        .is_err());

    harness
        .state
        .ledger
        .grant("u-6", 25, TransactionKind::Purchase, "satın alma")
        .await
        .unwrap();
    assert_eq!(harness.state.ledger.balance("u-6").await.unwrap(), 25);
}

#[tokio::test]
async fn test_concurrent_reserves_serialize_per_user() {
    let harness = build_harness(HarnessOptions::default()).await;
    let claims = claims_for("u-7", "u7@example.com", UserRole::User);
    let account = harness.state.ledger.ensure_account(&claims, 10).await.unwrap();

    let ledger = &harness.state.ledger;
    let tasks: Vec<_> = (0..10)
        .map(|_| ledger.reserve(&account, 1, None))
        .collect();
    let results = futures::future::join_all(tasks).await;
    assert!(results.iter().all(|r| r.is_ok()));

    assert_eq!(ledger.balance("u-7").await.unwrap(), 0);
    ledger.verify_ledger("u-7").await.unwrap();

    // The eleventh reserve finds nothing left.
    assert!(matches!(
        ledger.reserve(&account, 1, None).await,
        Err(AppError::InsufficientCredits)
    ));
}
