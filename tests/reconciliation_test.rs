mod common;

use account_shop_core::adapters::InMemoryDepositRepository;
use account_shop_core::domain::{DepositStatus, LedgerEntryType, SettledPaymentEvent};
use account_shop_core::ports::DepositRepository;
use account_shop_core::services::ExpirySweeper;
use account_shop_core::use_cases::{
    CreateDepositError, NoMatchReason, ReconcileOutcome, ReconcilePayment,
};
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

fn event(external_id: &str, amount: i64, memo: &str) -> SettledPaymentEvent {
    SettledPaymentEvent {
        external_transaction_id: external_id.to_string(),
        amount: BigDecimal::from(amount),
        memo_text: memo.to_string(),
        status: "success".to_string(),
        raw_payload: json!({ "id": external_id, "amount": amount, "content": memo }),
    }
}

#[tokio::test]
async fn test_worked_example_credits_intended_amount_once() {
    let app = common::test_app(&[42]).await;
    let intent = app
        .state
        .deposits
        .execute(42, BigDecimal::from(100_000), Utc::now())
        .await
        .unwrap();

    let memo = format!("CT DEN:123 {} FT2406", intent.reference_code);
    let outcome = app
        .state
        .reconciler
        .execute(event("FT24001", 99_500, &memo), Utc::now())
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Credited { .. }));
    assert_eq!(app.repo.get_balance(42).await.unwrap(), Some(BigDecimal::from(100_000)));

    let stored = app.repo.get_by_id(intent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Completed);
    assert_eq!(stored.raw_webhook_payload.unwrap()["id"], "FT24001");

    let ledger = app.repo.ledger_entries().await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].entry_type, LedgerEntryType::Deposit);
    assert_eq!(ledger[0].amount, BigDecimal::from(100_000));
    assert_eq!(ledger[0].reference_code.as_deref(), Some(intent.reference_code.as_str()));
}

#[tokio::test]
async fn test_replays_never_credit_twice() {
    let app = common::test_app(&[42]).await;
    let intent = app
        .state
        .deposits
        .execute(42, BigDecimal::from(100_000), Utc::now())
        .await
        .unwrap();

    let first = app
        .state
        .reconciler
        .execute(event("TXN-REPLAY", 100_000, &intent.reference_code), Utc::now())
        .await
        .unwrap();
    assert!(matches!(first, ReconcileOutcome::Credited { .. }));

    for _ in 0..10 {
        let replay = app
            .state
            .reconciler
            .execute(event("TXN-REPLAY", 100_000, &intent.reference_code), Utc::now())
            .await
            .unwrap();
        assert_eq!(replay, ReconcileOutcome::AlreadyProcessed);
    }

    assert_eq!(app.repo.get_balance(42).await.unwrap(), Some(BigDecimal::from(100_000)));
    assert_eq!(app.repo.ledger_entries().await.len(), 1);
}

#[tokio::test]
async fn test_tolerance_boundary() {
    let app = common::test_app(&[42]).await;
    let now = Utc::now();

    let cases = [
        (102_000, true),
        (98_000, true),
        (102_001, false),
        (97_999, false),
    ];

    for (i, (paid, accepted)) in cases.into_iter().enumerate() {
        let intent = app
            .state
            .deposits
            .execute(42, BigDecimal::from(100_000), now)
            .await
            .unwrap();

        let outcome = app
            .state
            .reconciler
            .execute(event(&format!("TOL-{}", i), paid, &intent.reference_code), now)
            .await
            .unwrap();

        let stored = app.repo.get_by_id(intent.id).await.unwrap().unwrap();
        if accepted {
            assert!(matches!(outcome, ReconcileOutcome::Credited { .. }), "paid {}", paid);
            assert_eq!(stored.status, DepositStatus::Completed);
        } else {
            assert!(matches!(outcome, ReconcileOutcome::AmountMismatch { .. }), "paid {}", paid);
            assert_eq!(stored.status, DepositStatus::Pending);
            assert!(stored.external_transaction_id.is_none());
        }
    }

    // Two accepted deposits credit the intended 100000 each.
    assert_eq!(app.repo.get_balance(42).await.unwrap(), Some(BigDecimal::from(200_000)));
}

#[tokio::test]
async fn test_concurrent_same_external_id_credits_once() {
    let app = common::test_app(&[42]).await;
    let intent = app
        .state
        .deposits
        .execute(42, BigDecimal::from(100_000), Utc::now())
        .await
        .unwrap();

    let reconciler = app.state.reconciler.clone();
    let a = {
        let reconciler = reconciler.clone();
        let memo = intent.reference_code.clone();
        tokio::spawn(async move { reconciler.execute(event("RACE-1", 100_000, &memo), Utc::now()).await })
    };
    let b = {
        let reconciler = reconciler.clone();
        let memo = intent.reference_code.clone();
        tokio::spawn(async move { reconciler.execute(event("RACE-1", 100_000, &memo), Utc::now()).await })
    };

    let (a, b) = tokio::join!(a, b);
    let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];

    let credited = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Credited { .. }))
        .count();
    let already = outcomes
        .iter()
        .filter(|o| **o == ReconcileOutcome::AlreadyProcessed)
        .count();
    assert_eq!((credited, already), (1, 1));
    assert_eq!(app.repo.get_balance(42).await.unwrap(), Some(BigDecimal::from(100_000)));
}

#[tokio::test]
async fn test_second_transfer_for_settled_intent_is_not_matched() {
    let app = common::test_app(&[42]).await;
    let intent = app
        .state
        .deposits
        .execute(42, BigDecimal::from(100_000), Utc::now())
        .await
        .unwrap();

    let first = app
        .state
        .reconciler
        .execute(event("TXN-A", 100_000, &intent.reference_code), Utc::now())
        .await
        .unwrap();
    let second = app
        .state
        .reconciler
        .execute(event("TXN-B", 100_000, &intent.reference_code), Utc::now())
        .await
        .unwrap();

    assert!(matches!(first, ReconcileOutcome::Credited { .. }));
    assert_eq!(second, ReconcileOutcome::NoMatch(NoMatchReason::NoPendingDeposit));
    assert_eq!(app.repo.get_balance(42).await.unwrap(), Some(BigDecimal::from(100_000)));
}

#[tokio::test]
async fn test_sweep_and_settle_are_mutually_exclusive() {
    let repo = Arc::new(InMemoryDepositRepository::new());
    repo.add_user(42, BigDecimal::from(0)).await;
    let state = account_shop_core::AppState::new(&common::test_config(), repo.clone()).unwrap();
    let sweeper = ExpirySweeper::new(repo.clone(), std::time::Duration::from_secs(60));
    let now = Utc::now();

    // Swept first: the late payment no longer matches.
    let swept = state.deposits.execute(42, BigDecimal::from(100_000), now).await.unwrap();
    let later = now + Duration::minutes(16);
    assert_eq!(sweeper.sweep(later).await.unwrap(), 1);
    let outcome = state
        .reconciler
        .execute(event("LATE-1", 100_000, &swept.reference_code), later)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::NoMatch(NoMatchReason::NoPendingDeposit));
    assert_eq!(repo.get_balance(42).await.unwrap(), Some(BigDecimal::from(0)));

    // Settled first: the sweep leaves it completed.
    let settled = state.deposits.execute(42, BigDecimal::from(100_000), now).await.unwrap();
    state
        .reconciler
        .execute(event("ONTIME-1", 100_000, &settled.reference_code), now)
        .await
        .unwrap();
    assert_eq!(sweeper.sweep(later).await.unwrap(), 0);
    assert_eq!(
        repo.get_by_id(settled.id).await.unwrap().unwrap().status,
        DepositStatus::Completed
    );
}

#[tokio::test]
async fn test_unswept_intent_past_deadline_still_settles() {
    let app = common::test_app(&[42]).await;
    let created = Utc::now() - Duration::minutes(30);
    let intent = app
        .state
        .deposits
        .execute(42, BigDecimal::from(100_000), created)
        .await
        .unwrap();

    let outcome = app
        .state
        .reconciler
        .execute(event("SLOW-1", 100_000, &intent.reference_code), Utc::now())
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Credited { .. }));
}

#[tokio::test]
async fn test_rate_limit_fifth_allowed_sixth_denied() {
    let app = common::test_app(&[7]).await;
    let now = Utc::now();

    for _ in 0..5 {
        app.state
            .deposits
            .execute(7, BigDecimal::from(50_000), now)
            .await
            .unwrap();
    }

    let sixth = app.state.deposits.execute(7, BigDecimal::from(50_000), now).await;
    assert!(matches!(sixth, Err(CreateDepositError::RateLimited)));
    assert_eq!(app.repo.intent_count().await, 5);

    // An hour later the window has rolled past all five.
    let later = now + Duration::minutes(61);
    assert!(app.state.deposits.execute(7, BigDecimal::from(50_000), later).await.is_ok());
}

#[tokio::test]
async fn test_reconciler_uses_configured_tolerance() {
    let repo = Arc::new(InMemoryDepositRepository::new());
    repo.add_user(1, BigDecimal::from(0)).await;
    let state = account_shop_core::AppState::new(&common::test_config(), repo.clone()).unwrap();
    let intent = state.deposits.execute(1, BigDecimal::from(10_000), Utc::now()).await.unwrap();

    let strict = ReconcilePayment::new(repo.clone(), BigDecimal::from(0));
    let outcome = strict
        .execute(event("STRICT-1", 10_001, &intent.reference_code), Utc::now())
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::AmountMismatch { .. }));
}
