//! Scenarios against a real PostgreSQL instance.
//!
//! Skipped unless `DATABASE_URL` is set. Each test provisions its own accounts
//! and uses a unique provider id, so runs do not interfere with each other.

use std::sync::Arc;

use ledger::prelude::*;
use tokio::sync::Mutex;
use uuid::Uuid;

// Concurrent DDL on the same objects can fail, so install once per run
static SCHEMA_READY: Mutex<bool> = Mutex::const_new(false);

async fn backend() -> Option<PgLedgerBackend> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let backend = PgLedgerBackend::connect(&PoolConfig::new(url))
        .await
        .expect("Failed to connect to DATABASE_URL");

    let mut ready = SCHEMA_READY.lock().await;
    if !*ready {
        backend
            .install_schema()
            .await
            .expect("Failed to install schema");
        *ready = true;
    }
    Some(backend)
}

fn provider() -> String {
    format!("test-{}", Uuid::new_v4())
}

fn event(
    account: AccountId,
    provider: &str,
    external_id: &str,
    kind: EntryKind,
    cents: i64,
) -> WebhookEvent {
    WebhookEvent::new(
        account.get(),
        provider,
        external_id,
        kind,
        Amount::try_from_cents(cents).unwrap(),
    )
    .unwrap()
}

async fn balance_of(backend: &PgLedgerBackend, account: AccountId) -> Amount {
    backend
        .find_account(account)
        .await
        .unwrap()
        .unwrap()
        .balance()
}

#[tokio::test]
async fn credit_redelivery_and_overdraft() {
    let Some(backend) = backend().await else {
        return;
    };
    let account = backend.create_account("pg", Amount::zero()).await.unwrap().id();
    let provider = provider();
    let coordinator = TransactionCoordinator::new(backend.clone(), TimeoutConfig::default());

    let credit = event(account, &provider, "evt_1", EntryKind::Credit, 5_000);
    let first = coordinator.process(&credit).await.unwrap();
    assert!(first.is_applied());
    assert_eq!(first.balance(), Amount::from_cents(5_000));

    let again = coordinator.process(&credit).await.unwrap();
    assert!(!again.is_applied());
    assert_eq!(again.transaction_id(), first.transaction_id());
    assert_eq!(again.balance(), Amount::from_cents(5_000));

    let debit = coordinator
        .process(&event(account, &provider, "evt_2", EntryKind::Debit, 3_000))
        .await
        .unwrap();
    assert_eq!(debit.balance(), Amount::from_cents(2_000));

    let err = coordinator
        .process(&event(account, &provider, "evt_3", EntryKind::Debit, 3_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    assert!(backend.find_entry(&provider, "evt_3").await.unwrap().is_none());
    assert_eq!(balance_of(&backend, account).await, Amount::from_cents(2_000));
}

#[tokio::test]
async fn unknown_account() {
    let Some(backend) = backend().await else {
        return;
    };
    let coordinator = TransactionCoordinator::new(backend, TimeoutConfig::default());
    let missing = AccountId::new(i64::MAX).unwrap();

    let err = coordinator
        .process(&event(missing, &provider(), "evt", EntryKind::Credit, 100))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::AccountNotFound(missing));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redeliveries_apply_once() {
    let Some(backend) = backend().await else {
        return;
    };
    let account = backend.create_account("pg", Amount::zero()).await.unwrap().id();
    let coordinator = Arc::new(TransactionCoordinator::new(
        backend.clone(),
        TimeoutConfig::from_millis(5_000, 5_000),
    ));
    let credit = event(account, &provider(), "evt_storm", EntryKind::Credit, 2_500);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let credit = credit.clone();
            tokio::spawn(async move { coordinator.process(&credit).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_applied() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(balance_of(&backend, account).await, Amount::from_cents(2_500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_debits_cannot_overdraw() {
    let Some(backend) = backend().await else {
        return;
    };
    let account = backend
        .create_account("pg", Amount::from_cents(10_000))
        .await
        .unwrap()
        .id();
    let provider = provider();
    let coordinator = Arc::new(TransactionCoordinator::new(
        backend.clone(),
        TimeoutConfig::from_millis(5_000, 5_000),
    ));

    let handles: Vec<_> = ["evt_a", "evt_b"]
        .into_iter()
        .map(|external_id| {
            let coordinator = Arc::clone(&coordinator);
            let debit = event(account, &provider, external_id, EntryKind::Debit, 6_000);
            tokio::spawn(async move { coordinator.process(&debit).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => applied += 1,
            Err(EngineError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(balance_of(&backend, account).await, Amount::from_cents(4_000));
}

#[tokio::test]
async fn lock_timeout_while_peer_holds_account() {
    let Some(backend) = backend().await else {
        return;
    };
    let account = backend
        .create_account("pg", Amount::from_cents(5_000))
        .await
        .unwrap()
        .id();
    let provider = provider();

    let mut peer = backend
        .begin(TimeoutConfig::from_millis(10_000, 10_000))
        .await
        .unwrap();
    peer.lock_for_update(account).await.unwrap();

    let coordinator =
        TransactionCoordinator::new(backend.clone(), TimeoutConfig::from_millis(2_000, 50));
    let err = coordinator
        .process(&event(account, &provider, "evt_blocked", EntryKind::Debit, 1_000))
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::RetryLater(RetryReason::LockTimeout));
    peer.rollback().await.unwrap();

    assert_eq!(balance_of(&backend, account).await, Amount::from_cents(5_000));
    assert!(backend.find_entry(&provider, "evt_blocked").await.unwrap().is_none());
}
