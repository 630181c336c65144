//! Database integration tests for the subscription store upsert semantics.
//!
//! These require a Postgres instance with migrations applied:
//!   DATABASE_URL=postgres://... cargo test -p lexflow-billing -- --ignored

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use lexflow_billing::store::{PaymentLedger, SubscriptionStore};
use lexflow_shared::{Plan, SubscriptionStatus};
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    lexflow_shared::create_pool(&url)
        .await
        .expect("failed to create pool")
}

async fn create_test_org(pool: &PgPool) -> Uuid {
    let org_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO organizations (id, name, email, tax_id) VALUES ($1, $2, $3, '12345678909')",
    )
    .bind(org_id)
    .bind(format!("Test Org {}", org_id))
    .bind(format!("org-{}@test.example", org_id))
    .execute(pool)
    .await
    .expect("failed to create test org");
    org_id
}

#[tokio::test]
#[ignore] // Requires database
async fn link_inserts_free_pending_defaults() {
    let pool = test_pool().await;
    let store = SubscriptionStore::new(pool.clone());
    let org_id = create_test_org(&pool).await;

    store
        .link_gateway_subscription(org_id, "sub_test_1")
        .await
        .unwrap();

    let sub = store.get(org_id).await.unwrap().expect("row should exist");
    assert_eq!(sub.plan, Plan::Free);
    assert_eq!(sub.status, SubscriptionStatus::Pending);
    assert_eq!(sub.external_subscription_id.as_deref(), Some("sub_test_1"));
}

#[tokio::test]
#[ignore] // Requires database
async fn relink_preserves_plan_and_status() {
    let pool = test_pool().await;
    let store = SubscriptionStore::new(pool.clone());
    let org_id = create_test_org(&pool).await;

    // Activate professional, then run checkout again (e.g. a retry or upgrade
    // attempt): only the gateway link may change.
    let mut tx = store.begin_org_tx(org_id).await.unwrap();
    store
        .activate(&mut tx, org_id, Plan::Professional, 29_900)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    store
        .link_gateway_subscription(org_id, "sub_test_2")
        .await
        .unwrap();

    let sub = store.get(org_id).await.unwrap().unwrap();
    assert_eq!(sub.plan, Plan::Professional);
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.amount_cents, 29_900);
    assert_eq!(sub.external_subscription_id.as_deref(), Some("sub_test_2"));
}

#[tokio::test]
#[ignore] // Requires database
async fn cancel_keeps_period_end() {
    let pool = test_pool().await;
    let store = SubscriptionStore::new(pool.clone());
    let org_id = create_test_org(&pool).await;

    let mut tx = store.begin_org_tx(org_id).await.unwrap();
    store
        .activate(&mut tx, org_id, Plan::Basic, 9_900)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let before = store.get(org_id).await.unwrap().unwrap();
    let period_end = before.current_period_end.expect("activation sets a period");

    let mut tx = store.begin_org_tx(org_id).await.unwrap();
    store.mark_canceled(&mut tx, org_id).await.unwrap();
    tx.commit().await.unwrap();

    let after = store.get(org_id).await.unwrap().unwrap();
    assert_eq!(after.status, SubscriptionStatus::Canceled);
    assert_eq!(after.current_period_end, Some(period_end));
    assert_eq!(after.plan, Plan::Basic);
}

#[tokio::test]
#[ignore] // Requires database
async fn revert_skipped_when_period_renewed() {
    let pool = test_pool().await;
    let store = SubscriptionStore::new(pool.clone());
    let org_id = create_test_org(&pool).await;

    // A payment settled after the revert decision was made: activation wrote
    // a fresh period, so the revert's re-validated WHERE must not match.
    let mut tx = store.begin_org_tx(org_id).await.unwrap();
    store
        .activate(&mut tx, org_id, Plan::Professional, 29_900)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin_org_tx(org_id).await.unwrap();
    store.revert_to_free(&mut tx, org_id).await.unwrap();
    tx.commit().await.unwrap();

    let sub = store.get(org_id).await.unwrap().unwrap();
    assert_eq!(sub.plan, Plan::Professional);
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert!(sub.current_period_end.is_some());
}

#[tokio::test]
#[ignore] // Requires database
async fn mark_paid_falls_back_to_latest_pending() {
    let pool = test_pool().await;
    let store = SubscriptionStore::new(pool.clone());
    let ledger = PaymentLedger::new(pool.clone());
    let org_id = create_test_org(&pool).await;

    let pending = ledger
        .record_pending(org_id, 9_900, "UNDEFINED", Plan::Basic, serde_json::json!({}))
        .await
        .unwrap();

    // Gateway charge id was never attached locally; settling by external id
    // must still find the pending row.
    let mut tx = store.begin_org_tx(org_id).await.unwrap();
    ledger
        .mark_paid(&mut tx, org_id, "pay_never_attached")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let rows = ledger.recent(org_id, 10).await.unwrap();
    let settled = rows.iter().find(|r| r.id == pending.id).unwrap();
    assert!(settled.status.is_paid());
    assert_eq!(settled.external_id.as_deref(), Some("pay_never_attached"));
}
