//! Database-backed tests for the conditional-update guards: overdraft
//! protection, once-only trip accrual, single-use redemption and the
//! transactional coupling of status transitions to accrual.
//!
//! Each test runs against its own migrated database via `#[sqlx::test]`.

use chrono::{Duration, Utc};
use cashback_core::config::Config;
use cashback_core::error::ApiError;
use cashback_core::types::{PromoStatus, TripStatus};
use cashback_core::{ledger, promo, trips, users};
use sqlx::PgPool;
use uuid::Uuid;

fn test_config() -> Config {
    Config {
        server_port: 0,
        database_url: String::new(),
        welcome_bonus: 500,
        cashback_base_rate: 2,
        min_promo_amount: 100,
        promo_validity_days: 30,
        referral_bonus: 1000,
        admin_privilege_level: 3,
        rate_limit_max: 30,
        rate_limit_window_secs: 300,
    }
}

async fn seed_user(pool: &PgPool, phone: &str, balance: i64) {
    sqlx::query(
        "INSERT INTO users (phone, name, cashback_amount, referral_code, privilege_level) \
         VALUES ($1, $2, $3, $4, 1)",
    )
    .bind(phone)
    .bind("Test User")
    .bind(balance)
    .bind(format!("REF{phone}"))
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_trip(pool: &PgPool, number: &str, owner: &str, total: i64) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO trips (id, number, status, owner_phone, total_amount) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(number)
    .bind(TripStatus::Paid.as_str())
    .bind(owner)
    .bind(total)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn balance_of(pool: &PgPool, phone: &str) -> i64 {
    sqlx::query_scalar("SELECT cashback_amount FROM users WHERE phone = $1")
        .bind(phone)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
async fn overdraft_leaves_balance_unchanged(pool: PgPool) {
    seed_user(&pool, "+15550001111", 400).await;

    let err = promo::issue(&pool, &test_config(), "+15550001111", 500)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InsufficientBalance(_)));

    assert_eq!(balance_of(&pool, "+15550001111").await, 400);
    let codes = promo::list_for_user(&pool, "+15550001111").await.unwrap();
    assert!(codes.is_empty(), "a failed debit must not mint a code");
}

#[sqlx::test]
async fn trip_accrual_credits_exactly_once(pool: PgPool) {
    seed_user(&pool, "+15550001111", 0).await;
    let trip_id = seed_trip(&pool, "TRIP-1", "+15550001111", 50000).await;

    let mut tx = pool.begin().await.unwrap();
    let credited = ledger::credit_trip_cashback(&mut tx, trip_id, 2).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(credited, 1000);
    assert_eq!(balance_of(&pool, "+15550001111").await, 1000);

    // The duplicate trigger: same call again, fresh transaction.
    let mut tx = pool.begin().await.unwrap();
    let credited = ledger::credit_trip_cashback(&mut tx, trip_id, 2).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(credited, 0);
    assert_eq!(balance_of(&pool, "+15550001111").await, 1000);

    let (cashback, processed): (i64, bool) =
        sqlx::query_as("SELECT cashback_amount, cashback_processed FROM trips WHERE id = $1")
            .bind(trip_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(cashback, 1000);
    assert!(processed);
}

#[sqlx::test]
async fn issue_debits_exactly_once_and_sets_expiry(pool: PgPool) {
    seed_user(&pool, "+15550001111", 1000).await;

    let code = promo::issue(&pool, &test_config(), "+15550001111", 500)
        .await
        .unwrap();
    assert_eq!(code.amount, 500);
    assert_eq!(code.expires_at - code.created_at, Duration::days(30));

    assert_eq!(balance_of(&pool, "+15550001111").await, 500);

    let codes = promo::list_for_user(&pool, "+15550001111").await.unwrap();
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[0].amount, 500);
    assert_eq!(codes[0].status, PromoStatus::Active.as_str());
}

#[sqlx::test]
async fn redemption_is_single_use(pool: PgPool) {
    seed_user(&pool, "+15550001111", 1000).await;
    let code = promo::issue(&pool, &test_config(), "+15550001111", 500)
        .await
        .unwrap();

    let redemption = promo::redeem(&pool, &code.code).await.unwrap();
    assert_eq!(redemption.amount, 500);

    let err = promo::redeem(&pool, &code.code).await.unwrap_err();
    assert!(matches!(err, ApiError::AlreadyUsed(_)));

    // Redemption never re-credits the ledger.
    assert_eq!(balance_of(&pool, "+15550001111").await, 500);
}

#[sqlx::test]
async fn full_balance_issue_then_any_amount_fails(pool: PgPool) {
    seed_user(&pool, "+15550001111", 1000).await;

    let code = promo::issue(&pool, &test_config(), "+15550001111", 1000)
        .await
        .unwrap();
    assert_eq!(code.amount, 1000);
    assert_eq!(balance_of(&pool, "+15550001111").await, 0);

    let err = promo::issue(&pool, &test_config(), "+15550001111", 100)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InsufficientBalance(_)));
    assert_eq!(balance_of(&pool, "+15550001111").await, 0);
}

#[sqlx::test]
async fn completed_transition_credits_owner_and_survives_reentry(pool: PgPool) {
    seed_user(&pool, "+15550001111", 0).await;
    let trip_id = seed_trip(&pool, "TRIP-1", "+15550001111", 50000).await;

    let trip = trips::set_status(&pool, 2, trip_id, TripStatus::Completed)
        .await
        .unwrap();
    assert_eq!(trip.cashback_amount, 1000);
    assert!(trip.cashback_processed);
    assert_eq!(balance_of(&pool, "+15550001111").await, 1000);

    // Manual backward move and re-entry must not credit again.
    trips::set_status(&pool, 2, trip_id, TripStatus::Booked)
        .await
        .unwrap();
    let trip = trips::set_status(&pool, 2, trip_id, TripStatus::Completed)
        .await
        .unwrap();
    assert!(trip.cashback_processed);
    assert_eq!(balance_of(&pool, "+15550001111").await, 1000);
}

#[sqlx::test]
async fn failed_accrual_rolls_back_the_transition(pool: PgPool) {
    // A balance at BIGINT max makes the credit overflow inside the store,
    // failing the accrual after the status write in the same transaction.
    seed_user(&pool, "+15550001111", i64::MAX).await;
    let trip_id = seed_trip(&pool, "TRIP-1", "+15550001111", 50000).await;

    let err = trips::set_status(&pool, 2, trip_id, TripStatus::Completed).await;
    assert!(err.is_err());

    let (status, processed): (String, bool) =
        sqlx::query_as("SELECT status, cashback_processed FROM trips WHERE id = $1")
            .bind(trip_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, TripStatus::Paid.as_str());
    assert!(!processed, "the status write must roll back with the accrual");
    assert_eq!(balance_of(&pool, "+15550001111").await, i64::MAX);
}

#[sqlx::test]
async fn stale_active_code_redemption_reports_and_persists_expiry(pool: PgPool) {
    seed_user(&pool, "+15550001111", 0).await;
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO promo_codes (id, code, amount, owner_phone, status, created_at, expires_at) \
         VALUES ($1, 'STALECODE9', 500, '+15550001111', 'active', $2, $3)",
    )
    .bind(Uuid::new_v4())
    .bind(now - Duration::days(31))
    .bind(now - Duration::days(1))
    .execute(&pool)
    .await
    .unwrap();

    let err = promo::redeem(&pool, "STALECODE9").await.unwrap_err();
    assert!(matches!(err, ApiError::Expired(_)));

    let stored: String = sqlx::query_scalar("SELECT status FROM promo_codes WHERE code = 'STALECODE9'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, PromoStatus::Expired.as_str());
}

#[sqlx::test]
async fn registration_credits_welcome_bonus_once(pool: PgPool) {
    let user = users::register(&pool, 500, "+15550001111", "Alice")
        .await
        .unwrap();
    assert_eq!(user.cashback_amount, 500);
    assert_eq!(user.privilege_level, 1);
    assert!(user.referral_code.is_some());

    let err = users::register(&pool, 500, "+15550001111", "Alice")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
    assert_eq!(balance_of(&pool, "+15550001111").await, 500);
}

#[sqlx::test]
async fn referral_bonus_updates_balance_and_counters(pool: PgPool) {
    seed_user(&pool, "+15550001111", 200).await;

    ledger::credit_referral_bonus(&pool, "+15550001111", 1000)
        .await
        .unwrap();

    let (balance, count, earned): (i64, i32, i64) = sqlx::query_as(
        "SELECT cashback_amount, referral_count, referral_bonus_earned \
         FROM users WHERE phone = '+15550001111'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(balance, 1200);
    assert_eq!(count, 1);
    assert_eq!(earned, 1000);

    let err = ledger::credit_referral_bonus(&pool, "+15559999999", 1000)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}
