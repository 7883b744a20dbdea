//! User registration: account creation, referral-code allocation and the
//! one-time welcome bonus, committed as a single transaction.

use anyhow::anyhow;
use sqlx::PgPool;
use tracing::info;

use crate::error::ApiError;
use crate::ledger;
use crate::promo::generate_code;
use crate::types::User;

const MAX_REFERRAL_CODE_ATTEMPTS: usize = 5;

/// Creates the account at privilege level 1 and credits the welcome bonus.
///
/// The insert races two unique constraints: the phone (duplicate
/// registration) and the generated referral code (collision). `ON CONFLICT
/// DO NOTHING` keeps the transaction alive either way; a zero-row insert is
/// then disambiguated by checking whether the phone exists, so a referral
/// code collision retries instead of masquerading as a duplicate account.
pub async fn register(
    pool: &PgPool,
    welcome_bonus: i64,
    phone: &str,
    name: &str,
) -> Result<User, ApiError> {
    let mut tx = pool.begin().await?;

    let mut inserted = false;
    for _ in 0..MAX_REFERRAL_CODE_ATTEMPTS {
        let referral_code = generate_code();
        let res = sqlx::query(
            "INSERT INTO users (phone, name, cashback_amount, referral_code, referral_count, \
             referral_bonus_earned, privilege_level, created_at) \
             VALUES ($1, $2, 0, $3, 0, 0, 1, now()) \
             ON CONFLICT DO NOTHING",
        )
        .bind(phone)
        .bind(name)
        .bind(&referral_code)
        .execute(tx.as_mut())
        .await?;

        if res.rows_affected() == 1 {
            inserted = true;
            break;
        }

        let phone_taken: Option<i32> = sqlx::query_scalar("SELECT 1 FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_optional(tx.as_mut())
            .await?;
        if phone_taken.is_some() {
            return Err(ApiError::Conflict("user already registered".into()));
        }
        // Referral code collision, draw again.
    }

    if !inserted {
        return Err(ApiError::Internal(anyhow!(
            "could not allocate a unique referral code after {} attempts",
            MAX_REFERRAL_CODE_ATTEMPTS
        )));
    }

    // Only reachable from here, so the bonus lands at most once per account.
    ledger::credit_welcome_bonus(&mut tx, phone, welcome_bonus).await?;

    let user: User = sqlx::query_as(
        "SELECT phone, name, cashback_amount, referral_code, referral_count, \
         referral_bonus_earned, privilege_level, created_at \
         FROM users WHERE phone = $1",
    )
    .bind(phone)
    .fetch_one(tx.as_mut())
    .await?;

    tx.commit().await?;

    info!(phone = %phone, "user registered");
    Ok(user)
}
