//! Balance ledger: the single authority for mutating `users.cashback_amount`.
//!
//! Every mutation is a single conditional `UPDATE` (or a short transaction
//! holding a row lock), so concurrent duplicate triggers cannot overdraw a
//! balance or double-credit a trip. There is no read-then-write anywhere on
//! the balance path.

use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::percent_of;

/// Credits the fixed welcome bonus. Called once per account, from the
/// registration flow only.
pub async fn credit_welcome_bonus(
    tx: &mut Transaction<'_, Postgres>,
    phone: &str,
    bonus: i64,
) -> Result<(), ApiError> {
    let res = sqlx::query("UPDATE users SET cashback_amount = cashback_amount + $2 WHERE phone = $1")
        .bind(phone)
        .bind(bonus)
        .execute(tx.as_mut())
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("user {} not found", phone)));
    }
    Ok(())
}

/// The cashback value attributed to a trip: the pre-computed amount when one
/// was set at booking, otherwise `base_rate` percent of the total.
pub fn accrual_amount(stored: i64, total_amount: i64, base_rate: i64) -> i64 {
    if stored > 0 {
        stored
    } else {
        percent_of(total_amount, base_rate)
    }
}

/// Credits a trip's cashback to its owner, exactly once.
///
/// The trip row is locked for the duration, and the flip of
/// `cashback_processed` is a conditional write; a duplicate trigger observes
/// the flag already set and becomes a no-op. Returns the credited amount,
/// 0 when nothing was credited.
pub async fn credit_trip_cashback(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
    base_rate: i64,
) -> Result<i64, ApiError> {
    let row: Option<(String, i64, i64, bool)> = sqlx::query_as(
        "SELECT owner_phone, total_amount, cashback_amount, cashback_processed \
         FROM trips WHERE id = $1 FOR UPDATE",
    )
    .bind(trip_id)
    .fetch_optional(tx.as_mut())
    .await?;

    let (owner_phone, total_amount, stored_cashback, processed) =
        row.ok_or_else(|| ApiError::NotFound(format!("trip {} not found", trip_id)))?;

    if processed {
        return Ok(0);
    }

    let amount = accrual_amount(stored_cashback, total_amount, base_rate);

    // Compare-and-set on the guard flag; only the write that flips it credits.
    let res = sqlx::query(
        "UPDATE trips SET cashback_processed = true, cashback_amount = $2, updated_at = now() \
         WHERE id = $1 AND cashback_processed = false",
    )
    .bind(trip_id)
    .bind(amount)
    .execute(tx.as_mut())
    .await?;

    if res.rows_affected() != 1 {
        return Ok(0);
    }

    if amount > 0 {
        sqlx::query("UPDATE users SET cashback_amount = cashback_amount + $2 WHERE phone = $1")
            .bind(&owner_phone)
            .bind(amount)
            .execute(tx.as_mut())
            .await?;
    }

    info!(trip_id = %trip_id, owner = %owner_phone, amount, "trip cashback accrued");
    Ok(amount)
}

/// Credits a referral bonus to the referrer and bumps the referral counters.
/// The qualifying event (first paid booking by the referred user) is decided
/// by the caller; this is only the ledger side of it.
pub async fn credit_referral_bonus(
    pool: &PgPool,
    referrer_phone: &str,
    amount: i64,
) -> Result<(), ApiError> {
    let res = sqlx::query(
        "UPDATE users SET cashback_amount = cashback_amount + $2, \
         referral_bonus_earned = referral_bonus_earned + $2, \
         referral_count = referral_count + 1 \
         WHERE phone = $1",
    )
    .bind(referrer_phone)
    .bind(amount)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!(
            "referrer {} not found",
            referrer_phone
        )));
    }

    info!(referrer = %referrer_phone, amount, "referral bonus credited");
    Ok(())
}

/// Check-and-decrement as one statement: the balance guard lives in the
/// `WHERE` clause, so two concurrent debits can never both pass against a
/// stale read. Returns false when the balance does not cover the amount.
pub async fn debit_for_promo_code(
    tx: &mut Transaction<'_, Postgres>,
    phone: &str,
    amount: i64,
) -> Result<bool, ApiError> {
    let res = sqlx::query(
        "UPDATE users SET cashback_amount = cashback_amount - $2 \
         WHERE phone = $1 AND cashback_amount >= $2",
    )
    .bind(phone)
    .bind(amount)
    .execute(tx.as_mut())
    .await?;
    Ok(res.rows_affected() == 1)
}
