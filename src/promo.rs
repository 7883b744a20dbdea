//! Promo-code issuer: mints single-use, time-boxed discount codes backed by
//! a ledger debit, and tracks their lifecycle.

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::ledger;
use crate::types::{PromoCode, PromoStatus};

// No 0/O, 1/I/L: codes get read over the phone.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 10;
const MAX_CODE_ATTEMPTS: usize = 5;

/// A random code drawn uniformly from the unambiguous alphabet. Uniqueness
/// is enforced by the unique index on `promo_codes.code`; collisions are
/// retried.
pub fn generate_code() -> String {
    let n = CODE_ALPHABET.len();
    // Largest multiple of the alphabet size that fits a byte; rejecting
    // draws at or above it keeps the distribution uniform.
    let limit = (u8::MAX as usize / n * n) as u8;

    let mut out = String::with_capacity(CODE_LEN);
    while out.len() < CODE_LEN {
        let id = Uuid::new_v4();
        for (i, b) in id.as_bytes().iter().enumerate() {
            // Bytes 6 and 8 hold the fixed version/variant nibbles.
            if i == 6 || i == 8 || *b >= limit {
                continue;
            }
            out.push(CODE_ALPHABET[*b as usize % n] as char);
            if out.len() == CODE_LEN {
                break;
            }
        }
    }
    out
}

/// Debits the owner's balance and mints a code, as one transaction.
///
/// The debit and the insert commit together or not at all; a failed balance
/// guard rolls the whole thing back with no partial write.
pub async fn issue(
    pool: &PgPool,
    config: &Config,
    phone: &str,
    amount: i64,
) -> Result<PromoCode, ApiError> {
    if amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    if amount < config.min_promo_amount {
        return Err(ApiError::BelowMinimum(format!(
            "minimum promo amount is {}",
            config.min_promo_amount
        )));
    }

    let mut tx = pool.begin().await?;

    if !ledger::debit_for_promo_code(&mut tx, phone, amount).await? {
        return Err(ApiError::InsufficientBalance(format!(
            "balance does not cover {}",
            amount
        )));
    }

    let now = Utc::now();
    let expires_at = now + Duration::days(config.promo_validity_days);

    for _ in 0..MAX_CODE_ATTEMPTS {
        let id = Uuid::new_v4();
        let code = generate_code();
        // ON CONFLICT DO NOTHING keeps the transaction alive on a collision;
        // zero rows affected means the code was taken, so draw again.
        let res = sqlx::query(
            "INSERT INTO promo_codes (id, code, amount, owner_phone, status, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, 'active', $5, $6) \
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(id)
        .bind(&code)
        .bind(amount)
        .bind(phone)
        .bind(now)
        .bind(expires_at)
        .execute(tx.as_mut())
        .await?;

        if res.rows_affected() == 1 {
            tx.commit().await?;
            info!(owner = %phone, code = %code, amount, "promo code issued");
            return Ok(PromoCode {
                id,
                code,
                amount,
                owner_phone: phone.to_string(),
                status: PromoStatus::Active.as_str().to_string(),
                created_at: now,
                expires_at,
                used_at: None,
            });
        }
    }

    Err(ApiError::Internal(anyhow!(
        "could not allocate a unique promo code after {} attempts",
        MAX_CODE_ATTEMPTS
    )))
}

/// Outcome of a successful redemption; `amount` may be subtracted from a
/// trip's payable total by the manager applying the discount.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub code: String,
    pub amount: i64,
    pub used_at: DateTime<Utc>,
}

/// Redeems a code exactly once. Redemption does not re-credit the ledger.
pub async fn redeem(pool: &PgPool, code: &str) -> Result<Redemption, ApiError> {
    let promo: Option<PromoCode> = sqlx::query_as(
        "SELECT id, code, amount, owner_phone, status, created_at, expires_at, used_at \
         FROM promo_codes WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;

    let promo = promo.ok_or_else(|| ApiError::NotFound(format!("promo code {} not found", code)))?;
    let now = Utc::now();

    match promo.effective_status(now) {
        PromoStatus::Used => Err(ApiError::AlreadyUsed(format!(
            "promo code {} has already been used",
            code
        ))),
        PromoStatus::Expired => {
            // Opportunistically persist the derived expiry.
            sqlx::query("UPDATE promo_codes SET status = 'expired' WHERE code = $1 AND status = 'active'")
                .bind(code)
                .execute(pool)
                .await?;
            Err(ApiError::Expired(format!("promo code {} has expired", code)))
        }
        PromoStatus::Active => {
            // Single-use under concurrency: only the write that finds the
            // stored status still `active` wins.
            let res = sqlx::query(
                "UPDATE promo_codes SET status = 'used', used_at = $2 \
                 WHERE code = $1 AND status = 'active'",
            )
            .bind(code)
            .bind(now)
            .execute(pool)
            .await?;

            if res.rows_affected() != 1 {
                return Err(ApiError::AlreadyUsed(format!(
                    "promo code {} has already been used",
                    code
                )));
            }

            info!(code = %code, amount = promo.amount, "promo code redeemed");
            Ok(Redemption {
                code: promo.code,
                amount: promo.amount,
                used_at: now,
            })
        }
    }
}

/// All of a user's codes, newest first, with status derived as of now.
/// The stored status is never trusted for expiry on the read path.
pub async fn list_for_user(pool: &PgPool, phone: &str) -> Result<Vec<PromoCode>, ApiError> {
    let rows: Vec<PromoCode> = sqlx::query_as(
        "SELECT id, code, amount, owner_phone, status, created_at, expires_at, used_at \
         FROM promo_codes WHERE owner_phone = $1 ORDER BY created_at DESC",
    )
    .bind(phone)
    .fetch_all(pool)
    .await?;

    let now = Utc::now();
    Ok(rows
        .into_iter()
        .map(|mut p| {
            p.status = p.effective_status(now).as_str().to_string();
            p
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_has_fixed_length() {
        assert_eq!(generate_code().len(), CODE_LEN);
    }

    #[test]
    fn code_stays_within_alphabet() {
        for _ in 0..100 {
            let code = generate_code();
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)), "{}", code);
        }
    }

    #[test]
    fn alphabet_omits_ambiguous_characters() {
        for b in [b'0', b'O', b'1', b'I', b'L'] {
            assert!(!CODE_ALPHABET.contains(&b));
        }
    }

    #[test]
    fn every_alphabet_character_is_reachable() {
        // 500 codes = 5000 draws over 31 symbols; a symbol the generator
        // could never emit would show up here immediately.
        let mut seen = [false; 256];
        for _ in 0..500 {
            for b in generate_code().bytes() {
                seen[b as usize] = true;
            }
        }
        for b in CODE_ALPHABET {
            assert!(seen[*b as usize], "{} never generated", *b as char);
        }
    }
}
