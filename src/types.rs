use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::RateLimiter;
use crate::config::Config;

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The database pool.
    pub pool: PgPool,
    /// The application configuration.
    pub config: Config,
    /// Fixed-window limiter for the analytics endpoint.
    pub limiter: Arc<RateLimiter>,
}

/// The six pipeline states a trip moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripStatus {
    InBooking,
    Booked,
    Paid,
    InProgress,
    Completed,
    Archived,
}

impl TripStatus {
    pub const ALL: [TripStatus; 6] = [
        TripStatus::InBooking,
        TripStatus::Booked,
        TripStatus::Paid,
        TripStatus::InProgress,
        TripStatus::Completed,
        TripStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::InBooking => "In Booking",
            TripStatus::Booked => "Booked",
            TripStatus::Paid => "Paid",
            TripStatus::InProgress => "In Progress",
            TripStatus::Completed => "Completed",
            TripStatus::Archived => "Archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }

    /// Position in the pipeline, used to order the conversion funnel.
    pub fn ordinal(&self) -> usize {
        match self {
            TripStatus::InBooking => 0,
            TripStatus::Booked => 1,
            TripStatus::Paid => 2,
            TripStatus::InProgress => 3,
            TripStatus::Completed => 4,
            TripStatus::Archived => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoStatus {
    Active,
    Used,
    Expired,
}

impl PromoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoStatus::Active => "active",
            PromoStatus::Used => "used",
            PromoStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PromoStatus::Active),
            "used" => Some(PromoStatus::Used),
            "expired" => Some(PromoStatus::Expired),
            _ => None,
        }
    }
}

/// A registered user. `phone` is the business key; `cashback_amount` is the
/// spendable balance the ledger guards.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub phone: String,
    pub name: String,
    pub cashback_amount: i64,
    pub referral_code: Option<String>,
    pub referral_count: i32,
    pub referral_bonus_earned: i64,
    pub privilege_level: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: Uuid,
    /// Human-facing trip identifier, unique.
    pub number: String,
    pub status: String,
    pub owner_phone: String,
    pub manager_phone: Option<String>,
    pub manager_name: Option<String>,
    pub country: Option<String>,
    pub total_amount: i64,
    pub paid_amount: i64,
    pub cashback_amount: i64,
    pub cashback_processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub amount: i64,
    pub owner_phone: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl PromoCode {
    /// Status as of `now`. Expiry is derived at read time: a stored `active`
    /// past its `expires_at` is reported as `expired` without requiring an
    /// eager sweep of the stored rows.
    pub fn effective_status(&self, now: DateTime<Utc>) -> PromoStatus {
        match PromoStatus::parse(&self.status) {
            Some(PromoStatus::Used) => PromoStatus::Used,
            Some(PromoStatus::Expired) => PromoStatus::Expired,
            _ if now > self.expires_at => PromoStatus::Expired,
            _ => PromoStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    pub id: Uuid,
    pub source: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn trip_status_roundtrip() {
        for st in TripStatus::ALL {
            assert_eq!(TripStatus::parse(st.as_str()), Some(st));
        }
        assert_eq!(TripStatus::parse("Cancelled"), None);
    }

    #[test]
    fn trip_status_pipeline_order() {
        let ordinals: Vec<usize> = TripStatus::ALL.iter().map(|s| s.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4, 5]);
        assert!(TripStatus::Completed.ordinal() > TripStatus::Paid.ordinal());
    }

    fn promo(status: &str, expires_in: Duration) -> PromoCode {
        let now = Utc::now();
        PromoCode {
            id: Uuid::new_v4(),
            code: "WELCOME10".into(),
            amount: 500,
            owner_phone: "+15550001111".into(),
            status: status.into(),
            created_at: now - Duration::days(1),
            expires_at: now + expires_in,
            used_at: None,
        }
    }

    #[test]
    fn active_code_within_window_stays_active() {
        let p = promo("active", Duration::days(10));
        assert_eq!(p.effective_status(Utc::now()), PromoStatus::Active);
    }

    #[test]
    fn stale_active_code_is_reported_expired() {
        // Stored status still says `active`, but the expiry has passed.
        let p = promo("active", Duration::days(-1));
        assert_eq!(p.effective_status(Utc::now()), PromoStatus::Expired);
    }

    #[test]
    fn used_code_stays_used_past_expiry() {
        let p = promo("used", Duration::days(-1));
        assert_eq!(p.effective_status(Utc::now()), PromoStatus::Used);
    }
}
