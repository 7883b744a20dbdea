//! Cashback, promo-code, trip-pipeline and analytics core for the travel
//! agency backend.

pub mod analytics;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod ledger;
pub mod promo;
pub mod responses;
pub mod trips;
pub mod types;
pub mod users;

use anyhow::Context;
use anyhow::Result;
pub use api::init_router;
pub use auth::RateLimiter;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
pub use types::AppState;

/// Initializes the database pool.
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}

/// Integer percentage of an amount; widens internally so large totals cannot
/// overflow. Remainders truncate toward zero.
pub fn percent_of(amount: i64, percent: i64) -> i64 {
    ((amount as i128 * percent as i128) / 100) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_base_rate() {
        // 2% of a 50000 trip
        assert_eq!(percent_of(50000, 2), 1000);
    }

    #[test]
    fn percent_of_truncates() {
        assert_eq!(percent_of(99, 2), 1);
        assert_eq!(percent_of(49, 2), 0);
    }

    #[test]
    fn percent_of_handles_large_amounts() {
        assert_eq!(percent_of(i64::MAX / 2, 2), i64::MAX / 100);
    }
}
