//! Read-only comparative reporting over trips, users, promo codes and
//! contact requests. Every query is an independent snapshot read; nothing
//! here mutates stored data, so reports may run concurrently with ledger
//! writes.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::ApiError;
use crate::types::{Trip, TripStatus};

/// Reporting window selector. Bounded periods compare against the
/// immediately preceding window of equal length; `All` has no comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    D7,
    D30,
    D90,
    M12,
    All,
}

impl Period {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "7d" => Some(Period::D7),
            "30d" => Some(Period::D30),
            "90d" => Some(Period::D90),
            "12m" => Some(Period::M12),
            "all" => Some(Period::All),
            _ => None,
        }
    }

    fn days(&self) -> Option<i64> {
        match self {
            Period::D7 => Some(7),
            Period::D30 => Some(30),
            Period::D90 => Some(90),
            Period::M12 => Some(365),
            Period::All => None,
        }
    }

    /// The current window start and the start of the equal-length window
    /// immediately preceding it. `None` for `All`.
    pub fn window(&self, now: DateTime<Utc>) -> Option<Window> {
        let days = self.days()?;
        Some(Window {
            current_start: now - Duration::days(days),
            previous_start: now - Duration::days(2 * days),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub current_start: DateTime<Utc>,
    /// Previous window spans `[previous_start, current_start)`.
    pub previous_start: DateTime<Utc>,
}

/// Rounded percent change from `previous` to `current`; undefined when the
/// previous value is zero.
pub fn calc_change(current: i64, previous: i64) -> Option<i64> {
    if previous == 0 {
        return None;
    }
    Some(((current - previous) as f64 / previous as f64 * 100.0).round() as i64)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub trips: i64,
    pub users: i64,
    pub contact_requests: i64,
    pub revenue: i64,
    pub paid: i64,
    pub cashback: i64,
    pub avg_trip_value: i64,
    pub avg_response_minutes: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDelta {
    pub current: i64,
    pub previous: i64,
    pub percent_change: Option<i64>,
}

impl MetricDelta {
    fn new(current: i64, previous: i64) -> Self {
        Self {
            current,
            previous,
            percent_change: calc_change(current, previous),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub trips: MetricDelta,
    pub users: MetricDelta,
    pub contact_requests: MetricDelta,
    pub revenue: MetricDelta,
    pub paid: MetricDelta,
    pub cashback: MetricDelta,
    pub avg_trip_value: MetricDelta,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CountryCount {
    pub country: String,
    pub count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MonthCount {
    pub month: String,
    pub count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ManagerCount {
    pub manager: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStage {
    pub status: String,
    pub count: i64,
    pub revenue: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub overview: Overview,
    pub comparison: Option<Comparison>,
    pub trips_by_status: Vec<StatusCount>,
    pub trips_by_country: Vec<CountryCount>,
    pub trips_over_time: Vec<MonthCount>,
    pub user_growth: Vec<MonthCount>,
    pub recent_trips: Vec<Trip>,
    pub top_managers: Vec<ManagerCount>,
    pub conversion_funnel: Vec<FunnelStage>,
}

/// Raw counters and sums over one window. `None` bounds mean "unbounded".
struct Snapshot {
    trips: i64,
    users: i64,
    contact_requests: i64,
    revenue: i64,
    paid: i64,
    cashback: i64,
}

impl Snapshot {
    fn avg_trip_value(&self) -> i64 {
        if self.trips > 0 {
            self.revenue / self.trips
        } else {
            0
        }
    }
}

async fn count_in(
    pool: &PgPool,
    table: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<i64, ApiError> {
    // Table names come from a fixed internal set, never from input.
    let sql = format!(
        "SELECT COUNT(*) FROM {table} \
         WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
           AND ($2::timestamptz IS NULL OR created_at < $2)"
    );
    let n: i64 = sqlx::query_scalar(&sql)
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await?;
    Ok(n)
}

async fn snapshot(
    pool: &PgPool,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Snapshot, ApiError> {
    let trips = count_in(pool, "trips", from, to).await?;
    let users = count_in(pool, "users", from, to).await?;
    let contact_requests = count_in(pool, "contact_requests", from, to).await?;

    let (revenue, paid, cashback): (i64, i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(total_amount), 0)::BIGINT, \
                COALESCE(SUM(paid_amount), 0)::BIGINT, \
                COALESCE(SUM(cashback_amount), 0)::BIGINT \
         FROM trips \
         WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
           AND ($2::timestamptz IS NULL OR created_at < $2)",
    )
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;

    Ok(Snapshot {
        trips,
        users,
        contact_requests,
        revenue,
        paid,
        cashback,
    })
}

async fn avg_response_minutes(
    pool: &PgPool,
    from: Option<DateTime<Utc>>,
) -> Result<Option<f64>, ApiError> {
    let avg: Option<f64> = sqlx::query_scalar(
        "SELECT AVG(EXTRACT(EPOCH FROM (responded_at - created_at)) / 60.0)::FLOAT8 \
         FROM contact_requests \
         WHERE responded_at IS NOT NULL \
           AND ($1::timestamptz IS NULL OR created_at >= $1)",
    )
    .bind(from)
    .fetch_one(pool)
    .await?;
    Ok(avg)
}

/// Orders funnel rows by pipeline position, filling absent stages with
/// zeroes so every report shows all six.
pub fn fill_funnel(rows: Vec<FunnelStage>) -> Vec<FunnelStage> {
    let mut funnel: Vec<FunnelStage> = TripStatus::ALL
        .iter()
        .map(|st| FunnelStage {
            status: st.as_str().to_string(),
            count: 0,
            revenue: 0,
        })
        .collect();
    for row in rows {
        if let Some(st) = TripStatus::parse(&row.status) {
            funnel[st.ordinal()] = row;
        }
    }
    funnel
}

pub async fn report(pool: &PgPool, period: Period) -> Result<Report, ApiError> {
    let now = Utc::now();
    let window = period.window(now);
    let from = window.map(|w| w.current_start);

    let current = snapshot(pool, from, None).await?;
    let avg_response = avg_response_minutes(pool, from).await?;

    let comparison = match window {
        Some(w) => {
            let previous = snapshot(pool, Some(w.previous_start), Some(w.current_start)).await?;
            Some(Comparison {
                trips: MetricDelta::new(current.trips, previous.trips),
                users: MetricDelta::new(current.users, previous.users),
                contact_requests: MetricDelta::new(
                    current.contact_requests,
                    previous.contact_requests,
                ),
                revenue: MetricDelta::new(current.revenue, previous.revenue),
                paid: MetricDelta::new(current.paid, previous.paid),
                cashback: MetricDelta::new(current.cashback, previous.cashback),
                avg_trip_value: MetricDelta::new(
                    current.avg_trip_value(),
                    previous.avg_trip_value(),
                ),
            })
        }
        None => None,
    };

    let trips_by_status: Vec<StatusCount> = sqlx::query_as(
        "SELECT status, COUNT(*) AS count FROM trips \
         WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
         GROUP BY status ORDER BY count DESC",
    )
    .bind(from)
    .fetch_all(pool)
    .await?;

    let trips_by_country: Vec<CountryCount> = sqlx::query_as(
        "SELECT COALESCE(country, 'Unknown') AS country, COUNT(*) AS count FROM trips \
         WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
         GROUP BY 1 ORDER BY count DESC",
    )
    .bind(from)
    .fetch_all(pool)
    .await?;

    let trips_over_time: Vec<MonthCount> = sqlx::query_as(
        "SELECT to_char(date_trunc('month', created_at), 'YYYY-MM') AS month, \
                COUNT(*) AS count \
         FROM trips \
         WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
         GROUP BY 1 ORDER BY 1",
    )
    .bind(from)
    .fetch_all(pool)
    .await?;

    let user_growth: Vec<MonthCount> = sqlx::query_as(
        "SELECT to_char(date_trunc('month', created_at), 'YYYY-MM') AS month, \
                COUNT(*) AS count \
         FROM users \
         WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
         GROUP BY 1 ORDER BY 1",
    )
    .bind(from)
    .fetch_all(pool)
    .await?;

    let recent_trips: Vec<Trip> = sqlx::query_as(
        "SELECT id, number, status, owner_phone, manager_phone, manager_name, country, \
                total_amount, paid_amount, cashback_amount, cashback_processed, \
                created_at, updated_at \
         FROM trips \
         WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
         ORDER BY created_at DESC LIMIT 10",
    )
    .bind(from)
    .fetch_all(pool)
    .await?;

    let top_managers: Vec<ManagerCount> = sqlx::query_as(
        "SELECT manager_name AS manager, COUNT(*) AS count FROM trips \
         WHERE manager_name IS NOT NULL \
           AND ($1::timestamptz IS NULL OR created_at >= $1) \
         GROUP BY manager_name ORDER BY count DESC LIMIT 5",
    )
    .bind(from)
    .fetch_all(pool)
    .await?;

    let funnel_rows: Vec<FunnelStage> = sqlx::query_as(
        "SELECT status, COUNT(*) AS count, COALESCE(SUM(total_amount), 0)::BIGINT AS revenue \
         FROM trips \
         WHERE ($1::timestamptz IS NULL OR created_at >= $1) \
         GROUP BY status",
    )
    .bind(from)
    .fetch_all(pool)
    .await?;

    Ok(Report {
        overview: Overview {
            trips: current.trips,
            users: current.users,
            contact_requests: current.contact_requests,
            revenue: current.revenue,
            paid: current.paid,
            cashback: current.cashback,
            avg_trip_value: current.avg_trip_value(),
            avg_response_minutes: avg_response,
        },
        comparison,
        trips_by_status,
        trips_by_country,
        trips_over_time,
        user_growth,
        recent_trips,
        top_managers,
        conversion_funnel: fill_funnel(funnel_rows),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_change_basic() {
        assert_eq!(calc_change(120, 100), Some(20));
        assert_eq!(calc_change(80, 100), Some(-20));
        assert_eq!(calc_change(100, 100), Some(0));
    }

    #[test]
    fn percent_change_undefined_for_zero_previous() {
        assert_eq!(calc_change(50, 0), None);
        assert_eq!(calc_change(0, 0), None);
    }

    #[test]
    fn percent_change_rounds_to_nearest() {
        assert_eq!(calc_change(1, 3), Some(-67));
        assert_eq!(calc_change(4, 3), Some(33));
    }

    #[test]
    fn period_parse() {
        assert_eq!(Period::parse("7d"), Some(Period::D7));
        assert_eq!(Period::parse("30d"), Some(Period::D30));
        assert_eq!(Period::parse("90d"), Some(Period::D90));
        assert_eq!(Period::parse("12m"), Some(Period::M12));
        assert_eq!(Period::parse("all"), Some(Period::All));
        assert_eq!(Period::parse("1y"), None);
    }

    #[test]
    fn windows_have_equal_length() {
        let now = Utc::now();
        for p in [Period::D7, Period::D30, Period::D90, Period::M12] {
            let w = p.window(now).unwrap();
            let current_len = now - w.current_start;
            let previous_len = w.current_start - w.previous_start;
            assert_eq!(current_len, previous_len, "{:?}", p);
        }
    }

    #[test]
    fn all_period_has_no_window() {
        assert!(Period::All.window(Utc::now()).is_none());
    }

    #[test]
    fn funnel_fills_missing_stages_in_pipeline_order() {
        let rows = vec![FunnelStage {
            status: "Paid".into(),
            count: 3,
            revenue: 90000,
        }];
        let funnel = fill_funnel(rows);
        assert_eq!(funnel.len(), 6);
        assert_eq!(funnel[0].status, "In Booking");
        assert_eq!(funnel[0].count, 0);
        assert_eq!(funnel[2].status, "Paid");
        assert_eq!(funnel[2].count, 3);
        assert_eq!(funnel[2].revenue, 90000);
        assert_eq!(funnel[5].status, "Archived");
    }

    #[test]
    fn funnel_ignores_unknown_statuses() {
        let funnel = fill_funnel(vec![FunnelStage {
            status: "Cancelled".into(),
            count: 9,
            revenue: 1,
        }]);
        assert!(funnel.iter().all(|s| s.count == 0));
    }
}
