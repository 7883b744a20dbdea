//! Request-scoped identity and privilege gating, plus the fixed-window rate
//! limiter guarding the analytics endpoint.
//!
//! Session mechanics live outside this core; the upstream proxy resolves the
//! session and forwards the caller's phone in `x-auth-phone`. The explicit
//! `AuthContext` replaces any ambient session lookup.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Duration, Utc};

use crate::error::{ApiError, ApiErrorWithMeta, E_DB_FAILURE};
use crate::responses::{RequestMeta, new_meta};
use crate::types::AppState;

pub const AUTH_PHONE_HEADER: &str = "x-auth-phone";

/// Privilege tier granting manager operations (trip pipeline, redemption).
pub const MANAGER_PRIVILEGE_LEVEL: i32 = 2;

/// The authenticated caller for one request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub phone: String,
    pub name: String,
    pub privilege_level: i32,
}

impl AuthContext {
    pub fn require_manager(&self) -> Result<(), ApiError> {
        if self.privilege_level >= MANAGER_PRIVILEGE_LEVEL {
            Ok(())
        } else {
            Err(ApiError::Forbidden("manager privilege required".into()))
        }
    }

    pub fn require_admin(&self, threshold: i32) -> Result<(), ApiError> {
        if self.privilege_level >= threshold {
            Ok(())
        } else {
            Err(ApiError::Forbidden("admin privilege required".into()))
        }
    }
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let meta = parts
            .extensions
            .get::<RequestMeta>()
            .cloned()
            .unwrap_or_else(new_meta);

        let phone = parts
            .headers
            .get(AUTH_PHONE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::Unauthorized("authentication required".into()).with_meta(meta.clone())
            })?;

        let row: Option<(String, i32)> =
            sqlx::query_as("SELECT name, privilege_level FROM users WHERE phone = $1")
                .bind(&phone)
                .fetch_optional(&state.pool)
                .await
                .map_err(|e| {
                    ApiError::Internal(e.into())
                        .with_meta(meta.clone())
                        .with_code(E_DB_FAILURE)
                })?;

        let (name, privilege_level) =
            row.ok_or_else(|| ApiError::Unauthorized("unknown identity".into()).with_meta(meta))?;

        Ok(AuthContext {
            phone,
            name,
            privilege_level,
        })
    }
}

struct Slot {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Fixed-window request limiter, keyed by caller identity.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    hits: Mutex<HashMap<String, Slot>>,
}

impl RateLimiter {
    pub fn new(max: u32, window_secs: i64) -> Self {
        Self {
            max,
            window: Duration::seconds(window_secs),
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records a hit for `key`. On excess, returns the seconds until the
    /// window resets, for the `Retry-After` header.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> Result<(), u64> {
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let slot = hits.entry(key.to_string()).or_insert(Slot {
            started_at: now,
            count: 0,
        });

        if now - slot.started_at >= self.window {
            slot.started_at = now;
            slot.count = 0;
        }

        if slot.count < self.max {
            slot.count += 1;
            Ok(())
        } else {
            let retry = (slot.started_at + self.window - now).num_seconds().max(1);
            Err(retry as u64)
        }
    }
}
