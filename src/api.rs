use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::analytics::{self, Period};
use crate::auth::AuthContext;
use crate::error::{ApiError, ApiErrorWithMeta, E_DB_FAILURE};
use crate::ledger;
use crate::promo::{self, Redemption};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::trips::{self, NewTrip};
use crate::types::{AppState, ContactRequest, PromoCode, Trip, TripStatus, User};
use crate::users;

const CONTACT_STATUSES: [&str; 4] = ["new", "in_progress", "completed", "dismissed"];

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/users", post(register_user_handler))
        .route(
            "/promo-codes",
            get(list_promo_codes_handler).post(issue_promo_code_handler),
        )
        .route("/promo-codes/redeem", post(redeem_promo_code_handler))
        .route("/trips", post(create_trip_handler))
        .route("/trips/{id}", put(update_trip_handler))
        .route("/referrals/qualify", post(qualify_referral_handler))
        .route("/contact-requests", post(create_contact_request_handler))
        .route(
            "/contact-requests/{id}",
            put(update_contact_request_handler),
        )
        .route("/analytics", get(analytics_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

/// E.164-like: leading `+`, then 7 to 15 digits.
fn valid_phone(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('+') else {
        return false;
    };
    (7..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Registration: creates the account and credits the welcome bonus.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    pub phone: String,
    pub name: String,
}

async fn register_user_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    if !valid_phone(&req.phone) {
        return Err(
            ApiError::BadRequest("phone must be E.164, e.g. +15550001111".into())
                .with_meta(meta),
        );
    }
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()).with_meta(meta));
    }

    let user = users::register(
        &st.pool,
        st.config.welcome_bonus,
        &req.phone,
        req.name.trim(),
    )
    .await
    .map_err(|e| e.with_meta(meta.clone()))?;

    Ok(ApiOk::created("user registered", user, meta))
}

async fn list_promo_codes_handler(
    State(st): State<AppState>,
    ctx: AuthContext,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<PromoCode>>, ApiErrorWithMeta> {
    let codes = promo::list_for_user(&st.pool, &ctx.phone)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("promo codes fetched", codes, meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePromoRequest {
    pub amount: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePromoResponse {
    pub code: String,
    pub amount: i64,
    pub expires_at: DateTime<Utc>,
}

async fn issue_promo_code_handler(
    State(st): State<AppState>,
    ctx: AuthContext,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<IssuePromoRequest>,
) -> Result<ApiOk<IssuePromoResponse>, ApiErrorWithMeta> {
    let code = promo::issue(&st.pool, &st.config, &ctx.phone, req.amount)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::created(
        "promo code issued",
        IssuePromoResponse {
            code: code.code,
            amount: code.amount,
            expires_at: code.expires_at,
        },
        meta,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemPromoRequest {
    pub code: String,
}

async fn redeem_promo_code_handler(
    State(st): State<AppState>,
    ctx: AuthContext,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<RedeemPromoRequest>,
) -> Result<ApiOk<Redemption>, ApiErrorWithMeta> {
    ctx.require_manager()
        .map_err(|e| e.with_meta(meta.clone()))?;
    let redemption = promo::redeem(&st.pool, &req.code)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;
    Ok(ApiOk::ok("promo code redeemed", redemption, meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripRequest {
    pub number: String,
    pub owner_phone: String,
    pub country: Option<String>,
    pub total_amount: i64,
    #[serde(default)]
    pub paid_amount: i64,
    /// Pre-computed cashback, e.g. with an activity bonus.
    #[serde(default)]
    pub cashback_amount: i64,
}

async fn create_trip_handler(
    State(st): State<AppState>,
    ctx: AuthContext,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateTripRequest>,
) -> Result<ApiOk<Trip>, ApiErrorWithMeta> {
    ctx.require_manager()
        .map_err(|e| e.with_meta(meta.clone()))?;
    if !valid_phone(&req.owner_phone) {
        return Err(ApiError::BadRequest("ownerPhone must be E.164".into()).with_meta(meta));
    }

    let trip = trips::create_trip(
        &st.pool,
        NewTrip {
            number: req.number,
            owner_phone: req.owner_phone,
            manager_phone: Some(ctx.phone),
            manager_name: Some(ctx.name),
            country: req.country,
            total_amount: req.total_amount,
            paid_amount: req.paid_amount,
            cashback_amount: req.cashback_amount,
        },
    )
    .await
    .map_err(|e| e.with_meta(meta.clone()))?;

    Ok(ApiOk::created("trip created", trip, meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTripRequest {
    pub status: String,
}

async fn update_trip_handler(
    State(st): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdateTripRequest>,
) -> Result<ApiOk<Trip>, ApiErrorWithMeta> {
    ctx.require_manager()
        .map_err(|e| e.with_meta(meta.clone()))?;

    let status = TripStatus::parse(&req.status).ok_or_else(|| {
        ApiError::BadRequest(format!("unknown trip status: {}", req.status))
            .with_meta(meta.clone())
    })?;

    let trip = trips::set_status(&st.pool, st.config.cashback_base_rate, id, status)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;

    Ok(ApiOk::ok("trip updated", trip, meta))
}

/// Integration seam: the business policy deciding when a referral qualifies
/// lives outside this core and calls in here.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifyReferralRequest {
    pub referrer_phone: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifyReferralResponse {
    pub referrer_phone: String,
    pub amount: i64,
}

async fn qualify_referral_handler(
    State(st): State<AppState>,
    ctx: AuthContext,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<QualifyReferralRequest>,
) -> Result<ApiOk<QualifyReferralResponse>, ApiErrorWithMeta> {
    ctx.require_manager()
        .map_err(|e| e.with_meta(meta.clone()))?;

    let amount = st.config.referral_bonus;
    ledger::credit_referral_bonus(&st.pool, &req.referrer_phone, amount)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;

    Ok(ApiOk::ok(
        "referral bonus credited",
        QualifyReferralResponse {
            referrer_phone: req.referrer_phone,
            amount,
        },
        meta,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContactRequest {
    pub source: String,
}

async fn create_contact_request_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateContactRequest>,
) -> Result<ApiOk<ContactRequest>, ApiErrorWithMeta> {
    if req.source.trim().is_empty() {
        return Err(ApiError::BadRequest("source must not be empty".into()).with_meta(meta));
    }

    let id = Uuid::new_v4();
    let request: ContactRequest = sqlx::query_as(
        "INSERT INTO contact_requests (id, source, status, created_at) \
         VALUES ($1, $2, 'new', now()) \
         RETURNING id, source, status, created_at, responded_at",
    )
    .bind(id)
    .bind(req.source.trim())
    .fetch_one(&st.pool)
    .await
    .map_err(|e| ApiError::from(e).with_meta(meta.clone()).with_code(E_DB_FAILURE))?;

    Ok(ApiOk::created("contact request received", request, meta))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactRequest {
    pub status: String,
}

async fn update_contact_request_handler(
    State(st): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<UpdateContactRequest>,
) -> Result<ApiOk<ContactRequest>, ApiErrorWithMeta> {
    ctx.require_manager()
        .map_err(|e| e.with_meta(meta.clone()))?;

    if !CONTACT_STATUSES.contains(&req.status.as_str()) {
        return Err(
            ApiError::BadRequest(format!("unknown contact status: {}", req.status))
                .with_meta(meta),
        );
    }

    // First move away from `new` stamps the response time.
    let request: Option<ContactRequest> = sqlx::query_as(
        "UPDATE contact_requests \
         SET status = $2, \
             responded_at = CASE WHEN $2 = 'new' THEN responded_at \
                                 ELSE COALESCE(responded_at, now()) END \
         WHERE id = $1 \
         RETURNING id, source, status, created_at, responded_at",
    )
    .bind(id)
    .bind(&req.status)
    .fetch_optional(&st.pool)
    .await
    .map_err(|e| ApiError::from(e).with_meta(meta.clone()).with_code(E_DB_FAILURE))?;

    let request = request.ok_or_else(|| {
        ApiError::NotFound(format!("contact request {} not found", id)).with_meta(meta.clone())
    })?;

    Ok(ApiOk::ok("contact request updated", request, meta))
}

#[derive(Deserialize)]
pub struct AnalyticsParams {
    pub period: Option<String>,
}

async fn analytics_handler(
    State(st): State<AppState>,
    ctx: AuthContext,
    Query(params): Query<AnalyticsParams>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<analytics::Report>, ApiErrorWithMeta> {
    ctx.require_admin(st.config.admin_privilege_level)
        .map_err(|e| e.with_meta(meta.clone()))?;

    if let Err(retry_after_secs) = st.limiter.check(&ctx.phone, Utc::now()) {
        return Err(ApiError::RateLimited { retry_after_secs }.with_meta(meta));
    }

    let period = params.period.as_deref().unwrap_or("30d");
    let period = Period::parse(period).ok_or_else(|| {
        ApiError::BadRequest(format!("unknown period: {}", period)).with_meta(meta.clone())
    })?;

    let report = analytics::report(&st.pool, period)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;

    Ok(ApiOk::ok("analytics report", report, meta))
}
