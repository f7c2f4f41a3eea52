//! API request handlers

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, warn};

use crate::api::auth::ApiToken;
use crate::api::extract::{ApiJson, ApiQuery};
use crate::api::metrics::Metrics;
use crate::config::Config;
use crate::delivery::{DeliveryFilter, FetchParams, SignalFeed};
use crate::ea::{EaStore, SyncRequest};
use crate::error::{Result, SignalError};
use crate::identity::{Credential, Identity, IdentityStore};
use crate::quota::{Allowance, Plan, QuotaLedger, QuotaSnapshot};
use crate::signals::{NewSignal, Signal, SignalStore};
use crate::trades::{NewTradeRecord, TradeRecord, TradeStore};

/// Shared application state
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub identities: IdentityStore,
    pub signals: SignalStore,
    pub trades: TradeStore,
    pub ea: EaStore,
    pub feed: SignalFeed,
    pub metrics: Metrics,
}

impl AppState {
    /// Wire every store onto one pool
    pub fn new(db: SqlitePool, config: Config) -> Self {
        let identities = IdentityStore::new(db.clone(), &config.auth.sender_username);
        let signals = SignalStore::new(db.clone());
        let filter = DeliveryFilter::new(db.clone(), QuotaLedger::new(db.clone()));
        let feed = SignalFeed::new(
            Arc::new(identities.clone()),
            Arc::new(signals.clone()),
            filter,
        );

        Self {
            trades: TradeStore::new(db.clone()),
            ea: EaStore::new(db.clone()),
            db,
            config,
            identities,
            signals,
            feed,
            metrics: Metrics::new(),
        }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        self.feed.ledger()
    }

    /// Resolve the caller's token to a usable identity
    pub async fn authenticate(&self, token: &ApiToken) -> Result<Identity> {
        self.feed
            .authenticate_at(&token.credential(), Utc::now())
            .await
            .map_err(|e| self.observe(e))
    }

    /// Count authentication failures on their way out
    pub fn observe(&self, err: SignalError) -> SignalError {
        if matches!(
            err,
            SignalError::MissingCredential | SignalError::AuthenticationFailed
        ) {
            self.metrics.inc_auth_failures();
        }
        err
    }
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(msg: &str) -> Self {
        Self {
            error: msg.to_string(),
        }
    }
}

impl IntoResponse for SignalError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            SignalError::MissingCredential => (StatusCode::UNAUTHORIZED, "missing_token"),
            SignalError::AuthenticationFailed => (StatusCode::UNAUTHORIZED, "invalid_token"),
            SignalError::Forbidden(code) => (StatusCode::FORBIDDEN, code.as_str()),
            SignalError::InvalidRequest(code) => (StatusCode::BAD_REQUEST, code.as_str()),
            SignalError::NotFound(what) => {
                warn!("Not found: {}", what);
                (StatusCode::NOT_FOUND, "not_found")
            }
            _ => {
                error!("Request failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        (status, Json(ApiError::new(code))).into_response()
    }
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_healthy = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if db_healthy { "healthy" } else { "unhealthy" },
            "service": "signal-rs",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now().timestamp(),
            "checks": {
                "database": if db_healthy { "ok" } else { "failed" },
            }
        })),
    )
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Publish a signal; only the configured sender may do this
pub async fn publish_signal(
    State(state): State<Arc<AppState>>,
    token: ApiToken,
    ApiJson(new): ApiJson<NewSignal>,
) -> Result<(StatusCode, Json<Signal>)> {
    let sender = state.authenticate(&token).await?;
    if sender.username != state.identities.sender_username() {
        warn!("Publish rejected for {}", sender.username);
        return Err(SignalError::Forbidden("forbidden".to_string()));
    }

    let signal = state.signals.publish(&sender, new).await?;
    state.metrics.inc_published();

    Ok((StatusCode::CREATED, Json(signal)))
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchQuery {
    pub limit: Option<u32>,
    pub max_age_minutes: Option<u32>,
}

/// Fetch response: delivered signals plus the caller's quota state
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub signals: Vec<Signal>,
    pub plan: Plan,
    pub daily_quota: Allowance,
    pub remaining: Allowance,
    pub used_today: u32,
    pub charged: u32,
}

/// Poll for new signals
pub async fn fetch_signals(
    State(state): State<Arc<AppState>>,
    token: ApiToken,
    ApiQuery(query): ApiQuery<FetchQuery>,
) -> Result<Response> {
    let delivery_config = &state.config.delivery;
    let params = FetchParams {
        limit: delivery_config.clamp_limit(query.limit),
        max_age: Duration::minutes(i64::from(delivery_config.clamp_max_age(query.max_age_minutes))),
    };

    let outcome = state
        .feed
        .fetch(&token.credential(), params)
        .await
        .map_err(|e| state.observe(e))?;

    let delivery = outcome.delivery;
    state.metrics.record_delivery(
        delivery.signals.len() as u64,
        u64::from(delivery.charged),
        u64::from(delivery.skipped),
    );

    let headers = quota_headers(&outcome.quota);
    let body = FetchResponse {
        signals: delivery.signals,
        plan: outcome.quota.plan,
        daily_quota: outcome.quota.daily_quota,
        remaining: outcome.quota.remaining,
        used_today: outcome.quota.used_today,
        charged: delivery.charged,
    };

    Ok((headers, Json(body)).into_response())
}

fn quota_headers(quota: &QuotaSnapshot) -> [(HeaderName, HeaderValue); 2] {
    // Allowance renders as digits or "unlimited", both valid header values
    let value = |a: Allowance| {
        HeaderValue::from_str(&a.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
    };
    [
        (HeaderName::from_static("x-quota-limit"), value(quota.daily_quota)),
        (HeaderName::from_static("x-quota-remaining"), value(quota.remaining)),
    ]
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub username: String,
    #[serde(flatten)]
    pub quota: QuotaSnapshot,
}

/// Current quota, without side effects
pub async fn get_quota(
    State(state): State<Arc<AppState>>,
    token: ApiToken,
) -> Result<Response> {
    let (identity, quota) = state
        .feed
        .quota_at(&token.credential(), Utc::now())
        .await
        .map_err(|e| state.observe(e))?;

    let headers = quota_headers(&quota);
    Ok((
        headers,
        Json(QuotaResponse {
            username: identity.username,
            quota,
        }),
    )
        .into_response())
}

/// Append to the caller's trade log
pub async fn post_trade(
    State(state): State<Arc<AppState>>,
    token: ApiToken,
    ApiJson(new): ApiJson<NewTradeRecord>,
) -> Result<Json<TradeRecord>> {
    let identity = state.authenticate(&token).await?;
    let record = state.trades.record(identity.id, new).await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub email: String,
    pub api_key: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ValidateResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_quota: Option<Allowance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<Allowance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// EA login check; a mismatch is `ok: false`, never an error
pub async fn validate(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<ValidateRequest>,
) -> Result<Json<ValidateResponse>> {
    let credential = Credential::EmailToken {
        email: request.email,
        token: request.api_key,
    };

    let identity = match state.identities.find_by_credential(&credential).await? {
        Some(identity) => identity,
        None => {
            state.metrics.inc_auth_failures();
            return Ok(Json(ValidateResponse::default()));
        }
    };

    let now = Utc::now();
    let quota = state.ledger().snapshot_at(&identity, now).await?;

    Ok(Json(ValidateResponse {
        ok: true,
        plan: Some(identity.plan),
        daily_quota: Some(quota.daily_quota),
        remaining: Some(quota.remaining),
        expires_at: identity.expires_at,
        is_active: Some(identity.is_usable_at(now)),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub updated: u32,
}

/// Replace the caller's open positions for one trading account
pub async fn ea_sync_open_positions(
    State(state): State<Arc<AppState>>,
    token: ApiToken,
    ApiJson(request): ApiJson<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let identity = state.authenticate(&token).await?;
    let updated = state.ea.sync(identity.id, &request).await?;
    Ok(Json(SyncResponse { updated }))
}
