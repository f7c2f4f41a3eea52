//! Admin API handlers
//!
//! Token issuance, user listing, follows and referral boosts

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::extract::ApiJson;
use super::handlers::AppState;
use crate::error::{Result, SignalError};
use crate::identity::{Identity, IssueRequest};
use crate::quota::{Allowance, Plan, ReferralBoost};

/// Create or update a receiver
#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub plan: String,
    /// Absent or null falls back to the plan default
    #[serde(default)]
    pub daily_quota: Option<Allowance>,
    #[serde(default)]
    pub months_valid: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    pub username: String,
    pub email: Option<String>,
    pub plan: Plan,
    pub token: String,
    pub quota_override: Option<Allowance>,
    pub daily_quota: Allowance,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// User listing entry
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub plan: Plan,
    pub quota_override: Option<Allowance>,
    pub daily_quota: Allowance,
    pub used_today: u32,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct FollowRequest {
    pub follower: String,
    pub sender: String,
}

#[derive(Debug, Deserialize)]
pub struct BoostRequest {
    pub username: String,
    pub boost_to: String,
    pub days: u32,
}

fn parse_plan(plan: &str) -> Result<Plan> {
    Plan::parse(plan).ok_or_else(|| SignalError::InvalidRequest("unknown_plan".to_string()))
}

/// Issue or rotate a receiver token
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<IssueTokenRequest>,
) -> Result<Json<IssueTokenResponse>> {
    let plan = parse_plan(&request.plan)?;

    let issued = state
        .identities
        .issue_or_update(IssueRequest {
            username: request.username,
            email: request.email,
            plan,
            quota_override: request.daily_quota,
            months_valid: request.months_valid,
        })
        .await?;

    let identity = issued.identity;
    let daily_quota = state.ledger().effective_quota_at(&identity, Utc::now()).await?;

    Ok(Json(IssueTokenResponse {
        username: identity.username,
        email: identity.email,
        plan: identity.plan,
        token: issued.token,
        quota_override: identity.quota_override,
        daily_quota,
        expires_at: identity.expires_at,
        is_active: identity.is_active,
    }))
}

/// List every identity with today's usage
pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<UserResponse>>> {
    info!("Admin: Listing users");

    let now = Utc::now();
    let mut users = Vec::new();
    for identity in state.identities.list().await? {
        let quota = state.ledger().snapshot_at(&identity, now).await?;
        users.push(user_response(identity, quota.daily_quota, quota.used_today));
    }

    Ok(Json(users))
}

fn user_response(identity: Identity, daily_quota: Allowance, used_today: u32) -> UserResponse {
    UserResponse {
        id: identity.id,
        username: identity.username,
        email: identity.email,
        plan: identity.plan,
        quota_override: identity.quota_override,
        daily_quota,
        used_today,
        is_active: identity.is_active,
        expires_at: identity.expires_at,
        created_at: identity.created_at,
    }
}

/// Subscribe a receiver to a sender
pub async fn add_follow(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<FollowRequest>,
) -> Result<Json<serde_json::Value>> {
    let follower = state.identities.require_username(&request.follower).await?;
    let sender = state.identities.require_username(&request.sender).await?;

    state.identities.follow(follower.id, sender.id).await?;
    info!("Admin: {} now follows {}", follower.username, sender.username);

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Remove a subscription
pub async fn remove_follow(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<FollowRequest>,
) -> Result<Json<serde_json::Value>> {
    let follower = state.identities.require_username(&request.follower).await?;
    let sender = state.identities.require_username(&request.sender).await?;

    state.identities.unfollow(follower.id, sender.id).await?;
    info!("Admin: {} no longer follows {}", follower.username, sender.username);

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Grant a temporary plan upgrade
pub async fn grant_boost(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<BoostRequest>,
) -> Result<Json<ReferralBoost>> {
    let boost_to = parse_plan(&request.boost_to)?;
    let identity = state.identities.require_username(&request.username).await?;

    let boost = state
        .ledger()
        .grant_boost(identity.id, boost_to, request.days, Utc::now())
        .await?;

    Ok(Json(boost))
}
