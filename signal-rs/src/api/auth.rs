//! Token authentication for the REST API

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

use crate::api::handlers::{ApiError, AppState};
use crate::error::SignalError;
use crate::identity::Credential;
use crate::security::tokens_match;

const API_KEY_HEADER: &str = "x-api-key";

/// Raw API token presented by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiToken(pub String);

impl ApiToken {
    pub fn credential(&self) -> Credential {
        Credential::Bearer(self.0.clone())
    }
}

/// Token from `Authorization: Bearer`, falling back to `X-API-Key`
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| {
            let (scheme, token) = h.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|t| !t.is_empty());

    let token = bearer.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    });

    token.map(str::to_string)
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for ApiToken {
    type Rejection = SignalError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match extract_token(&parts.headers) {
            Some(token) => Ok(ApiToken(token)),
            None => Err(state.observe(SignalError::MissingCredential)),
        }
    }
}

/// Admin middleware - checks the configured admin token
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let admin_token = &state.config.auth.admin_token;
    if admin_token.is_empty() {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiError::new("admin_disabled")),
        )
            .into_response();
    }

    match extract_token(req.headers()) {
        Some(token) if tokens_match(&token, admin_token) => next.run(req).await,
        _ => {
            warn!("Admin request rejected");
            state.metrics.inc_auth_failures();
            (StatusCode::FORBIDDEN, Json(ApiError::new("forbidden"))).into_response()
        }
    }
}
