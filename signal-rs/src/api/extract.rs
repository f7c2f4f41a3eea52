//! Request extractors whose rejections use the API error body

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query};
use axum::Json;
use tracing::debug;

use crate::error::SignalError;

/// JSON body; a malformed or mistyped body is 400 `invalid_json`
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(SignalError))]
pub struct ApiJson<T>(pub T);

/// Query string; a malformed one is 400 `invalid_query`
#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(SignalError))]
pub struct ApiQuery<T>(pub T);

impl From<JsonRejection> for SignalError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected body: {}", rejection.body_text());
        SignalError::InvalidRequest("invalid_json".to_string())
    }
}

impl From<QueryRejection> for SignalError {
    fn from(rejection: QueryRejection) -> Self {
        debug!("Rejected query: {}", rejection.body_text());
        SignalError::InvalidRequest("invalid_query".to_string())
    }
}
