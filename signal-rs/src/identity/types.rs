use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::quota::{Allowance, Plan};

/// A resolved account behind a credential
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub plan: Plan,
    /// `None` falls back to the plan default
    pub quota_override: Option<Allowance>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Active and not past its expiry at `now`
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Transport-level credential presented by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// `Authorization: Bearer` or `X-API-Key`
    Bearer(String),
    /// EA login pair
    EmailToken { email: String, token: String },
}

/// Create or update a receiver
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub username: String,
    pub email: Option<String>,
    pub plan: Plan,
    pub quota_override: Option<Allowance>,
    pub months_valid: Option<u32>,
}

impl IssueRequest {
    pub fn new(username: &str, plan: Plan) -> Self {
        Self {
            username: username.to_string(),
            email: None,
            plan,
            quota_override: None,
            months_valid: None,
        }
    }
}

/// Identity together with its freshly issued plaintext token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub identity: Identity,
    pub token: String,
}

/// Normalize a username for storage and lookup
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}
