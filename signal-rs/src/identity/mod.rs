/// Receivers, the sender, and credential resolution
///
/// This module provides:
/// - Identity and credential types
/// - Token issuance and rotation
/// - The follow relation between receivers and senders

pub mod store;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use store::IdentityStore;
pub use types::{normalize_username, Credential, Identity, IssueRequest, IssuedToken};

/// Resolve a transport-level credential to an identity.
///
/// Implementations never mutate identity records and return `None` for
/// unknown, inactive or expired identities.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &Credential, now: DateTime<Utc>) -> Result<Option<Identity>>;
}
