use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::filter::{Delivery, DeliveryFilter};
use crate::error::{Result, SignalError};
use crate::identity::{Credential, Identity, IdentityResolver};
use crate::quota::{QuotaLedger, QuotaSnapshot};
use crate::signals::{CandidateSource, FetchWindow};

/// Upper bound on candidates scanned per fetch
const MAX_CANDIDATES: u32 = 1000;

/// Parameters of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchParams {
    pub limit: u32,
    pub max_age: Duration,
}

/// Everything a poll returns to the receiver
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub identity: Identity,
    pub delivery: Delivery,
    /// Quota state after this poll's charges
    pub quota: QuotaSnapshot,
}

/// Credential in, delivered signals and quota out
#[derive(Clone)]
pub struct SignalFeed {
    resolver: Arc<dyn IdentityResolver>,
    source: Arc<dyn CandidateSource>,
    filter: DeliveryFilter,
}

impl SignalFeed {
    pub fn new(
        resolver: Arc<dyn IdentityResolver>,
        source: Arc<dyn CandidateSource>,
        filter: DeliveryFilter,
    ) -> Self {
        Self {
            resolver,
            source,
            filter,
        }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        self.filter.ledger()
    }

    /// Resolve a credential or fail with `AuthenticationFailed`
    pub async fn authenticate_at(&self, credential: &Credential, now: DateTime<Utc>) -> Result<Identity> {
        match self.resolver.resolve(credential, now).await? {
            Some(identity) => Ok(identity),
            None => {
                warn!("Authentication failed for presented credential");
                Err(SignalError::AuthenticationFailed)
            }
        }
    }

    /// Poll for signals now
    pub async fn fetch(&self, credential: &Credential, params: FetchParams) -> Result<FetchOutcome> {
        self.fetch_at(credential, params, Utc::now()).await
    }

    /// Poll for signals at `now`.
    ///
    /// Authentication happens before any candidate lookup, so a rejected
    /// credential leaves no trace in the ledger or the delivery records.
    pub async fn fetch_at(
        &self,
        credential: &Credential,
        params: FetchParams,
        now: DateTime<Utc>,
    ) -> Result<FetchOutcome> {
        let identity = self.authenticate_at(credential, now).await?;

        let window = FetchWindow {
            since: now - params.max_age,
            max_candidates: MAX_CANDIDATES.max(params.limit),
        };
        let candidates = self.source.candidates(&identity, &window).await?;
        let delivery = self
            .filter
            .deliver_at(&identity, &candidates, params.limit, now)
            .await?;
        let quota = self.ledger().snapshot_at(&identity, now).await?;

        info!(
            "Fetch by {}: {} of {} candidate(s) delivered, {} charged, {} skipped, remaining {}",
            identity.username,
            delivery.signals.len(),
            candidates.len(),
            delivery.charged,
            delivery.skipped,
            quota.remaining
        );

        Ok(FetchOutcome {
            identity,
            delivery,
            quota,
        })
    }

    /// Quota snapshot for a credential, without side effects
    pub async fn quota_at(&self, credential: &Credential, now: DateTime<Utc>) -> Result<(Identity, QuotaSnapshot)> {
        let identity = self.authenticate_at(credential, now).await?;
        let quota = self.ledger().snapshot_at(&identity, now).await?;
        Ok((identity, quota))
    }
}
