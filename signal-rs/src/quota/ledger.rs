use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::types::{day_key, effective_quota, Allowance, Plan, QuotaSnapshot, ReferralBoost};
use crate::db::{parse_timestamp, timestamp};
use crate::error::{Result, SignalError};
use crate::identity::Identity;

/// Per-identity, per-UTC-day ledger of actionable signal charges.
///
/// Usage rows are keyed by `(identity_id, day)`, so a rotated credential keeps
/// the day's usage and plan changes apply to the same count immediately.
#[derive(Clone)]
pub struct QuotaLedger {
    db: SqlitePool,
}

impl QuotaLedger {
    /// Create a new ledger
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the usage and boost tables
    pub async fn init_db(db: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_usage (
                identity_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0,
                last_grant INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (identity_id, day)
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS referral_boosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_id INTEGER NOT NULL,
                boost_to TEXT NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL,
                is_revoked BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_boosts_identity ON referral_boosts(identity_id, end_at)",
        )
        .execute(db)
        .await?;

        Ok(())
    }

    /// Effective daily quota for `identity` at `now`
    pub async fn effective_quota_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<Allowance> {
        if identity.quota_override.is_some() {
            return Ok(effective_quota(identity.plan, identity.quota_override, None));
        }

        let boost = self.active_boost(identity.id, now).await?;
        Ok(effective_quota(
            identity.plan,
            None,
            boost.map(|b| b.boost_to),
        ))
    }

    /// Units charged to `identity_id` on the UTC day containing `now`
    pub async fn usage_at(&self, identity_id: i64, now: DateTime<Utc>) -> Result<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT consumed FROM daily_usage WHERE identity_id = ? AND day = ?",
        )
        .bind(identity_id)
        .bind(day_key(now))
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map_or(0, |(consumed,)| u32::try_from(consumed).unwrap_or(0)))
    }

    /// How many actionable signals may still be charged today
    pub async fn remaining_today(&self, identity: &Identity) -> Result<Allowance> {
        self.remaining_at(identity, Utc::now()).await
    }

    /// How many actionable signals may still be charged on the UTC day of `now`
    pub async fn remaining_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<Allowance> {
        Ok(self.snapshot_at(identity, now).await?.remaining)
    }

    /// Plan, quota, usage and remaining units for `identity` at `now`
    pub async fn snapshot_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<QuotaSnapshot> {
        let daily_quota = self.effective_quota_at(identity, now).await?;
        let used_today = self.usage_at(identity.id, now).await?;

        Ok(QuotaSnapshot {
            plan: identity.plan,
            daily_quota,
            used_today,
            remaining: daily_quota.minus(used_today),
        })
    }

    /// Reserve up to `n` units for today, returning how many were granted
    pub async fn try_consume(&self, identity: &Identity, n: u32) -> Result<u32> {
        self.try_consume_at(identity, n, Utc::now()).await
    }

    /// Reserve up to `n` units on the UTC day of `now`
    pub async fn try_consume_at(&self, identity: &Identity, n: u32, now: DateTime<Utc>) -> Result<u32> {
        let quota = self.effective_quota_at(identity, now).await?;

        let mut conn = self.db.acquire().await?;
        let granted = Self::consume_in(&mut conn, identity.id, quota, n, now).await?;

        debug!(
            "Quota: identity {} requested {} granted {} (quota {})",
            identity.id, n, granted, quota
        );
        Ok(granted)
    }

    /// Atomically charge up to `n` units against `quota` on `conn`.
    ///
    /// The grant is computed from the pre-update row inside a single
    /// `UPDATE`, so concurrent callers never exceed the quota together.
    pub(crate) async fn consume_in(
        conn: &mut SqliteConnection,
        identity_id: i64,
        quota: Allowance,
        n: u32,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }

        let day = day_key(now);
        let updated_at = timestamp(now);

        sqlx::query(
            r#"
            INSERT INTO daily_usage (identity_id, day, consumed, last_grant, updated_at)
            VALUES (?, ?, 0, 0, ?)
            ON CONFLICT(identity_id, day) DO NOTHING
            "#,
        )
        .bind(identity_id)
        .bind(&day)
        .bind(&updated_at)
        .execute(&mut *conn)
        .await?;

        match quota {
            Allowance::Unlimited => {
                sqlx::query(
                    r#"
                    UPDATE daily_usage
                    SET consumed = consumed + ?1, last_grant = ?1, updated_at = ?2
                    WHERE identity_id = ?3 AND day = ?4
                    "#,
                )
                .bind(i64::from(n))
                .bind(&updated_at)
                .bind(identity_id)
                .bind(&day)
                .execute(&mut *conn)
                .await?;

                Ok(n)
            }
            Allowance::Limited(cap) => {
                let granted: Option<(i64,)> = sqlx::query_as(
                    r#"
                    UPDATE daily_usage
                    SET last_grant = MIN(?1, ?2 - consumed),
                        consumed = consumed + MIN(?1, ?2 - consumed),
                        updated_at = ?3
                    WHERE identity_id = ?4 AND day = ?5 AND consumed < ?2
                    RETURNING last_grant
                    "#,
                )
                .bind(i64::from(n))
                .bind(i64::from(cap))
                .bind(&updated_at)
                .bind(identity_id)
                .bind(&day)
                .fetch_optional(&mut *conn)
                .await?;

                Ok(granted.map_or(0, |(g,)| u32::try_from(g).unwrap_or(0)))
            }
        }
    }

    /// Grant a temporary plan upgrade starting at `now`
    pub async fn grant_boost(
        &self,
        identity_id: i64,
        boost_to: Plan,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<ReferralBoost> {
        if boost_to == Plan::Free {
            return Err(SignalError::InvalidRequest("invalid_boost_plan".to_string()));
        }
        if days == 0 {
            return Err(SignalError::InvalidRequest("invalid_boost_days".to_string()));
        }

        let end_at = now + Duration::days(i64::from(days));

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO referral_boosts (identity_id, boost_to, start_at, end_at, is_revoked, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            RETURNING id
            "#,
        )
        .bind(identity_id)
        .bind(boost_to.as_str())
        .bind(timestamp(now))
        .bind(timestamp(end_at))
        .bind(timestamp(now))
        .fetch_one(&self.db)
        .await?;

        info!(
            "Boost granted: identity {} to {} for {} day(s)",
            identity_id, boost_to, days
        );

        Ok(ReferralBoost {
            id,
            identity_id,
            boost_to,
            start_at: now,
            end_at,
            is_revoked: false,
        })
    }

    /// Revoke a boost by ID
    pub async fn revoke_boost(&self, boost_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE referral_boosts SET is_revoked = 1 WHERE id = ?")
            .bind(boost_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SignalError::NotFound(format!("boost {}", boost_id)));
        }
        Ok(())
    }

    /// Highest active boost for an identity; the latest-ending one wins ties
    pub async fn active_boost(&self, identity_id: i64, now: DateTime<Utc>) -> Result<Option<ReferralBoost>> {
        let now_ts = timestamp(now);
        let rows = sqlx::query_as::<_, (i64, String, String, String, bool)>(
            r#"
            SELECT id, boost_to, start_at, end_at, is_revoked
            FROM referral_boosts
            WHERE identity_id = ? AND is_revoked = 0 AND start_at <= ? AND end_at > ?
            "#,
        )
        .bind(identity_id)
        .bind(&now_ts)
        .bind(&now_ts)
        .fetch_all(&self.db)
        .await?;

        let mut best: Option<ReferralBoost> = None;
        for (id, boost_to, start_at, end_at, is_revoked) in rows {
            let boost = ReferralBoost {
                id,
                identity_id,
                boost_to: Plan::from_db_string(&boost_to),
                start_at: parse_timestamp(&start_at)?,
                end_at: parse_timestamp(&end_at)?,
                is_revoked,
            };

            let better = match &best {
                None => true,
                Some(current) => {
                    (plan_rank(boost.boost_to), boost.end_at)
                        > (plan_rank(current.boost_to), current.end_at)
                }
            };
            if better {
                best = Some(boost);
            }
        }

        Ok(best)
    }
}

fn plan_rank(plan: Plan) -> u8 {
    match plan {
        Plan::Free => 0,
        Plan::Silver => 1,
        Plan::Gold => 2,
    }
}
