use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

use crate::db::timestamp;
use crate::error::Result;
use crate::identity::Identity;
use crate::quota::types::day_key;
use crate::quota::{Allowance, QuotaLedger};
use crate::signals::Signal;

/// Result of one delivery pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delivery {
    /// Delivered signals, in candidate order
    pub signals: Vec<Signal>,
    /// Signals recorded as delivered for the first time by this pass
    pub first_time: u32,
    /// Quota units charged by this pass
    pub charged: u32,
    /// Actionable signals left undelivered for lack of quota
    pub skipped: u32,
}

enum FirstDelivery {
    Charged,
    AlreadyDelivered,
    Exhausted,
}

/// Decides which candidates a receiver gets and records each delivery once.
///
/// An actionable signal skipped for lack of quota gets no delivery record,
/// so a later poll may still deliver it while it remains a candidate.
#[derive(Clone)]
pub struct DeliveryFilter {
    db: SqlitePool,
    ledger: QuotaLedger,
}

impl DeliveryFilter {
    pub fn new(db: SqlitePool, ledger: QuotaLedger) -> Self {
        Self { db, ledger }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Initialize the deliveries table
    pub async fn init_db(db: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deliveries (
                identity_id INTEGER NOT NULL,
                signal_id INTEGER NOT NULL,
                delivered_at TEXT NOT NULL,
                delivery_day TEXT NOT NULL,
                charged BOOLEAN NOT NULL DEFAULT 0,
                PRIMARY KEY (identity_id, signal_id)
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_deliveries_day ON deliveries(identity_id, delivery_day)",
        )
        .execute(db)
        .await?;

        Ok(())
    }

    /// Deliver `candidates` to `identity`, producing at most `limit` signals
    pub async fn deliver(&self, identity: &Identity, candidates: &[Signal], limit: u32) -> Result<Delivery> {
        self.deliver_at(identity, candidates, limit, Utc::now()).await
    }

    /// Deliver `candidates` to `identity` at `now`.
    ///
    /// Walks the candidates in order:
    /// - already delivered: included, never charged again
    /// - non-actionable: included and recorded, never charged
    /// - actionable: included only if one quota unit is granted
    ///
    /// Scanning stops once `limit` signals have been produced.
    pub async fn deliver_at(
        &self,
        identity: &Identity,
        candidates: &[Signal],
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Delivery> {
        let mut delivery = Delivery::default();
        if limit == 0 || candidates.is_empty() {
            return Ok(delivery);
        }

        let ids: Vec<i64> = candidates.iter().map(|s| s.id).collect();
        let seen = self.delivered_ids(identity.id, &ids).await?;
        let quota = self.ledger.effective_quota_at(identity, now).await?;
        let mut exhausted = false;

        for signal in candidates {
            if delivery.signals.len() >= limit as usize {
                break;
            }

            if seen.contains(&signal.id) {
                delivery.signals.push(signal.clone());
                continue;
            }

            if !signal.is_actionable() {
                if self.record_uncharged(identity.id, signal.id, now).await? {
                    delivery.first_time += 1;
                }
                delivery.signals.push(signal.clone());
                continue;
            }

            if exhausted {
                // A concurrent poll may have delivered it since `seen` was read
                if self.is_delivered(identity.id, signal.id).await? {
                    delivery.signals.push(signal.clone());
                } else {
                    delivery.skipped += 1;
                }
                continue;
            }

            match self.record_charged(identity.id, signal.id, quota, now).await? {
                FirstDelivery::Charged => {
                    delivery.first_time += 1;
                    delivery.charged += 1;
                    delivery.signals.push(signal.clone());
                }
                FirstDelivery::AlreadyDelivered => {
                    delivery.signals.push(signal.clone());
                }
                FirstDelivery::Exhausted => {
                    exhausted = true;
                    delivery.skipped += 1;
                }
            }
        }

        debug!(
            "Delivery for {}: {} signal(s), {} new, {} charged, {} skipped",
            identity.username,
            delivery.signals.len(),
            delivery.first_time,
            delivery.charged,
            delivery.skipped
        );

        Ok(delivery)
    }

    /// IDs among `signal_ids` already delivered to `identity_id`
    pub async fn delivered_ids(&self, identity_id: i64, signal_ids: &[i64]) -> Result<HashSet<i64>> {
        if signal_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT signal_id FROM deliveries WHERE identity_id = ",
        );
        query.push_bind(identity_id);
        query.push(" AND signal_id IN (");
        let mut separated = query.separated(", ");
        for id in signal_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows: Vec<(i64,)> = query.build_query_as().fetch_all(&self.db).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn is_delivered(&self, identity_id: i64, signal_id: i64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM deliveries WHERE identity_id = ? AND signal_id = ?",
        )
        .bind(identity_id)
        .bind(signal_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.is_some())
    }

    /// Record a non-actionable delivery; false if it already existed
    async fn record_uncharged(&self, identity_id: i64, signal_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO deliveries (identity_id, signal_id, delivered_at, delivery_day, charged)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(identity_id, signal_id) DO NOTHING
            "#,
        )
        .bind(identity_id)
        .bind(signal_id)
        .bind(timestamp(now))
        .bind(day_key(now))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a first actionable delivery and charge it, in one transaction.
    ///
    /// The record insert comes first so a concurrent poll that already
    /// delivered the signal turns this into a no-op without a charge.
    async fn record_charged(
        &self,
        identity_id: i64,
        signal_id: i64,
        quota: Allowance,
        now: DateTime<Utc>,
    ) -> Result<FirstDelivery> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO deliveries (identity_id, signal_id, delivered_at, delivery_day, charged)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT(identity_id, signal_id) DO NOTHING
            "#,
        )
        .bind(identity_id)
        .bind(signal_id)
        .bind(timestamp(now))
        .bind(day_key(now))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            tx.rollback().await?;
            return Ok(FirstDelivery::AlreadyDelivered);
        }

        let granted = QuotaLedger::consume_in(&mut *tx, identity_id, quota, 1, now).await?;
        if granted == 0 {
            tx.rollback().await?;
            return Ok(FirstDelivery::Exhausted);
        }

        tx.commit().await?;
        Ok(FirstDelivery::Charged)
    }
}
