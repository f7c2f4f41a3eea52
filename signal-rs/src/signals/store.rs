use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::info;

use super::types::{FetchWindow, NewSignal, Signal, SignalAction};
use super::CandidateSource;
use crate::db::{parse_timestamp, timestamp};
use crate::error::{Result, SignalError};
use crate::identity::Identity;

#[derive(sqlx::FromRow)]
struct SignalRow {
    id: i64,
    sender_id: i64,
    symbol: String,
    action: String,
    sl_pips: f64,
    tp_pips: f64,
    lot_size: f64,
    details: Option<String>,
    created_at: String,
}

impl SignalRow {
    fn into_signal(self) -> Result<Signal> {
        let action = SignalAction::parse(&self.action).ok_or_else(|| {
            SignalError::Database(sqlx::Error::Decode(
                format!("unknown signal action {:?}", self.action).into(),
            ))
        })?;

        let details = match self.details {
            Some(raw) => Some(serde_json::from_str::<Map<String, Value>>(&raw)?),
            None => None,
        };

        Ok(Signal {
            id: self.id,
            sender_id: self.sender_id,
            symbol: self.symbol,
            action,
            sl_pips: self.sl_pips,
            tp_pips: self.tp_pips,
            lot_size: self.lot_size,
            details,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Append-only signal history
#[derive(Clone)]
pub struct SignalStore {
    db: SqlitePool,
}

impl SignalStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the signals table
    pub async fn init_db(db: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                sl_pips REAL NOT NULL,
                tp_pips REAL NOT NULL,
                lot_size REAL NOT NULL,
                details TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_signals_sender_created ON signals(sender_id, created_at)",
        )
        .execute(db)
        .await?;

        Ok(())
    }

    /// Publish a signal authored by `sender`
    pub async fn publish(&self, sender: &Identity, new: NewSignal) -> Result<Signal> {
        self.publish_at(sender, new, Utc::now()).await
    }

    /// Publish a signal with an explicit creation time
    pub async fn publish_at(&self, sender: &Identity, new: NewSignal, now: DateTime<Utc>) -> Result<Signal> {
        let (symbol, action) = new.validate()?;
        let details = new
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO signals (sender_id, symbol, action, sl_pips, tp_pips, lot_size, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(sender.id)
        .bind(&symbol)
        .bind(action.as_str())
        .bind(new.sl_pips)
        .bind(new.tp_pips)
        .bind(new.lot_size)
        .bind(&details)
        .bind(timestamp(now))
        .fetch_one(&self.db)
        .await?;

        info!(
            "Signal published: #{} {} {} by {}",
            id, action, symbol, sender.username
        );

        Ok(Signal {
            id,
            sender_id: sender.id,
            symbol,
            action,
            sl_pips: new.sl_pips,
            tp_pips: new.tp_pips,
            lot_size: new.lot_size,
            details: new.details,
            created_at: now,
        })
    }

    /// Signals from senders `follower_id` follows, oldest first
    pub async fn candidates_for(&self, follower_id: i64, window: &FetchWindow) -> Result<Vec<Signal>> {
        let rows = sqlx::query_as::<_, SignalRow>(
            r#"
            SELECT s.id, s.sender_id, s.symbol, s.action, s.sl_pips, s.tp_pips,
                   s.lot_size, s.details, s.created_at
            FROM signals s
            JOIN follows f ON f.sender_id = s.sender_id
            WHERE f.follower_id = ? AND s.created_at >= ?
            ORDER BY s.created_at ASC, s.id ASC
            LIMIT ?
            "#,
        )
        .bind(follower_id)
        .bind(timestamp(window.since))
        .bind(i64::from(window.max_candidates))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(SignalRow::into_signal).collect()
    }

    /// Most recent signals across all senders, newest first
    pub async fn recent(&self, limit: u32) -> Result<Vec<Signal>> {
        let rows = sqlx::query_as::<_, SignalRow>(
            r#"
            SELECT id, sender_id, symbol, action, sl_pips, tp_pips, lot_size, details, created_at
            FROM signals
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(SignalRow::into_signal).collect()
    }
}

#[async_trait]
impl CandidateSource for SignalStore {
    async fn candidates(&self, identity: &Identity, window: &FetchWindow) -> Result<Vec<Signal>> {
        self.candidates_for(identity.id, window).await
    }
}
