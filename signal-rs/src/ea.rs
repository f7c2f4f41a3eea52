//! Expert Advisor bookkeeping: terminal activations and open positions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{parse_optional_timestamp, timestamp};
use crate::error::{Result, SignalError};
use crate::trades::normalize_side;

/// One open position as reported by the EA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: i64,
    pub symbol: String,
    pub side: String,
    pub volume: f64,
    pub entry_price: f64,
    #[serde(default)]
    pub sl: Option<f64>,
    #[serde(default)]
    pub tp: Option<f64>,
    #[serde(default)]
    pub open_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub magic: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Full snapshot of one trading account's open positions
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    pub account_id: String,
    pub broker_server: String,
    #[serde(default)]
    pub hwid: Option<String>,
    #[serde(default)]
    pub positions: Vec<OpenPosition>,
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    ticket: i64,
    symbol: String,
    side: String,
    volume: f64,
    entry_price: f64,
    sl: Option<f64>,
    tp: Option<f64>,
    open_time: Option<String>,
    magic: Option<i64>,
    comment: Option<String>,
}

#[derive(Clone)]
pub struct EaStore {
    db: SqlitePool,
}

impl EaStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the activations and open_positions tables
    pub async fn init_db(db: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_id INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                broker_server TEXT NOT NULL,
                hwid TEXT,
                last_seen_at TEXT NOT NULL,
                UNIQUE (identity_id, account_id, broker_server)
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS open_positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_id INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                broker_server TEXT NOT NULL,
                ticket INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                volume REAL NOT NULL,
                entry_price REAL NOT NULL,
                sl REAL,
                tp REAL,
                open_time TEXT,
                magic INTEGER,
                comment TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_open_positions_account
            ON open_positions(identity_id, account_id, broker_server)
            "#,
        )
        .execute(db)
        .await?;

        Ok(())
    }

    /// Touch the activation and replace the account's open positions.
    ///
    /// Returns the number of positions now stored for the account.
    pub async fn sync(&self, identity_id: i64, request: &SyncRequest) -> Result<u32> {
        self.sync_at(identity_id, request, Utc::now()).await
    }

    pub async fn sync_at(&self, identity_id: i64, request: &SyncRequest, now: DateTime<Utc>) -> Result<u32> {
        let account_id = request.account_id.trim();
        let broker_server = request.broker_server.trim();
        if account_id.is_empty() || broker_server.is_empty() {
            return Err(SignalError::InvalidRequest("account_required".to_string()));
        }

        let mut positions = Vec::with_capacity(request.positions.len());
        for position in &request.positions {
            let mut position = position.clone();
            position.symbol = position.symbol.trim().to_uppercase();
            position.side = normalize_side(&position.side)?;
            positions.push(position);
        }

        let now_ts = timestamp(now);
        let hwid = request.hwid.as_deref().filter(|h| !h.is_empty());

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO activations (identity_id, account_id, broker_server, hwid, last_seen_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(identity_id, account_id, broker_server)
            DO UPDATE SET last_seen_at = excluded.last_seen_at,
                          hwid = COALESCE(excluded.hwid, activations.hwid)
            "#,
        )
        .bind(identity_id)
        .bind(account_id)
        .bind(broker_server)
        .bind(hwid)
        .bind(&now_ts)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM open_positions WHERE identity_id = ? AND account_id = ? AND broker_server = ?",
        )
        .bind(identity_id)
        .bind(account_id)
        .bind(broker_server)
        .execute(&mut *tx)
        .await?;

        for position in &positions {
            sqlx::query(
                r#"
                INSERT INTO open_positions (
                    identity_id, account_id, broker_server, ticket, symbol, side, volume,
                    entry_price, sl, tp, open_time, magic, comment, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(identity_id)
            .bind(account_id)
            .bind(broker_server)
            .bind(position.ticket)
            .bind(&position.symbol)
            .bind(&position.side)
            .bind(position.volume)
            .bind(position.entry_price)
            .bind(position.sl)
            .bind(position.tp)
            .bind(position.open_time.map(timestamp))
            .bind(position.magic)
            .bind(&position.comment)
            .bind(&now_ts)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            "EA sync: identity {} account {}@{} with {} open position(s)",
            identity_id,
            account_id,
            broker_server,
            positions.len()
        );

        Ok(positions.len() as u32)
    }

    /// Stored open positions for one account, by ticket
    pub async fn positions(&self, identity_id: i64, account_id: &str, broker_server: &str) -> Result<Vec<OpenPosition>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT ticket, symbol, side, volume, entry_price, sl, tp, open_time, magic, comment
            FROM open_positions
            WHERE identity_id = ? AND account_id = ? AND broker_server = ?
            ORDER BY ticket
            "#,
        )
        .bind(identity_id)
        .bind(account_id.trim())
        .bind(broker_server.trim())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(OpenPosition {
                    ticket: row.ticket,
                    symbol: row.symbol,
                    side: row.side,
                    volume: row.volume,
                    entry_price: row.entry_price,
                    sl: row.sl,
                    tp: row.tp,
                    open_time: parse_optional_timestamp(row.open_time.as_deref())?,
                    magic: row.magic,
                    comment: row.comment,
                })
            })
            .collect()
    }

    /// Last time the EA for this account checked in
    pub async fn last_seen(&self, identity_id: i64, account_id: &str, broker_server: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT last_seen_at FROM activations
            WHERE identity_id = ? AND account_id = ? AND broker_server = ?
            "#,
        )
        .bind(identity_id)
        .bind(account_id.trim())
        .bind(broker_server.trim())
        .fetch_optional(&self.db)
        .await?;

        parse_optional_timestamp(row.as_ref().map(|(ts,)| ts.as_str()))
    }
}
