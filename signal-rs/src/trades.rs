//! Trade log posted by receivers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{parse_optional_timestamp, parse_timestamp, timestamp};
use crate::error::{Result, SignalError};

/// Trade payload as posted by a client
#[derive(Debug, Clone, Deserialize)]
pub struct NewTradeRecord {
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    #[serde(default)]
    pub exit_price: Option<f64>,
    pub volume: f64,
    #[serde(default)]
    pub pnl: Option<f64>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub open_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: Option<Map<String, Value>>,
}

/// A stored trade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub id: i64,
    pub identity_id: i64,
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub volume: f64,
    pub pnl: Option<f64>,
    pub duration: Option<String>,
    pub open_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
    pub details: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TradeRow {
    id: i64,
    identity_id: i64,
    symbol: String,
    side: String,
    entry_price: f64,
    exit_price: Option<f64>,
    volume: f64,
    pnl: Option<f64>,
    duration: Option<String>,
    open_time: Option<String>,
    close_time: Option<String>,
    details: Option<String>,
    created_at: String,
}

impl TryFrom<TradeRow> for TradeRecord {
    type Error = SignalError;

    fn try_from(row: TradeRow) -> Result<Self> {
        Ok(TradeRecord {
            id: row.id,
            identity_id: row.identity_id,
            symbol: row.symbol,
            side: row.side,
            entry_price: row.entry_price,
            exit_price: row.exit_price,
            volume: row.volume,
            pnl: row.pnl,
            duration: row.duration,
            open_time: parse_optional_timestamp(row.open_time.as_deref())?,
            close_time: parse_optional_timestamp(row.close_time.as_deref())?,
            details: row
                .details
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

/// Normalize a trade side; only `buy` and `sell` are accepted
pub fn normalize_side(side: &str) -> Result<String> {
    match side.trim().to_lowercase().as_str() {
        s @ ("buy" | "sell") => Ok(s.to_string()),
        _ => Err(SignalError::InvalidRequest("invalid_side".to_string())),
    }
}

const TRADE_COLUMNS: &str = "id, identity_id, symbol, side, entry_price, exit_price, volume, \
                             pnl, duration, open_time, close_time, details, created_at";

#[derive(Clone)]
pub struct TradeStore {
    db: SqlitePool,
}

impl TradeStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the trade log table
    pub async fn init_db(db: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL,
                volume REAL NOT NULL,
                pnl REAL,
                duration TEXT,
                open_time TEXT,
                close_time TEXT,
                details TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trade_records_identity ON trade_records(identity_id)",
        )
        .execute(db)
        .await?;

        Ok(())
    }

    /// Store a trade for `identity_id`
    pub async fn record(&self, identity_id: i64, new: NewTradeRecord) -> Result<TradeRecord> {
        let symbol = new.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(SignalError::InvalidRequest("symbol_required".to_string()));
        }
        let side = normalize_side(&new.side)?;
        if !new.volume.is_finite() || new.volume <= 0.0 {
            return Err(SignalError::InvalidRequest("invalid_volume".to_string()));
        }
        if !new.entry_price.is_finite() {
            return Err(SignalError::InvalidRequest("invalid_entry_price".to_string()));
        }

        let details = new.details.as_ref().map(serde_json::to_string).transpose()?;

        let row = sqlx::query_as::<_, TradeRow>(&format!(
            r#"
            INSERT INTO trade_records (
                identity_id, symbol, side, entry_price, exit_price, volume,
                pnl, duration, open_time, close_time, details, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            TRADE_COLUMNS
        ))
        .bind(identity_id)
        .bind(&symbol)
        .bind(&side)
        .bind(new.entry_price)
        .bind(new.exit_price)
        .bind(new.volume)
        .bind(new.pnl)
        .bind(&new.duration)
        .bind(new.open_time.map(timestamp))
        .bind(new.close_time.map(timestamp))
        .bind(&details)
        .bind(timestamp(Utc::now()))
        .fetch_one(&self.db)
        .await?;

        let record = TradeRecord::try_from(row)?;
        info!(
            "Trade recorded: #{} {} {} for identity {}",
            record.id, record.side, record.symbol, identity_id
        );
        Ok(record)
    }

    /// Most recent trades, newest first, optionally for one identity
    pub async fn list(&self, identity_id: Option<i64>, limit: u32) -> Result<Vec<TradeRecord>> {
        let rows = match identity_id {
            Some(id) => {
                sqlx::query_as::<_, TradeRow>(&format!(
                    "SELECT {} FROM trade_records WHERE identity_id = ? ORDER BY id DESC LIMIT ?",
                    TRADE_COLUMNS
                ))
                .bind(id)
                .bind(i64::from(limit))
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, TradeRow>(&format!(
                    "SELECT {} FROM trade_records ORDER BY id DESC LIMIT ?",
                    TRADE_COLUMNS
                ))
                .bind(i64::from(limit))
                .fetch_all(&self.db)
                .await?
            }
        };

        rows.into_iter().map(TradeRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> TradeStore {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        TradeStore::init_db(&pool).await.unwrap();
        TradeStore::new(pool)
    }

    fn trade(side: &str) -> NewTradeRecord {
        serde_json::from_value(serde_json::json!({
            "symbol": "eurusd",
            "side": side,
            "entry_price": 1.0850,
            "volume": 0.1,
            "pnl": 12.5,
            "open_time": "2024-05-01T10:00:00Z",
            "details": {"ticket": 4242}
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_side() {
        assert_eq!(normalize_side(" BUY ").unwrap(), "buy");
        assert_eq!(normalize_side("sell").unwrap(), "sell");
        assert!(normalize_side("hold").is_err());
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let store = setup().await;

        let record = store.record(3, trade("Buy")).await.unwrap();
        assert_eq!(record.symbol, "EURUSD");
        assert_eq!(record.side, "buy");
        assert_eq!(record.pnl, Some(12.5));
        assert!(record.open_time.is_some());
        assert_eq!(
            record.details.as_ref().and_then(|d| d.get("ticket")).and_then(Value::as_i64),
            Some(4242)
        );

        store.record(4, trade("sell")).await.unwrap();

        assert_eq!(store.list(None, 10).await.unwrap().len(), 2);
        let mine = store.list(Some(3), 10).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0], record);
    }

    #[tokio::test]
    async fn test_record_rejects_invalid_side_and_volume() {
        let store = setup().await;

        assert!(matches!(
            store.record(1, trade("hold")).await,
            Err(SignalError::InvalidRequest(ref c)) if c == "invalid_side"
        ));

        let mut bad = trade("buy");
        bad.volume = 0.0;
        assert!(matches!(
            store.record(1, bad).await,
            Err(SignalError::InvalidRequest(ref c)) if c == "invalid_volume"
        ));
    }
}
