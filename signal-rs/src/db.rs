//! SQLite pool setup and schema bootstrap

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::delivery::DeliveryFilter;
use crate::ea::EaStore;
use crate::error::Result;
use crate::identity::IdentityStore;
use crate::quota::QuotaLedger;
use crate::signals::SignalStore;
use crate::trades::TradeStore;

/// Open a connection pool, creating the database file if needed
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        // Keeps in-memory databases alive between queries
        .min_connections(1)
        .connect_with(options)
        .await?;

    info!("Database pool ready: {}", database_url);
    Ok(pool)
}

/// Create every table the service owns
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    IdentityStore::init_db(pool).await?;
    SignalStore::init_db(pool).await?;
    QuotaLedger::init_db(pool).await?;
    DeliveryFilter::init_db(pool).await?;
    TradeStore::init_db(pool).await?;
    EaStore::init_db(pool).await?;
    Ok(())
}

/// Fixed-width RFC 3339 encoding, so stored timestamps sort lexically
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp column
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(format!("invalid timestamp {:?}: {}", value, e).into()).into())
}

/// Parse an optional stored timestamp column
pub fn parse_optional_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_timestamp).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip_preserves_micros() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::microseconds(123_456);
        let encoded = timestamp(dt);
        assert_eq!(encoded, "2024-01-02T03:04:05.123456Z");
        assert_eq!(parse_timestamp(&encoded).unwrap(), dt);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let b = timestamp(
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::milliseconds(1),
        );
        assert!(a < b);
    }

    #[test]
    fn test_parse_invalid_timestamp() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let pool = connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}
