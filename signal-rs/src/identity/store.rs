//! SQLite-backed identity store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::types::{normalize_username, Credential, Identity, IssueRequest, IssuedToken};
use super::IdentityResolver;
use crate::db::{parse_optional_timestamp, parse_timestamp, timestamp};
use crate::error::{Result, SignalError};
use crate::quota::{Allowance, Plan};
use crate::security::{generate_token, hash_token, token_matches_hash};

const IDENTITY_COLUMNS: &str = "id, username, email, token_hash, plan, quota_override, \
                                is_active, expires_at, created_at";

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: i64,
    username: String,
    email: Option<String>,
    token_hash: String,
    plan: String,
    quota_override: Option<i64>,
    is_active: bool,
    expires_at: Option<String>,
    created_at: String,
}

impl IdentityRow {
    fn into_identity(self) -> Result<Identity> {
        Ok(Identity {
            id: self.id,
            username: self.username,
            email: self.email,
            plan: Plan::from_db_string(&self.plan),
            quota_override: Allowance::from_db(self.quota_override),
            is_active: self.is_active,
            expires_at: parse_optional_timestamp(self.expires_at.as_deref())?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Receivers, the publishing sender, and who follows whom
#[derive(Clone)]
pub struct IdentityStore {
    db: SqlitePool,
    sender_username: String,
}

impl IdentityStore {
    /// Create a new identity store; `sender_username` is reserved for publishing
    pub fn new(db: SqlitePool, sender_username: &str) -> Self {
        Self {
            db,
            sender_username: normalize_username(sender_username),
        }
    }

    /// Initialize the identities and follows tables
    pub async fn init_db(db: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS identities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT,
                token_hash TEXT NOT NULL UNIQUE,
                plan TEXT NOT NULL DEFAULT 'free',
                quota_override INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_identities_email ON identities(email)")
            .execute(db)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS follows (
                follower_id INTEGER NOT NULL,
                sender_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (follower_id, sender_id)
            )
            "#,
        )
        .execute(db)
        .await?;

        Ok(())
    }

    pub fn sender_username(&self) -> &str {
        &self.sender_username
    }

    /// Create or update a receiver and rotate its token
    pub async fn issue_or_update(&self, request: IssueRequest) -> Result<IssuedToken> {
        self.issue_or_update_at(request, Utc::now()).await
    }

    /// Create or update a receiver at `now`.
    ///
    /// The token is always rotated. An absent override clears any stored one.
    /// Usage is tracked per identity, so today's charges carry over.
    pub async fn issue_or_update_at(&self, request: IssueRequest, now: DateTime<Utc>) -> Result<IssuedToken> {
        let username = normalize_username(&request.username);
        if username.is_empty() {
            return Err(SignalError::InvalidRequest("username_required".to_string()));
        }
        if username == self.sender_username {
            return Err(SignalError::InvalidRequest("reserved_username".to_string()));
        }

        let email = request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase);
        if let Some(ref e) = email {
            if !e.contains('@') {
                return Err(SignalError::InvalidRequest("invalid_email".to_string()));
            }
        }

        let token = generate_token();
        let token_hash = hash_token(&token);
        let expires_at = request
            .months_valid
            .filter(|m| *m > 0)
            .map(|m| timestamp(now + Duration::days(30 * i64::from(m))));
        let now_ts = timestamp(now);

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO identities (
                username, email, token_hash, plan, quota_override,
                is_active, expires_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(username) DO NOTHING
            "#,
        )
        .bind(&username)
        .bind(&email)
        .bind(&token_hash)
        .bind(request.plan.as_str())
        .bind(Allowance::to_db(request.quota_override))
        .bind(&expires_at)
        .bind(&now_ts)
        .bind(&now_ts)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            sqlx::query(
                r#"
                UPDATE identities
                SET email = COALESCE(?, email),
                    plan = ?,
                    quota_override = ?,
                    token_hash = ?,
                    expires_at = COALESCE(?, expires_at),
                    is_active = 1,
                    updated_at = ?
                WHERE username = ?
                "#,
            )
            .bind(&email)
            .bind(request.plan.as_str())
            .bind(Allowance::to_db(request.quota_override))
            .bind(&token_hash)
            .bind(&expires_at)
            .bind(&now_ts)
            .bind(&username)
            .execute(&mut *tx)
            .await?;
        }

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM identities WHERE username = ?")
            .bind(&username)
            .fetch_one(&mut *tx)
            .await?;

        if inserted {
            // New receivers follow the designated sender
            sqlx::query(
                r#"
                INSERT INTO follows (follower_id, sender_id, created_at)
                SELECT ?, id, ? FROM identities WHERE username = ?
                ON CONFLICT(follower_id, sender_id) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(&now_ts)
            .bind(&self.sender_username)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let identity = self
            .by_id(id)
            .await?
            .ok_or_else(|| SignalError::NotFound(format!("identity {}", id)))?;

        info!(
            "Token issued: {} (plan {}, override {:?}, new {})",
            identity.username, identity.plan, identity.quota_override, inserted
        );

        Ok(IssuedToken { identity, token })
    }

    /// Make sure the publishing sender exists.
    ///
    /// Returns a token when the sender was created, or when `rotate` is set.
    pub async fn ensure_sender(&self, rotate: bool) -> Result<Option<IssuedToken>> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let now_ts = timestamp(Utc::now());

        let inserted = sqlx::query(
            r#"
            INSERT INTO identities (
                username, email, token_hash, plan, quota_override,
                is_active, expires_at, created_at, updated_at
            ) VALUES (?, NULL, ?, 'gold', NULL, 1, NULL, ?, ?)
            ON CONFLICT(username) DO NOTHING
            "#,
        )
        .bind(&self.sender_username)
        .bind(&token_hash)
        .bind(&now_ts)
        .bind(&now_ts)
        .execute(&self.db)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            if !rotate {
                return Ok(None);
            }
            sqlx::query(
                "UPDATE identities SET token_hash = ?, is_active = 1, updated_at = ? WHERE username = ?",
            )
            .bind(&token_hash)
            .bind(&now_ts)
            .bind(&self.sender_username)
            .execute(&self.db)
            .await?;
        }

        let identity = self
            .by_username(&self.sender_username)
            .await?
            .ok_or_else(|| SignalError::NotFound(self.sender_username.clone()))?;

        info!("Sender identity ready: {} (created {})", identity.username, inserted);
        Ok(Some(IssuedToken { identity, token }))
    }

    /// Look up the identity behind a credential, ignoring activity and expiry
    pub async fn find_by_credential(&self, credential: &Credential) -> Result<Option<Identity>> {
        match credential {
            Credential::Bearer(token) => {
                let row = sqlx::query_as::<_, IdentityRow>(&format!(
                    "SELECT {} FROM identities WHERE token_hash = ?",
                    IDENTITY_COLUMNS
                ))
                .bind(hash_token(token))
                .fetch_optional(&self.db)
                .await?;

                row.map(IdentityRow::into_identity).transpose()
            }
            Credential::EmailToken { email, token } => {
                let rows = sqlx::query_as::<_, IdentityRow>(&format!(
                    "SELECT {} FROM identities WHERE email = ?",
                    IDENTITY_COLUMNS
                ))
                .bind(email.trim().to_lowercase())
                .fetch_all(&self.db)
                .await?;

                for row in rows {
                    if token_matches_hash(token, &row.token_hash) {
                        return Ok(Some(row.into_identity()?));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Get an identity by ID
    pub async fn by_id(&self, id: i64) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities WHERE id = ?",
            IDENTITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(IdentityRow::into_identity).transpose()
    }

    /// Get an identity by username
    pub async fn by_username(&self, username: &str) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities WHERE username = ?",
            IDENTITY_COLUMNS
        ))
        .bind(normalize_username(username))
        .fetch_optional(&self.db)
        .await?;

        row.map(IdentityRow::into_identity).transpose()
    }

    /// Get an identity by username or fail with `NotFound`
    pub async fn require_username(&self, username: &str) -> Result<Identity> {
        self.by_username(username)
            .await?
            .ok_or_else(|| SignalError::NotFound(format!("user {}", normalize_username(username))))
    }

    /// List all identities
    pub async fn list(&self) -> Result<Vec<Identity>> {
        let rows = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM identities ORDER BY id",
            IDENTITY_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(IdentityRow::into_identity).collect()
    }

    /// Deactivate an identity; its credential stops resolving
    pub async fn deactivate(&self, username: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE identities SET is_active = 0, updated_at = ? WHERE username = ?",
        )
        .bind(timestamp(Utc::now()))
        .bind(normalize_username(username))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SignalError::NotFound(format!("user {}", username)));
        }

        info!("Identity deactivated: {}", username);
        Ok(())
    }

    /// Subscribe `follower_id` to signals published by `sender_id`
    pub async fn follow(&self, follower_id: i64, sender_id: i64) -> Result<()> {
        if follower_id == sender_id {
            return Err(SignalError::InvalidRequest("cannot_follow_self".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO follows (follower_id, sender_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(follower_id, sender_id) DO NOTHING
            "#,
        )
        .bind(follower_id)
        .bind(sender_id)
        .bind(timestamp(Utc::now()))
        .execute(&self.db)
        .await?;

        debug!("Follow: {} -> {}", follower_id, sender_id);
        Ok(())
    }

    /// Remove a follow relation; a missing relation is not an error
    pub async fn unfollow(&self, follower_id: i64, sender_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM follows WHERE follower_id = ? AND sender_id = ?")
            .bind(follower_id)
            .bind(sender_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// IDs of the senders `follower_id` follows
    pub async fn followed_senders(&self, follower_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT sender_id FROM follows WHERE follower_id = ? ORDER BY sender_id",
        )
        .bind(follower_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl IdentityResolver for IdentityStore {
    async fn resolve(&self, credential: &Credential, now: DateTime<Utc>) -> Result<Option<Identity>> {
        let identity = self.find_by_credential(credential).await?;

        match identity {
            Some(identity) if identity.is_usable_at(now) => Ok(Some(identity)),
            Some(identity) => {
                warn!(
                    "Credential for {} rejected (active {}, expires {:?})",
                    identity.username, identity.is_active, identity.expires_at
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn setup() -> IdentityStore {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        IdentityStore::init_db(&pool).await.unwrap();
        IdentityStore::new(pool, "farm_robot")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_issue_new_identity() {
        let store = setup().await;

        let mut request = IssueRequest::new("  Alice ", Plan::Silver);
        request.email = Some("Alice@Example.com".to_string());
        let issued = store.issue_or_update_at(request, now()).await.unwrap();

        assert_eq!(issued.identity.username, "alice");
        assert_eq!(issued.identity.email.as_deref(), Some("alice@example.com"));
        assert_eq!(issued.identity.plan, Plan::Silver);
        assert_eq!(issued.identity.quota_override, None);
        assert!(issued.identity.is_active);
        assert_eq!(issued.token.len(), 64);
    }

    #[tokio::test]
    async fn test_bearer_resolves_and_rotation_invalidates_old_token() {
        let store = setup().await;

        let first = store
            .issue_or_update_at(IssueRequest::new("bob", Plan::Free), now())
            .await
            .unwrap();
        let resolved = store
            .resolve(&Credential::Bearer(first.token.clone()), now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, first.identity.id);

        let second = store
            .issue_or_update_at(IssueRequest::new("bob", Plan::Gold), now())
            .await
            .unwrap();
        assert_eq!(second.identity.id, first.identity.id);
        assert_eq!(second.identity.plan, Plan::Gold);

        assert!(store
            .resolve(&Credential::Bearer(first.token), now())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .resolve(&Credential::Bearer(second.token), now())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_update_clears_override_when_absent() {
        let store = setup().await;

        let mut request = IssueRequest::new("carol", Plan::Free);
        request.quota_override = Some(Allowance::Limited(0));
        let issued = store.issue_or_update_at(request, now()).await.unwrap();
        assert_eq!(issued.identity.quota_override, Some(Allowance::Limited(0)));

        let issued = store
            .issue_or_update_at(IssueRequest::new("carol", Plan::Silver), now())
            .await
            .unwrap();
        assert_eq!(issued.identity.quota_override, None);
    }

    #[tokio::test]
    async fn test_unlimited_override_round_trips() {
        let store = setup().await;

        let mut request = IssueRequest::new("dave", Plan::Free);
        request.quota_override = Some(Allowance::Unlimited);
        let issued = store.issue_or_update_at(request, now()).await.unwrap();

        let loaded = store.by_id(issued.identity.id).await.unwrap().unwrap();
        assert_eq!(loaded.quota_override, Some(Allowance::Unlimited));
    }

    #[tokio::test]
    async fn test_reserved_and_empty_usernames_rejected() {
        let store = setup().await;

        let result = store
            .issue_or_update_at(IssueRequest::new("Farm_Robot", Plan::Gold), now())
            .await;
        assert!(matches!(result, Err(SignalError::InvalidRequest(ref c)) if c == "reserved_username"));

        let result = store
            .issue_or_update_at(IssueRequest::new("   ", Plan::Gold), now())
            .await;
        assert!(matches!(result, Err(SignalError::InvalidRequest(ref c)) if c == "username_required"));
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let store = setup().await;
        let mut request = IssueRequest::new("erin", Plan::Free);
        request.email = Some("not-an-email".to_string());

        assert!(matches!(
            store.issue_or_update_at(request, now()).await,
            Err(SignalError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_identity_does_not_resolve() {
        let store = setup().await;

        let mut request = IssueRequest::new("frank", Plan::Silver);
        request.months_valid = Some(1);
        let issued = store.issue_or_update_at(request, now()).await.unwrap();
        assert_eq!(
            issued.identity.expires_at,
            Some(now() + Duration::days(30))
        );

        let credential = Credential::Bearer(issued.token);
        assert!(store.resolve(&credential, now()).await.unwrap().is_some());
        assert!(store
            .resolve(&credential, now() + Duration::days(31))
            .await
            .unwrap()
            .is_none());
        // Still visible to lookups that ignore expiry
        assert!(store.find_by_credential(&credential).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deactivated_identity_does_not_resolve() {
        let store = setup().await;
        let issued = store
            .issue_or_update_at(IssueRequest::new("gina", Plan::Free), now())
            .await
            .unwrap();

        store.deactivate("gina").await.unwrap();
        assert!(store
            .resolve(&Credential::Bearer(issued.token), now())
            .await
            .unwrap()
            .is_none());

        assert!(matches!(
            store.deactivate("nobody").await,
            Err(SignalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_email_token_pair() {
        let store = setup().await;

        let mut request = IssueRequest::new("hank", Plan::Free);
        request.email = Some("hank@example.com".to_string());
        let issued = store.issue_or_update_at(request, now()).await.unwrap();

        let good = Credential::EmailToken {
            email: "HANK@example.com".to_string(),
            token: issued.token.clone(),
        };
        let bad = Credential::EmailToken {
            email: "hank@example.com".to_string(),
            token: "wrong".to_string(),
        };

        assert!(store.resolve(&good, now()).await.unwrap().is_some());
        assert!(store.resolve(&bad, now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_receiver_follows_sender() {
        let store = setup().await;
        let sender = store.ensure_sender(false).await.unwrap().unwrap();

        let issued = store
            .issue_or_update_at(IssueRequest::new("ivy", Plan::Free), now())
            .await
            .unwrap();

        assert_eq!(
            store.followed_senders(issued.identity.id).await.unwrap(),
            vec![sender.identity.id]
        );

        store.unfollow(issued.identity.id, sender.identity.id).await.unwrap();
        assert!(store.followed_senders(issued.identity.id).await.unwrap().is_empty());

        // Re-issuing does not re-subscribe
        store
            .issue_or_update_at(IssueRequest::new("ivy", Plan::Silver), now())
            .await
            .unwrap();
        assert!(store.followed_senders(issued.identity.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_sender_is_idempotent() {
        let store = setup().await;

        let created = store.ensure_sender(false).await.unwrap();
        assert!(created.is_some());
        assert!(store.ensure_sender(false).await.unwrap().is_none());

        let rotated = store.ensure_sender(true).await.unwrap().unwrap();
        assert_eq!(rotated.identity.username, "farm_robot");
        assert!(store
            .resolve(&Credential::Bearer(rotated.token), Utc::now())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_follow_self_rejected() {
        let store = setup().await;
        assert!(matches!(
            store.follow(1, 1).await,
            Err(SignalError::InvalidRequest(_))
        ));
    }
}
