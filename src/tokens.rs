/// Token Store - device push tokens per user
use crate::{
    db::{parse_timestamp, timestamp},
    error::{NotifyError, NotifyResult},
    models::NotificationToken,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

/// Shorten a token for log output
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(20).collect();
    format!("{}...", prefix)
}

/// Persistent registry of push tokens
///
/// A token string is unique across the system. Registering a token that
/// already exists moves it to the new owner instead of duplicating it.
#[derive(Clone)]
pub struct TokenStore {
    db: SqlitePool,
}

impl TokenStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Upsert a token for a user, reassigning ownership if needed
    pub async fn store_token(&self, user_id: &str, token: &str) -> NotifyResult<()> {
        if token.trim().is_empty() {
            return Err(NotifyError::Validation("Token cannot be empty".to_string()));
        }

        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO notification_tokens (id, user_id, token, created_at, last_used)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(token) DO UPDATE SET
                user_id = excluded.user_id,
                last_used = excluded.last_used
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(token)
        .bind(&now)
        .execute(&self.db)
        .await?;

        info!("Notification token stored for user: {}", user_id);
        Ok(())
    }

    /// All token strings owned by a user
    pub async fn list_tokens(&self, user_id: &str) -> NotifyResult<Vec<String>> {
        let tokens = sqlx::query_scalar::<_, String>(
            "SELECT token FROM notification_tokens WHERE user_id = ?1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(tokens)
    }

    /// Full token records owned by a user
    pub async fn list_records(&self, user_id: &str) -> NotifyResult<Vec<NotificationToken>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, token, created_at, last_used
            FROM notification_tokens
            WHERE user_id = ?1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Self::parse_token).collect()
    }

    /// Delete the (user, token) pairing; absent pairs are not an error
    pub async fn remove_token(&self, user_id: &str, token: &str) -> NotifyResult<bool> {
        let result = sqlx::query("DELETE FROM notification_tokens WHERE user_id = ?1 AND token = ?2")
            .bind(user_id)
            .bind(token)
            .execute(&self.db)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!("Removed notification token for user: {}", user_id);
        }
        Ok(removed)
    }

    /// Delete a token the push provider reported as permanently invalid
    pub async fn prune_invalid_token(&self, token: &str) -> NotifyResult<bool> {
        let result = sqlx::query("DELETE FROM notification_tokens WHERE token = ?1")
            .bind(token)
            .execute(&self.db)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!("Removed invalid token: {}", redact(token));
        }
        Ok(removed)
    }

    /// Refresh `last_used` after a successful push
    pub async fn touch_token(&self, token: &str) -> NotifyResult<()> {
        sqlx::query("UPDATE notification_tokens SET last_used = ?1 WHERE token = ?2")
            .bind(timestamp(Utc::now()))
            .bind(token)
            .execute(&self.db)
            .await?;

        debug!("Refreshed last_used for token {}", redact(token));
        Ok(())
    }

    /// Distinct users owning at least one token
    pub async fn users_with_tokens(&self) -> NotifyResult<Vec<String>> {
        let users = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT user_id FROM notification_tokens ORDER BY user_id",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }

    /// Delete tokens not used since `cutoff`, returning how many were removed
    pub async fn prune_stale(&self, cutoff: DateTime<Utc>) -> NotifyResult<u64> {
        let result = sqlx::query("DELETE FROM notification_tokens WHERE last_used < ?1")
            .bind(timestamp(cutoff))
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    fn parse_token(row: sqlx::sqlite::SqliteRow) -> NotifyResult<NotificationToken> {
        let created_at: String = row.try_get("created_at")?;
        let last_used: String = row.try_get("last_used")?;

        Ok(NotificationToken {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            token: row.try_get("token")?,
            created_at: parse_timestamp(&created_at)?,
            last_used: parse_timestamp(&last_used)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    async fn store() -> (TokenStore, SqlitePool) {
        let db = create_memory_pool().await.unwrap();
        (TokenStore::new(db.clone()), db)
    }

    async fn count_token(db: &SqlitePool, token: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM notification_tokens WHERE token = ?1")
            .bind(token)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_twice_keeps_single_record() {
        let (store, db) = store().await;

        store.store_token("alice", "T1").await.unwrap();
        store.store_token("alice", "T1").await.unwrap();

        assert_eq!(count_token(&db, "T1").await, 1);
        assert_eq!(store.list_tokens("alice").await.unwrap(), vec!["T1".to_string()]);
    }

    #[tokio::test]
    async fn test_reregistering_reassigns_owner() {
        let (store, db) = store().await;

        store.store_token("alice", "T1").await.unwrap();
        let before = store.list_records("alice").await.unwrap()[0].clone();

        store.store_token("bob", "T1").await.unwrap();

        assert!(store.list_tokens("alice").await.unwrap().is_empty());
        let after = store.list_records("bob").await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before.id);
        assert!(after[0].last_used >= before.last_used);
        assert_eq!(count_token(&db, "T1").await, 1);
    }

    #[tokio::test]
    async fn test_list_is_empty_for_unknown_user() {
        let (store, _) = store().await;
        assert!(store.list_tokens("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_scoped_to_owner_and_idempotent() {
        let (store, _) = store().await;
        store.store_token("alice", "T1").await.unwrap();

        assert!(!store.remove_token("bob", "T1").await.unwrap());
        assert_eq!(store.list_tokens("alice").await.unwrap().len(), 1);

        assert!(store.remove_token("alice", "T1").await.unwrap());
        assert!(!store.remove_token("alice", "T1").await.unwrap());
        assert!(store.list_tokens("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_invalid_ignores_owner() {
        let (store, _) = store().await;
        store.store_token("alice", "T1").await.unwrap();
        store.store_token("alice", "T2").await.unwrap();

        assert!(store.prune_invalid_token("T1").await.unwrap());
        assert_eq!(store.list_tokens("alice").await.unwrap(), vec!["T2".to_string()]);
    }

    #[tokio::test]
    async fn test_users_with_tokens_is_distinct() {
        let (store, _) = store().await;
        store.store_token("alice", "T1").await.unwrap();
        store.store_token("alice", "T2").await.unwrap();
        store.store_token("bob", "T3").await.unwrap();

        assert_eq!(
            store.users_with_tokens().await.unwrap(),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[tokio::test]
    async fn test_prune_stale_uses_last_used() {
        let (store, db) = store().await;
        store.store_token("alice", "old").await.unwrap();
        store.store_token("alice", "fresh").await.unwrap();

        let long_ago = timestamp(Utc::now() - chrono::Duration::days(400));
        sqlx::query("UPDATE notification_tokens SET last_used = ?1 WHERE token = 'old'")
            .bind(long_ago)
            .execute(&db)
            .await
            .unwrap();

        let removed = store
            .prune_stale(Utc::now() - chrono::Duration::days(270))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list_tokens("alice").await.unwrap(), vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let (store, _) = store().await;
        assert!(matches!(
            store.store_token("alice", "  ").await,
            Err(NotifyError::Validation(_))
        ));
    }
}
