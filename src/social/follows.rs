/// Follow edges
///
/// An edge is stored on both sides (`user_following` for the source,
/// `user_followers` for the target) and both profile counters move with it.
/// All four writes share one transaction.
use crate::{
    db::timestamp,
    error::{NotifyError, NotifyResult},
};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Clone)]
pub struct FollowManager {
    db: SqlitePool,
}

impl FollowManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create the edge `user_id -> target_id`
    pub async fn follow(&self, user_id: &str, target_id: &str) -> NotifyResult<()> {
        if user_id == target_id {
            return Err(NotifyError::Validation("Cannot follow yourself".to_string()));
        }

        let now = timestamp(Utc::now());
        let mut tx = self.db.begin().await?;

        // Write first so the transaction holds the write lock before reading;
        // a read-then-write upgrade fails immediately under contention.
        // Callers may act before ever saving a profile.
        sqlx::query("INSERT OR IGNORE INTO users (id, created_at, updated_at) VALUES (?1, ?2, ?2)")
            .bind(user_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        let target_exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?1")
            .bind(target_id)
            .fetch_optional(&mut *tx)
            .await?;
        if target_exists.is_none() {
            return Err(NotifyError::NotFound(format!("User {} not found", target_id)));
        }

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO user_following (user_id, target_id, followed_at) VALUES (?1, ?2, ?3)",
        )
        .bind(user_id)
        .bind(target_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(NotifyError::Conflict("Already following this user".to_string()));
        }

        sqlx::query(
            "INSERT INTO user_followers (user_id, follower_id, followed_at) VALUES (?1, ?2, ?3)",
        )
        .bind(target_id)
        .bind(user_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET following_count = following_count + 1, updated_at = ?2 WHERE id = ?1")
            .bind(user_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE users SET followers_count = followers_count + 1, updated_at = ?2 WHERE id = ?1")
            .bind(target_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("{} followed {}", user_id, target_id);
        Ok(())
    }

    /// Remove the edge `user_id -> target_id`
    pub async fn unfollow(&self, user_id: &str, target_id: &str) -> NotifyResult<()> {
        if user_id == target_id {
            return Err(NotifyError::Validation("Cannot unfollow yourself".to_string()));
        }

        let now = timestamp(Utc::now());
        let mut tx = self.db.begin().await?;

        let removed = sqlx::query("DELETE FROM user_following WHERE user_id = ?1 AND target_id = ?2")
            .bind(user_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
        if removed.rows_affected() == 0 {
            return Err(NotifyError::NotFound("Not following this user".to_string()));
        }

        sqlx::query("DELETE FROM user_followers WHERE user_id = ?1 AND follower_id = ?2")
            .bind(target_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE users SET following_count = MAX(following_count - 1, 0), updated_at = ?2 WHERE id = ?1",
        )
        .bind(user_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE users SET followers_count = MAX(followers_count - 1, 0), updated_at = ?2 WHERE id = ?1",
        )
        .bind(target_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("{} unfollowed {}", user_id, target_id);
        Ok(())
    }

    pub async fn is_following(&self, user_id: &str, target_id: &str) -> NotifyResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_following WHERE user_id = ?1 AND target_id = ?2",
        )
        .bind(user_id)
        .bind(target_id)
        .fetch_one(&self.db)
        .await?;

        Ok(count > 0)
    }

    /// Ids of users following `user_id`, oldest edge first
    pub async fn followers(&self, user_id: &str) -> NotifyResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT follower_id FROM user_followers WHERE user_id = ?1 ORDER BY followed_at, follower_id",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }

    /// Ids of users `user_id` follows
    pub async fn following(&self, user_id: &str) -> NotifyResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT target_id FROM user_following WHERE user_id = ?1 ORDER BY followed_at, target_id",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }
}
