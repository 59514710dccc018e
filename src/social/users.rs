/// User profiles
use super::ProfileUpdate;
use crate::{
    db::{parse_timestamp, timestamp},
    error::{NotifyError, NotifyResult},
    models::User,
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

const FALLBACK_NAME: &str = "Someone";

#[derive(Clone)]
pub struct UserStore {
    db: SqlitePool,
}

impl UserStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create or update the caller's profile; absent fields keep their value
    pub async fn upsert_profile(&self, user_id: &str, update: &ProfileUpdate) -> NotifyResult<User> {
        if let Some(email) = update.email.as_deref() {
            if !email.is_empty() && !email.contains('@') {
                return Err(NotifyError::Validation("Invalid email address".to_string()));
            }
        }

        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, username, email, bio, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(id) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, users.display_name),
                username = COALESCE(excluded.username, users.username),
                email = COALESCE(excluded.email, users.email),
                bio = COALESCE(excluded.bio, users.bio),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&update.display_name)
        .bind(&update.username)
        .bind(&update.email)
        .bind(&update.bio)
        .bind(&now)
        .execute(&self.db)
        .await?;

        info!("Profile updated for user: {}", user_id);
        self.get_user(user_id)
            .await?
            .ok_or_else(|| NotifyError::Internal(format!("User {} vanished after upsert", user_id)))
    }

    pub async fn get_user(&self, user_id: &str) -> NotifyResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, username, email, bio, followers_count, following_count, created_at
            FROM users
            WHERE id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(Self::parse_user).transpose()
    }

    /// Public name for notification texts; lookup failures fall back to "Someone"
    pub async fn display_name(&self, user_id: &str) -> String {
        match self.get_user(user_id).await {
            Ok(Some(user)) => user.public_name(),
            Ok(None) => FALLBACK_NAME.to_string(),
            Err(e) => {
                warn!("Failed to look up name for {}: {}", user_id, e);
                FALLBACK_NAME.to_string()
            }
        }
    }

    fn parse_user(row: sqlx::sqlite::SqliteRow) -> NotifyResult<User> {
        let created_at: String = row.try_get("created_at")?;
        Ok(User {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            bio: row.try_get("bio")?,
            followers_count: row.try_get("followers_count")?,
            following_count: row.try_get("following_count")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}
