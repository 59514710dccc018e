/// Per-user watchlists
use crate::{
    db::{parse_timestamp, timestamp},
    error::{NotifyError, NotifyResult},
    models::WatchlistEntry,
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

#[derive(Clone)]
pub struct WatchlistStore {
    db: SqlitePool,
}

impl WatchlistStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Add a movie; re-adding refreshes the display fields only
    pub async fn add(
        &self,
        user_id: &str,
        movie_id: &str,
        title: &str,
        poster_path: Option<&str>,
    ) -> NotifyResult<WatchlistEntry> {
        if movie_id.trim().is_empty() {
            return Err(NotifyError::Validation("Missing required field: movieId".to_string()));
        }
        if title.trim().is_empty() {
            return Err(NotifyError::Validation("Missing required field: title".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO watchlist (user_id, movie_id, title, poster_path, added_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, movie_id) DO UPDATE SET
                title = excluded.title,
                poster_path = excluded.poster_path
            "#,
        )
        .bind(user_id)
        .bind(movie_id)
        .bind(title)
        .bind(poster_path)
        .bind(timestamp(Utc::now()))
        .execute(&self.db)
        .await?;

        debug!("{} added movie {} to watchlist", user_id, movie_id);
        self.get(user_id, movie_id)
            .await?
            .ok_or_else(|| NotifyError::Internal("Watchlist entry missing after insert".to_string()))
    }

    /// Remove a movie; returns false if it was not on the list
    pub async fn remove(&self, user_id: &str, movie_id: &str) -> NotifyResult<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE user_id = ?1 AND movie_id = ?2")
            .bind(user_id)
            .bind(movie_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, user_id: &str, movie_id: &str) -> NotifyResult<Option<WatchlistEntry>> {
        let row = sqlx::query(
            "SELECT user_id, movie_id, title, poster_path, added_at FROM watchlist WHERE user_id = ?1 AND movie_id = ?2",
        )
        .bind(user_id)
        .bind(movie_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(Self::parse_entry).transpose()
    }

    /// A user's watchlist, most recently added first
    pub async fn list(&self, user_id: &str) -> NotifyResult<Vec<WatchlistEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, movie_id, title, poster_path, added_at
            FROM watchlist
            WHERE user_id = ?1
            ORDER BY added_at DESC, movie_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Self::parse_entry).collect()
    }

    /// Distinct users whose watchlist contains a movie
    pub async fn watchers(&self, movie_id: &str) -> NotifyResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM watchlist WHERE movie_id = ?1 ORDER BY user_id",
        )
        .bind(movie_id)
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }

    /// Any stored poster path for a movie
    pub async fn poster_path(&self, movie_id: &str) -> NotifyResult<Option<String>> {
        let path = sqlx::query_scalar(
            "SELECT poster_path FROM watchlist WHERE movie_id = ?1 AND poster_path IS NOT NULL LIMIT 1",
        )
        .bind(movie_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(path)
    }

    fn parse_entry(row: sqlx::sqlite::SqliteRow) -> NotifyResult<WatchlistEntry> {
        let added_at: String = row.try_get("added_at")?;
        Ok(WatchlistEntry {
            user_id: row.try_get("user_id")?,
            movie_id: row.try_get("movie_id")?,
            title: row.try_get("title")?,
            poster_path: row.try_get("poster_path")?,
            added_at: parse_timestamp(&added_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    #[tokio::test]
    async fn test_one_entry_per_movie() {
        let watchlist = WatchlistStore::new(create_memory_pool().await.unwrap());

        let first = watchlist.add("alice", "603", "The Matrix", None).await.unwrap();
        let second = watchlist
            .add("alice", "603", "The Matrix (1999)", Some("/m.jpg"))
            .await
            .unwrap();

        let list = watchlist.list("alice").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "The Matrix (1999)");
        assert_eq!(second.added_at, first.added_at);
    }

    #[tokio::test]
    async fn test_watchers_are_distinct_users() {
        let watchlist = WatchlistStore::new(create_memory_pool().await.unwrap());
        for user in ["bob", "alice", "carol"] {
            watchlist.add(user, "603", "The Matrix", None).await.unwrap();
        }
        watchlist.add("dave", "550", "Fight Club", None).await.unwrap();

        assert_eq!(
            watchlist.watchers("603").await.unwrap(),
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let watchlist = WatchlistStore::new(create_memory_pool().await.unwrap());
        watchlist.add("alice", "603", "The Matrix", None).await.unwrap();

        assert!(watchlist.remove("alice", "603").await.unwrap());
        assert!(!watchlist.remove("alice", "603").await.unwrap());
        assert!(watchlist.list("alice").await.unwrap().is_empty());
    }
}
