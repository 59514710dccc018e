/// Movie reviews
use super::{first_validation_message, NewReview};
use crate::{
    db::{parse_timestamp, timestamp},
    error::{NotifyError, NotifyResult},
    models::Review,
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct ReviewStore {
    db: SqlitePool,
}

impl ReviewStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Validate and store a review; one review per (user, movie)
    pub async fn create(&self, user_id: &str, request: NewReview) -> NotifyResult<Review> {
        let request = NewReview {
            movie_id: request.movie_id.trim().to_string(),
            movie_title: request.movie_title.trim().to_string(),
            text: request.text.trim().to_string(),
            ..request
        };
        request
            .validate()
            .map_err(|e| NotifyError::Validation(first_validation_message(&e)))?;

        let rating = request
            .rating
            .and_then(|r| u8::try_from(r).ok())
            .ok_or_else(|| NotifyError::Validation("Missing required field: rating".to_string()))?;

        let review = Review {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            movie_id: request.movie_id,
            movie_title: request.movie_title,
            rating,
            text: request.text,
            created_at: Utc::now(),
        };

        // Existence check and insert are one statement so concurrent
        // submissions cannot both pass
        let inserted = sqlx::query(
            r#"
            INSERT INTO reviews (id, user_id, movie_id, movie_title, rating, text, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
            WHERE NOT EXISTS (SELECT 1 FROM reviews WHERE user_id = ?2 AND movie_id = ?3)
            "#,
        )
        .bind(&review.id)
        .bind(&review.user_id)
        .bind(&review.movie_id)
        .bind(&review.movie_title)
        .bind(review.rating as i64)
        .bind(&review.text)
        .bind(timestamp(review.created_at))
        .execute(&self.db)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(NotifyError::Conflict("You have already reviewed this movie".to_string()));
        }

        info!("{} reviewed movie {} ({}/10)", user_id, review.movie_id, review.rating);
        Ok(review)
    }

    /// Reviews of a movie, newest first
    pub async fn list_for_movie(&self, movie_id: &str) -> NotifyResult<Vec<Review>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, movie_id, movie_title, rating, text, created_at
            FROM reviews
            WHERE movie_id = ?1
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(movie_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Self::parse_review).collect()
    }

    fn parse_review(row: sqlx::sqlite::SqliteRow) -> NotifyResult<Review> {
        let created_at: String = row.try_get("created_at")?;
        let rating: i64 = row.try_get("rating")?;
        Ok(Review {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            movie_id: row.try_get("movie_id")?,
            movie_title: row.try_get("movie_title")?,
            rating: u8::try_from(rating)
                .map_err(|_| NotifyError::Internal(format!("Stored rating out of range: {}", rating)))?,
            text: row.try_get("text")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}
