/// Preference Store - per-user, per-category notification opt-in flags
use crate::{
    db::timestamp,
    error::NotifyResult,
    models::PreferenceCategory,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

/// Effective preferences: stored values merged over the defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub movie_reviews: bool,
    pub follower_gained: bool,
    pub followed_user_reviews: bool,
    pub recommendations: bool,
    pub general: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            movie_reviews: PreferenceCategory::MovieReviews.default_enabled(),
            follower_gained: PreferenceCategory::FollowerGained.default_enabled(),
            followed_user_reviews: PreferenceCategory::FollowedUserReviews.default_enabled(),
            recommendations: PreferenceCategory::Recommendations.default_enabled(),
            general: PreferenceCategory::General.default_enabled(),
        }
    }
}

impl NotificationPreferences {
    pub fn get(&self, category: PreferenceCategory) -> bool {
        match category {
            PreferenceCategory::MovieReviews => self.movie_reviews,
            PreferenceCategory::FollowerGained => self.follower_gained,
            PreferenceCategory::FollowedUserReviews => self.followed_user_reviews,
            PreferenceCategory::Recommendations => self.recommendations,
            PreferenceCategory::General => self.general,
        }
    }

    /// Overlay a partial update
    pub fn apply(&mut self, update: &PreferenceUpdate) {
        for category in PreferenceCategory::ALL {
            if let Some(value) = update.get(category) {
                match category {
                    PreferenceCategory::MovieReviews => self.movie_reviews = value,
                    PreferenceCategory::FollowerGained => self.follower_gained = value,
                    PreferenceCategory::FollowedUserReviews => self.followed_user_reviews = value,
                    PreferenceCategory::Recommendations => self.recommendations = value,
                    PreferenceCategory::General => self.general = value,
                }
            }
        }
    }
}

/// Partial preference update; `None` leaves a category untouched
///
/// Unknown keys are ignored so clients may send back the full object they read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movie_reviews: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follower_gained: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followed_user_reviews: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general: Option<bool>,
}

impl PreferenceUpdate {
    pub fn get(&self, category: PreferenceCategory) -> Option<bool> {
        match category {
            PreferenceCategory::MovieReviews => self.movie_reviews,
            PreferenceCategory::FollowerGained => self.follower_gained,
            PreferenceCategory::FollowedUserReviews => self.followed_user_reviews,
            PreferenceCategory::Recommendations => self.recommendations,
            PreferenceCategory::General => self.general,
        }
    }

    pub fn is_empty(&self) -> bool {
        PreferenceCategory::ALL.iter().all(|c| self.get(*c).is_none())
    }

    /// Single-category update
    pub fn only(category: PreferenceCategory, value: bool) -> Self {
        let mut update = Self::default();
        match category {
            PreferenceCategory::MovieReviews => update.movie_reviews = Some(value),
            PreferenceCategory::FollowerGained => update.follower_gained = Some(value),
            PreferenceCategory::FollowedUserReviews => update.followed_user_reviews = Some(value),
            PreferenceCategory::Recommendations => update.recommendations = Some(value),
            PreferenceCategory::General => update.general = Some(value),
        }
        update
    }
}

/// Persistent preference store
#[derive(Clone)]
pub struct PreferenceStore {
    db: SqlitePool,
}

impl PreferenceStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Stored preferences merged over defaults
    pub async fn get_preferences(&self, user_id: &str) -> NotifyResult<NotificationPreferences> {
        let stored = self.stored(user_id).await?;
        let mut preferences = NotificationPreferences::default();
        preferences.apply(&stored);
        Ok(preferences)
    }

    /// Merge a partial update into the stored record
    pub async fn set_preferences(&self, user_id: &str, update: &PreferenceUpdate) -> NotifyResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences
                (user_id, movie_reviews, follower_gained, followed_user_reviews, recommendations, general, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id) DO UPDATE SET
                movie_reviews = COALESCE(excluded.movie_reviews, notification_preferences.movie_reviews),
                follower_gained = COALESCE(excluded.follower_gained, notification_preferences.follower_gained),
                followed_user_reviews = COALESCE(excluded.followed_user_reviews, notification_preferences.followed_user_reviews),
                recommendations = COALESCE(excluded.recommendations, notification_preferences.recommendations),
                general = COALESCE(excluded.general, notification_preferences.general),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(update.movie_reviews)
        .bind(update.follower_gained)
        .bind(update.followed_user_reviews)
        .bind(update.recommendations)
        .bind(update.general)
        .bind(timestamp(Utc::now()))
        .execute(&self.db)
        .await?;

        info!("Updated notification preferences for user: {}", user_id);
        Ok(())
    }

    /// Whether a category is enabled; read failures count as enabled
    pub async fn is_enabled(&self, user_id: &str, category: PreferenceCategory) -> bool {
        match self.get_preferences(user_id).await {
            Ok(preferences) => preferences.get(category),
            Err(e) => {
                warn!(
                    "Error checking {} preference for {}, defaulting to enabled: {}",
                    category.key(),
                    user_id,
                    e
                );
                true
            }
        }
    }

    /// The explicitly stored value for a category, if any
    pub async fn explicit(&self, user_id: &str, category: PreferenceCategory) -> NotifyResult<Option<bool>> {
        let sql = format!(
            "SELECT {} FROM notification_preferences WHERE user_id = ?1",
            category.column()
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => Ok(row.try_get::<Option<bool>, _>(0)?),
            None => Ok(None),
        }
    }

    async fn stored(&self, user_id: &str) -> NotifyResult<PreferenceUpdate> {
        let row = sqlx::query(
            r#"
            SELECT movie_reviews, follower_gained, followed_user_reviews, recommendations, general
            FROM notification_preferences
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(PreferenceUpdate::default());
        };

        Ok(PreferenceUpdate {
            movie_reviews: row.try_get("movie_reviews")?,
            follower_gained: row.try_get("follower_gained")?,
            followed_user_reviews: row.try_get("followed_user_reviews")?,
            recommendations: row.try_get("recommendations")?,
            general: row.try_get("general")?,
        })
    }
}
