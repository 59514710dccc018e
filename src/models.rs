/// Shared domain records
use crate::error::{NotifyError, NotifyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of notification, carried in the inbox record and in `data.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    MovieReview,
    FollowerGained,
    FollowedUserReview,
    Recommendation,
    General,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::MovieReview => "movie_review",
            NotificationType::FollowerGained => "follower_gained",
            NotificationType::FollowedUserReview => "followed_user_review",
            NotificationType::Recommendation => "recommendation",
            NotificationType::General => "general",
        }
    }

    pub fn from_str(s: &str) -> NotifyResult<Self> {
        match s {
            "movie_review" => Ok(NotificationType::MovieReview),
            "follower_gained" => Ok(NotificationType::FollowerGained),
            "followed_user_review" => Ok(NotificationType::FollowedUserReview),
            "recommendation" => Ok(NotificationType::Recommendation),
            "general" => Ok(NotificationType::General),
            _ => Err(NotifyError::Validation(format!(
                "Invalid notification type: {}",
                s
            ))),
        }
    }

    /// Preference category that gates this type
    pub fn category(&self) -> PreferenceCategory {
        match self {
            NotificationType::MovieReview => PreferenceCategory::MovieReviews,
            NotificationType::FollowerGained => PreferenceCategory::FollowerGained,
            NotificationType::FollowedUserReview => PreferenceCategory::FollowedUserReviews,
            NotificationType::Recommendation => PreferenceCategory::Recommendations,
            NotificationType::General => PreferenceCategory::General,
        }
    }
}

/// A notification category a user can enable or disable independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreferenceCategory {
    MovieReviews,
    FollowerGained,
    FollowedUserReviews,
    Recommendations,
    General,
}

impl PreferenceCategory {
    pub const ALL: [PreferenceCategory; 5] = [
        PreferenceCategory::MovieReviews,
        PreferenceCategory::FollowerGained,
        PreferenceCategory::FollowedUserReviews,
        PreferenceCategory::Recommendations,
        PreferenceCategory::General,
    ];

    /// Wire key, as used in preference JSON objects
    pub fn key(&self) -> &'static str {
        match self {
            PreferenceCategory::MovieReviews => "movieReviews",
            PreferenceCategory::FollowerGained => "followerGained",
            PreferenceCategory::FollowedUserReviews => "followedUserReviews",
            PreferenceCategory::Recommendations => "recommendations",
            PreferenceCategory::General => "general",
        }
    }

    /// Backing column in `notification_preferences`
    pub fn column(&self) -> &'static str {
        match self {
            PreferenceCategory::MovieReviews => "movie_reviews",
            PreferenceCategory::FollowerGained => "follower_gained",
            PreferenceCategory::FollowedUserReviews => "followed_user_reviews",
            PreferenceCategory::Recommendations => "recommendations",
            PreferenceCategory::General => "general",
        }
    }

    /// System-wide default when nothing is stored
    pub fn default_enabled(&self) -> bool {
        true
    }
}

/// Notification content handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl NotificationPayload {
    /// Build a payload; `data.type` always mirrors the notification type
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
        data: BTreeMap<String, String>,
    ) -> Self {
        let mut data = data;
        data.insert("type".to_string(), notification_type.as_str().to_string());
        Self {
            notification_type,
            title: title.into(),
            body: body.into(),
            data,
            image_url: None,
        }
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

/// In-app inbox record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxNotification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

/// Registered device push token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationToken {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// User profile record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub bio: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Name shown to other users in notification texts
    pub fn public_name(&self) -> String {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.username.as_deref().filter(|n| !n.trim().is_empty()))
            .unwrap_or("Someone")
            .to_string()
    }
}

/// Watchlist entry with denormalized movie display fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistEntry {
    pub user_id: String,
    pub movie_id: String,
    pub title: String,
    pub poster_path: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Movie review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub user_id: String,
    pub movie_id: String,
    pub movie_title: String,
    pub rating: u8,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregated outcome of a multi-user dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_data_carries_type() {
        let payload = NotificationPayload::new(
            NotificationType::Recommendation,
            "Movie Recommendation",
            "body",
            BTreeMap::new(),
        );
        assert_eq!(payload.data.get("type").map(String::as_str), Some("recommendation"));
    }

    #[test]
    fn test_notification_type_round_trip() {
        for t in [
            NotificationType::MovieReview,
            NotificationType::FollowerGained,
            NotificationType::FollowedUserReview,
            NotificationType::Recommendation,
            NotificationType::General,
        ] {
            assert_eq!(NotificationType::from_str(t.as_str()).unwrap(), t);
        }
        assert!(NotificationType::from_str("spam").is_err());
    }

    #[test]
    fn test_each_type_gated_by_its_own_category() {
        assert_eq!(NotificationType::MovieReview.category(), PreferenceCategory::MovieReviews);
        assert_eq!(NotificationType::FollowerGained.category(), PreferenceCategory::FollowerGained);
        assert_eq!(
            NotificationType::FollowedUserReview.category(),
            PreferenceCategory::FollowedUserReviews
        );
        assert_eq!(NotificationType::Recommendation.category(), PreferenceCategory::Recommendations);
        assert_eq!(NotificationType::General.category(), PreferenceCategory::General);
    }

    #[test]
    fn test_public_name_fallbacks() {
        let mut user = User {
            id: "u1".into(),
            display_name: Some("  ".into()),
            username: Some("moviebuff".into()),
            email: None,
            bio: None,
            followers_count: 0,
            following_count: 0,
            created_at: Utc::now(),
        };
        assert_eq!(user.public_name(), "moviebuff");

        user.username = None;
        assert_eq!(user.public_name(), "Someone");

        user.display_name = Some("Ada".into());
        assert_eq!(user.public_name(), "Ada");
    }

    #[test]
    fn test_inbox_serializes_wire_names() {
        let record = InboxNotification {
            id: "n1".into(),
            user_id: "u1".into(),
            notification_type: NotificationType::General,
            title: "t".into(),
            body: "b".into(),
            data: BTreeMap::new(),
            image_url: None,
            created_at: Utc::now(),
            is_read: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "general");
        assert_eq!(json["isRead"], false);
        assert!(json.get("createdAt").is_some());
    }
}
