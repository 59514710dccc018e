/// Event-to-notification mappers
///
/// Each mapper resolves the audience for one kind of social event, builds the
/// payload and hands it to the dispatcher. Mappers never return errors: a
/// failed notification must not fail the action that caused it, so every
/// failure is logged here and reported as a zero or partial summary.
use crate::{
    dispatcher::Dispatcher,
    models::{DispatchSummary, NotificationPayload, NotificationType, Review},
    preferences::PreferenceStore,
    social::{FollowManager, UserStore, WatchlistStore},
    tokens::TokenStore,
};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

/// A review that may interest watchers and followers
#[derive(Debug, Clone)]
pub struct ReviewActivity {
    pub reviewer_id: String,
    /// Resolved from the reviewer's profile when absent
    pub reviewer_name: Option<String>,
    pub movie_id: String,
    pub movie_title: String,
    pub rating: u8,
}

impl From<&Review> for ReviewActivity {
    fn from(review: &Review) -> Self {
        Self {
            reviewer_id: review.user_id.clone(),
            reviewer_name: None,
            movie_id: review.movie_id.clone(),
            movie_title: review.movie_title.clone(),
            rating: review.rating,
        }
    }
}

/// A movie recommended from one user to another
#[derive(Debug, Clone)]
pub struct RecommendationActivity {
    pub recommender_id: String,
    pub recommender_name: Option<String>,
    pub recipient_id: String,
    pub movie_id: String,
    pub movie_title: String,
    pub reason: Option<String>,
}

pub fn follower_gained_payload(follower_id: &str, follower_name: &str) -> NotificationPayload {
    let mut data = BTreeMap::new();
    data.insert("followerId".to_string(), follower_id.to_string());
    data.insert("followerName".to_string(), follower_name.to_string());

    NotificationPayload::new(
        NotificationType::FollowerGained,
        "New Follower",
        format!("{} started following you", follower_name),
        data,
    )
}

fn review_body(reviewer_name: &str, movie_title: &str, rating: u8) -> String {
    format!("{} rated \"{}\" {}/10", reviewer_name, movie_title, rating)
}

pub fn movie_review_payload(activity: &ReviewActivity, reviewer_name: &str) -> NotificationPayload {
    let mut data = BTreeMap::new();
    data.insert("movieId".to_string(), activity.movie_id.clone());
    data.insert("reviewerId".to_string(), activity.reviewer_id.clone());
    data.insert("rating".to_string(), activity.rating.to_string());

    NotificationPayload::new(
        NotificationType::MovieReview,
        format!("New Review: {}", activity.movie_title),
        review_body(reviewer_name, &activity.movie_title, activity.rating),
        data,
    )
}

pub fn followed_user_review_payload(activity: &ReviewActivity, reviewer_name: &str) -> NotificationPayload {
    let mut data = BTreeMap::new();
    data.insert("reviewerId".to_string(), activity.reviewer_id.clone());
    data.insert("reviewerName".to_string(), reviewer_name.to_string());
    data.insert("movieId".to_string(), activity.movie_id.clone());
    data.insert("movieTitle".to_string(), activity.movie_title.clone());
    data.insert("rating".to_string(), activity.rating.to_string());

    NotificationPayload::new(
        NotificationType::FollowedUserReview,
        format!("{} reviewed {}", reviewer_name, activity.movie_title),
        review_body(reviewer_name, &activity.movie_title, activity.rating),
        data,
    )
}

pub fn recommendation_payload(activity: &RecommendationActivity, recommender_name: &str) -> NotificationPayload {
    let reason = activity
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let body = match reason {
        Some(reason) => format!(
            "{} thinks you'll love \"{}\" - {}",
            recommender_name, activity.movie_title, reason
        ),
        None => format!("{} recommended \"{}\" to you", recommender_name, activity.movie_title),
    };

    let mut data = BTreeMap::new();
    data.insert("recommenderId".to_string(), activity.recommender_id.clone());
    data.insert("recommenderName".to_string(), recommender_name.to_string());
    data.insert("movieId".to_string(), activity.movie_id.clone());
    data.insert("movieTitle".to_string(), activity.movie_title.clone());
    data.insert("reason".to_string(), reason.unwrap_or_default().to_string());

    NotificationPayload::new(NotificationType::Recommendation, "Movie Recommendation", body, data)
}

/// Event mappers over the dispatcher and the audience sources
#[derive(Clone)]
pub struct EventMappers {
    dispatcher: Dispatcher,
    preferences: PreferenceStore,
    tokens: TokenStore,
    users: UserStore,
    follows: FollowManager,
    watchlist: WatchlistStore,
}

impl EventMappers {
    pub fn new(
        dispatcher: Dispatcher,
        preferences: PreferenceStore,
        tokens: TokenStore,
        users: UserStore,
        follows: FollowManager,
        watchlist: WatchlistStore,
    ) -> Self {
        Self {
            dispatcher,
            preferences,
            tokens,
            users,
            follows,
            watchlist,
        }
    }

    /// Notify a user that someone started following them
    ///
    /// Skipped only when the target explicitly turned the category off.
    pub async fn follower_gained(
        &self,
        follower_id: &str,
        follower_name: Option<&str>,
        followed_user_id: &str,
    ) -> bool {
        match self
            .preferences
            .explicit(followed_user_id, NotificationType::FollowerGained.category())
            .await
        {
            Ok(Some(false)) => {
                info!("{} has follower notifications disabled", followed_user_id);
                return false;
            }
            Ok(_) => {}
            Err(e) => warn!(
                "Could not read follower preference for {}, delivering anyway: {}",
                followed_user_id, e
            ),
        }

        let name = self.resolve_name(follower_id, follower_name).await;
        let payload = follower_gained_payload(follower_id, &name);
        self.dispatch_one(followed_user_id, &payload).await
    }

    /// Notify everyone with the movie on their watchlist, except the reviewer
    pub async fn movie_review_watchlist(&self, activity: &ReviewActivity) -> DispatchSummary {
        let watchers = match self.watchlist.watchers(&activity.movie_id).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Error resolving watchers of movie {}: {}", activity.movie_id, e);
                return DispatchSummary::default();
            }
        };

        let mut audience = Vec::new();
        for user_id in watchers.into_iter().filter(|id| *id != activity.reviewer_id) {
            if self
                .preferences
                .is_enabled(&user_id, NotificationType::MovieReview.category())
                .await
            {
                audience.push(user_id);
            }
        }

        if audience.is_empty() {
            info!("No watchers to notify about review of movie {}", activity.movie_id);
            return DispatchSummary::default();
        }

        let name = self
            .resolve_name(&activity.reviewer_id, activity.reviewer_name.as_deref())
            .await;
        let mut payload = movie_review_payload(activity, &name);
        if let Some(image) = self.poster_url(&activity.movie_id).await {
            payload = payload.with_image(image);
        }

        let summary = self.dispatcher.dispatch_to_users(&audience, &payload).await;
        info!(
            "Movie review notification stored for {} users. Push notifications sent: {} successful, {} failed",
            audience.len(),
            summary.succeeded,
            summary.failed
        );
        summary
    }

    /// Notify a caller-resolved list of followers about a review
    pub async fn followed_user_review(&self, activity: &ReviewActivity, follower_ids: &[String]) -> DispatchSummary {
        if follower_ids.is_empty() {
            return DispatchSummary::default();
        }

        let name = self
            .resolve_name(&activity.reviewer_id, activity.reviewer_name.as_deref())
            .await;
        let payload = followed_user_review_payload(activity, &name);

        let summary = self.dispatcher.dispatch_to_users(follower_ids, &payload).await;
        info!(
            "Followed user review notification stored for {} followers. Push notifications sent: {} successful, {} failed",
            follower_ids.len(),
            summary.succeeded,
            summary.failed
        );
        summary
    }

    /// Fan a freshly stored review out to watchers and to the reviewer's followers
    pub async fn review_created(&self, review: &Review) {
        let activity = ReviewActivity::from(review);
        self.movie_review_watchlist(&activity).await;

        match self.follows.followers(&review.user_id).await {
            Ok(followers) => {
                self.followed_user_review(&activity, &followers).await;
            }
            Err(e) => error!("Error resolving followers of {}: {}", review.user_id, e),
        }
    }

    /// Notify a single recipient about a recommendation
    pub async fn recommendation(&self, activity: &RecommendationActivity) -> bool {
        if !self
            .preferences
            .is_enabled(&activity.recipient_id, NotificationType::Recommendation.category())
            .await
        {
            info!("{} has recommendations disabled", activity.recipient_id);
            return false;
        }

        let name = self
            .resolve_name(&activity.recommender_id, activity.recommender_name.as_deref())
            .await;
        let payload = recommendation_payload(activity, &name);
        self.dispatch_one(&activity.recipient_id, &payload).await
    }

    /// General notification to one user
    pub async fn general(&self, user_id: &str, title: &str, body: &str, data: BTreeMap<String, String>) -> bool {
        if !self.preferences.is_enabled(user_id, NotificationType::General.category()).await {
            info!("{} has general notifications disabled", user_id);
            return false;
        }

        let payload = NotificationPayload::new(NotificationType::General, title, body, data);
        self.dispatch_one(user_id, &payload).await
    }

    /// Announcement to every user that owns at least one token
    pub async fn bulk(&self, title: &str, body: &str, data: BTreeMap<String, String>) -> DispatchSummary {
        let audience = match self.tokens.users_with_tokens().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Error resolving bulk audience: {}", e);
                return DispatchSummary::default();
            }
        };

        let payload = NotificationPayload::new(NotificationType::General, title, body, data);
        let summary = self.dispatcher.dispatch_to_users(&audience, &payload).await;
        info!("Sent bulk notification to {} users", audience.len());
        summary
    }

    async fn dispatch_one(&self, user_id: &str, payload: &NotificationPayload) -> bool {
        match self.dispatcher.dispatch_to_user(user_id, payload).await {
            Ok(delivered) => delivered,
            Err(e) => {
                error!(
                    "Error sending {} notification to {}: {}",
                    payload.notification_type.as_str(),
                    user_id,
                    e
                );
                false
            }
        }
    }

    async fn resolve_name(&self, user_id: &str, supplied: Option<&str>) -> String {
        match supplied.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => self.users.display_name(user_id).await,
        }
    }

    async fn poster_url(&self, movie_id: &str) -> Option<String> {
        match self.watchlist.poster_path(movie_id).await {
            Ok(Some(path)) if path.starts_with("http") => Some(path),
            Ok(Some(path)) => Some(format!("{}/{}", POSTER_BASE_URL, path.trim_start_matches('/'))),
            Ok(None) => None,
            Err(e) => {
                warn!("Poster lookup failed for movie {}: {}", movie_id, e);
                None
            }
        }
    }
}
