/// Notification endpoints
///
/// Token registration, preferences and the inbox are per-user and require a
/// bearer ID token. The event endpoints are called by other services and are
/// guarded only by the optional internal API key.
use super::extract::{optional, rating, required, ApiJson};
use crate::{
    auth::{AuthContext, InternalCaller},
    context::AppContext,
    error::{missing_field, NotifyError, NotifyResult},
    events::{RecommendationActivity, ReviewActivity},
    models::InboxNotification,
    preferences::PreferenceUpdate,
};
use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Build notification routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route(
            "/notifications/token",
            post(store_token).delete(remove_token).get(list_tokens),
        )
        .route(
            "/notifications/preferences",
            get(get_preferences).put(update_preferences),
        )
        .route("/notifications/mark-read", post(mark_read))
        .route("/notifications/bulk", post(send_bulk))
        .route("/notifications/general", post(send_general))
        .route("/notifications/follower-gained", post(follower_gained))
        .route("/notifications/movie-review", post(movie_review))
        .route("/notifications/followed-user-review", post(followed_user_review))
        .route("/notifications/recommendation", post(recommendation))
        .route("/notifications/:id", delete(delete_notification))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

async fn store_token(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ApiJson(req): ApiJson<TokenRequest>,
) -> NotifyResult<Json<Value>> {
    let token = required(req.token, "token")?;
    ctx.token_store.store_token(&auth.user_id, &token).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notification token stored successfully"
    })))
}

async fn remove_token(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ApiJson(req): ApiJson<TokenRequest>,
) -> NotifyResult<Json<Value>> {
    let token = required(req.token, "token")?;
    ctx.token_store.remove_token(&auth.user_id, &token).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notification token removed successfully"
    })))
}

async fn list_tokens(State(ctx): State<AppContext>, auth: AuthContext) -> NotifyResult<Json<Value>> {
    let tokens = ctx.token_store.list_tokens(&auth.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "count": tokens.len(),
        "hasTokens": !tokens.is_empty(),
        "tokens": tokens,
    })))
}

async fn get_preferences(State(ctx): State<AppContext>, auth: AuthContext) -> NotifyResult<Json<Value>> {
    let preferences = ctx.preference_store.get_preferences(&auth.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "preferences": preferences
    })))
}

#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    #[serde(default)]
    pub preferences: Option<PreferenceUpdate>,
}

async fn update_preferences(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ApiJson(req): ApiJson<PreferencesRequest>,
) -> NotifyResult<Json<Value>> {
    let update = req.preferences.ok_or_else(|| missing_field("preferences"))?;
    ctx.preference_store.set_preferences(&auth.user_id, &update).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notification preferences updated successfully"
    })))
}

async fn list_notifications(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> NotifyResult<Json<Vec<InboxNotification>>> {
    let notifications = ctx
        .inbox
        .list_latest(&auth.user_id, ctx.config.dispatch.inbox_page_size)
        .await?;

    Ok(Json(notifications))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(default)]
    pub notification_ids: Option<Vec<String>>,
}

async fn mark_read(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ApiJson(req): ApiJson<MarkReadRequest>,
) -> NotifyResult<Json<Value>> {
    let ids = req
        .notification_ids
        .filter(|ids| !ids.is_empty())
        .ok_or_else(|| {
            NotifyError::Validation(
                "Invalid request: notificationIds must be a non-empty array".to_string(),
            )
        })?;

    let updated = ctx.inbox.mark_read(&auth.user_id, &ids).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notifications marked as read.",
        "updated": updated.len()
    })))
}

async fn delete_notification(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> NotifyResult<Json<Value>> {
    ctx.inbox.delete(&auth.user_id, &id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: Option<BTreeMap<String, String>>,
}

async fn send_bulk(
    State(ctx): State<AppContext>,
    _internal: InternalCaller,
    ApiJson(req): ApiJson<BroadcastRequest>,
) -> NotifyResult<Json<Value>> {
    let title = required(req.title, "title")?;
    let body = required(req.body, "body")?;

    let result = ctx.events.bulk(&title, &body, req.data.unwrap_or_default()).await;

    Ok(Json(json!({
        "success": true,
        "message": "Bulk notification sent successfully",
        "result": result
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub content: BroadcastRequest,
}

async fn send_general(
    State(ctx): State<AppContext>,
    _internal: InternalCaller,
    ApiJson(req): ApiJson<GeneralRequest>,
) -> NotifyResult<Json<Value>> {
    let user_id = required(req.user_id, "userId")?;
    let title = required(req.content.title, "title")?;
    let body = required(req.content.body, "body")?;

    let delivered = ctx
        .events
        .general(&user_id, &title, &body, req.content.data.unwrap_or_default())
        .await;

    Ok(Json(json!({
        "success": true,
        "pushDelivered": delivered
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerGainedRequest {
    #[serde(default)]
    pub follower_id: Option<String>,
    #[serde(default)]
    pub follower_name: Option<String>,
    #[serde(default)]
    pub followed_user_id: Option<String>,
}

async fn follower_gained(
    State(ctx): State<AppContext>,
    _internal: InternalCaller,
    ApiJson(req): ApiJson<FollowerGainedRequest>,
) -> NotifyResult<Json<Value>> {
    let follower_id = required(req.follower_id, "followerId")?;
    let followed_user_id = required(req.followed_user_id, "followedUserId")?;
    let follower_name = optional(req.follower_name);

    ctx.events
        .follower_gained(&follower_id, follower_name.as_deref(), &followed_user_id)
        .await;

    Ok(Json(json!({
        "success": true,
        "message": "Follower notification sent successfully"
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewNotificationRequest {
    #[serde(default)]
    pub reviewer_id: Option<String>,
    #[serde(default)]
    pub reviewer_name: Option<String>,
    #[serde(default)]
    pub movie_id: Option<String>,
    #[serde(default)]
    pub movie_title: Option<String>,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub follower_ids: Option<Vec<String>>,
}

impl ReviewNotificationRequest {
    fn activity(&mut self) -> NotifyResult<ReviewActivity> {
        Ok(ReviewActivity {
            reviewer_id: required(self.reviewer_id.take(), "reviewerId")?,
            movie_id: required(self.movie_id.take(), "movieId")?,
            movie_title: required(self.movie_title.take(), "movieTitle")?,
            rating: rating(self.rating)?,
            reviewer_name: optional(self.reviewer_name.take()),
        })
    }
}

async fn movie_review(
    State(ctx): State<AppContext>,
    _internal: InternalCaller,
    ApiJson(mut req): ApiJson<ReviewNotificationRequest>,
) -> NotifyResult<Json<Value>> {
    let activity = req.activity()?;
    let summary = ctx.events.movie_review_watchlist(&activity).await;
    info!(
        "Movie review notifications for {}: {} delivered, {} inbox only",
        activity.movie_id, summary.succeeded, summary.failed
    );

    Ok(Json(json!({
        "success": true,
        "message": "Movie review notification sent successfully"
    })))
}

async fn followed_user_review(
    State(ctx): State<AppContext>,
    _internal: InternalCaller,
    ApiJson(mut req): ApiJson<ReviewNotificationRequest>,
) -> NotifyResult<Json<Value>> {
    let activity = req.activity()?;
    let follower_ids = req.follower_ids.take().ok_or_else(|| missing_field("followerIds"))?;

    ctx.events.followed_user_review(&activity, &follower_ids).await;

    Ok(Json(json!({
        "success": true,
        "message": "Followed user review notification sent successfully",
        "notifiedCount": follower_ids.len()
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    #[serde(default)]
    pub recommender_id: Option<String>,
    #[serde(default)]
    pub recommender_name: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub movie_id: Option<String>,
    #[serde(default)]
    pub movie_title: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn recommendation(
    State(ctx): State<AppContext>,
    _internal: InternalCaller,
    ApiJson(req): ApiJson<RecommendationRequest>,
) -> NotifyResult<Json<Value>> {
    let activity = RecommendationActivity {
        recommender_id: required(req.recommender_id, "recommenderId")?,
        recipient_id: required(req.recipient_id, "recipientId")?,
        movie_id: required(req.movie_id, "movieId")?,
        movie_title: required(req.movie_title, "movieTitle")?,
        recommender_name: optional(req.recommender_name),
        reason: optional(req.reason),
    };

    ctx.events.recommendation(&activity).await;

    Ok(Json(json!({
        "success": true,
        "message": "Recommendation notification sent successfully"
    })))
}
