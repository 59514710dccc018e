/// Social endpoints: profiles, follows, watchlists and reviews
///
/// Actions that produce notifications fire their mappers after the primary
/// write has committed; notification failures never change the response.
use super::extract::{optional, required, ApiJson};
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{NotifyError, NotifyResult},
    models::{Review, User, WatchlistEntry},
    social::{FollowAction, NewReview, ProfileUpdate},
};
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Build social routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/social/follow", post(follow))
        .route("/users/me", put(update_profile))
        .route("/users/:uid", get(get_user))
        .route("/watchlist", get(list_watchlist))
        .route(
            "/watchlist/:movie_id",
            put(add_to_watchlist).delete(remove_from_watchlist),
        )
        .route("/reviews", post(create_review))
        .route("/movies/:movie_id/reviews", get(list_movie_reviews))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequest {
    #[serde(default)]
    pub target_user_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

async fn follow(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ApiJson(req): ApiJson<FollowRequest>,
) -> NotifyResult<Json<Value>> {
    let target_id = required(req.target_user_id, "targetUserId")?;
    let action = required(req.action, "action")?;
    let action = match action.as_str() {
        "follow" => FollowAction::Follow,
        "unfollow" => FollowAction::Unfollow,
        other => {
            return Err(NotifyError::Validation(format!(
                "Invalid action: {}. Must be 'follow' or 'unfollow'",
                other
            )))
        }
    };

    match action {
        FollowAction::Follow => {
            ctx.follows.follow(&auth.user_id, &target_id).await?;
            ctx.events.follower_gained(&auth.user_id, None, &target_id).await;
        }
        FollowAction::Unfollow => {
            ctx.follows.unfollow(&auth.user_id, &target_id).await?;
        }
    }

    Ok(Json(json!({
        "success": true,
        "action": action,
        "targetUserId": target_id
    })))
}

async fn update_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ApiJson(mut update): ApiJson<ProfileUpdate>,
) -> NotifyResult<Json<User>> {
    // Fall back to the verified email on first save
    if update.email.is_none() {
        update.email = auth.email.clone();
    }
    let user = ctx.users.upsert_profile(&auth.user_id, &update).await?;
    Ok(Json(user))
}

async fn get_user(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(uid): Path<String>,
) -> NotifyResult<Json<User>> {
    let mut user = ctx
        .users
        .get_user(&uid)
        .await?
        .ok_or_else(|| NotifyError::NotFound(format!("User {} not found", uid)))?;

    // Email is private
    user.email = None;
    Ok(Json(user))
}

async fn list_watchlist(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> NotifyResult<Json<Vec<WatchlistEntry>>> {
    Ok(Json(ctx.watchlist.list(&auth.user_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
}

async fn add_to_watchlist(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(movie_id): Path<String>,
    ApiJson(req): ApiJson<WatchlistRequest>,
) -> NotifyResult<Json<WatchlistEntry>> {
    let title = required(req.title, "title")?;
    let poster_path = optional(req.poster_path);

    let entry = ctx
        .watchlist
        .add(&auth.user_id, &movie_id, &title, poster_path.as_deref())
        .await?;
    Ok(Json(entry))
}

async fn remove_from_watchlist(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(movie_id): Path<String>,
) -> NotifyResult<Json<Value>> {
    if !ctx.watchlist.remove(&auth.user_id, &movie_id).await? {
        return Err(NotifyError::NotFound(format!("Movie {} is not on your watchlist", movie_id)));
    }
    Ok(Json(json!({ "success": true })))
}

async fn create_review(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ApiJson(req): ApiJson<NewReview>,
) -> NotifyResult<Json<Review>> {
    let review = ctx.reviews.create(&auth.user_id, req).await?;
    ctx.events.review_created(&review).await;

    Ok(Json(review))
}

async fn list_movie_reviews(
    State(ctx): State<AppContext>,
    Path(movie_id): Path<String>,
) -> NotifyResult<Json<Vec<Review>>> {
    Ok(Json(ctx.reviews.list_for_movie(&movie_id).await?))
}
