/// Social graph and movie activity
///
/// Users, follow edges, watchlists and reviews. These are the audience
/// sources the event mappers resolve against.

mod follows;
mod reviews;
mod users;
mod watchlist;

pub use follows::FollowManager;
pub use reviews::ReviewStore;
pub use users::UserStore;
pub use watchlist::WatchlistStore;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

/// Profile upsert request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

/// Follow or unfollow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowAction {
    Follow,
    Unfollow,
}

/// Review submission
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    #[serde(default)]
    #[validate(length(min = 1, message = "Missing required field: movieId"))]
    pub movie_id: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Missing required field: movieTitle"))]
    pub movie_title: String,

    #[serde(default)]
    #[validate(
        required(message = "Missing required field: rating"),
        range(min = 1, max = 10, message = "Rating must be between 1 and 10")
    )]
    pub rating: Option<i64>,

    #[serde(default)]
    #[validate(length(min = 10, message = "Review must be at least 10 characters long"))]
    pub text: String,
}

/// First human-readable message out of a validation failure
pub(crate) fn first_validation_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Invalid request".to_string())
}
