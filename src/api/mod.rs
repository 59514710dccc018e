/// API routes and handlers
pub mod extract;
pub mod health;
pub mod notifications;
pub mod social;
pub mod stream;

pub use extract::ApiJson;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(notifications::routes())
        .merge(stream::routes())
        .merge(social::routes())
}
