//! CineShelf notification service
//!
//! Push token registry, per-user notification preferences, a persistent
//! inbox with a live stream, and the event mappers that turn social activity
//! (follows, reviews, recommendations) into notifications. The `client`
//! module holds the app-side controller that talks to this service.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod inbox;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod preferences;
pub mod push;
pub mod rate_limit;
pub mod server;
pub mod social;
pub mod tokens;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{NotifyError, NotifyResult};
