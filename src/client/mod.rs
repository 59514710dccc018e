/// App-side notification controller
///
/// The controller owns local notification state for one signed-in user and
/// talks to the outside world through two seams: [`PushPlatform`] for the
/// device's push facilities and [`NotificationBackend`] for this service.

pub mod controller;
pub mod http;

pub use controller::{ControllerState, NotificationController};
pub use http::HttpBackend;

use crate::{
    error::NotifyResult,
    models::{InboxNotification, NotificationPayload},
    preferences::{NotificationPreferences, PreferenceUpdate},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Push permission state as reported by the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Not asked yet
    #[default]
    Default,
    Granted,
    Denied,
}

/// Device push facilities
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Whether the platform can receive push notifications at all
    async fn is_supported(&self) -> bool;

    /// Current permission without prompting
    async fn permission(&self) -> Permission;

    /// Show the permission prompt and return the user's answer
    async fn request_permission(&self) -> NotifyResult<Permission>;

    /// Registration token for this device
    async fn registration_token(&self) -> NotifyResult<String>;

    /// Surface a platform-level notification
    async fn show_notification(&self, payload: &NotificationPayload) -> NotifyResult<()>;
}

/// Authenticated calls to the notification service
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    async fn store_token(&self, token: &str) -> NotifyResult<()>;

    async fn delete_token(&self, token: &str) -> NotifyResult<()>;

    async fn list_tokens(&self) -> NotifyResult<Vec<String>>;

    /// Latest inbox page, newest first
    async fn fetch_inbox(&self) -> NotifyResult<Vec<InboxNotification>>;

    async fn mark_read(&self, ids: &[String]) -> NotifyResult<()>;

    async fn get_preferences(&self) -> NotifyResult<NotificationPreferences>;

    async fn put_preferences(&self, update: &PreferenceUpdate) -> NotifyResult<()>;
}
