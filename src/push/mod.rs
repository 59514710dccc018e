/// Push delivery
///
/// The dispatcher talks to push infrastructure only through [`PushProvider`],
/// so delivery can be swapped between FCM, a disabled provider, or a test
/// double without touching fan-out logic.

pub mod fcm;

pub use fcm::FcmProvider;

use crate::models::NotificationPayload;
use async_trait::async_trait;
use thiserror::Error;

/// Classified push failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// The token is permanently unusable and should be pruned
    #[error("Registration token is invalid: {0}")]
    InvalidToken(String),

    /// Anything that might succeed later; logged and counted, never retried
    #[error("Transient push failure: {0}")]
    Transient(String),

    /// No provider is configured for this deployment
    #[error("Push provider not configured")]
    NotConfigured,
}

impl PushError {
    /// Metric label for this outcome
    pub fn outcome(&self) -> &'static str {
        match self {
            PushError::InvalidToken(_) => "invalid_token",
            PushError::Transient(_) => "transient",
            PushError::NotConfigured => "not_configured",
        }
    }
}

/// Push provider backend trait
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Deliver a payload to a single device token
    async fn send(&self, token: &str, payload: &NotificationPayload) -> Result<(), PushError>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}

/// Provider used when no push credentials are configured
///
/// Every send fails with [`PushError::NotConfigured`]; inbox delivery is
/// unaffected.
#[derive(Debug, Clone, Default)]
pub struct DisabledPushProvider;

#[async_trait]
impl PushProvider for DisabledPushProvider {
    async fn send(&self, _token: &str, _payload: &NotificationPayload) -> Result<(), PushError> {
        Err(PushError::NotConfigured)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationType;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_disabled_provider_never_delivers() {
        let provider = DisabledPushProvider;
        let payload = NotificationPayload::new(NotificationType::General, "t", "b", BTreeMap::new());

        assert_eq!(provider.send("T1", &payload).await, Err(PushError::NotConfigured));
        assert_eq!(PushError::NotConfigured.outcome(), "not_configured");
    }
}
