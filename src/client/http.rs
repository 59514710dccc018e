/// reqwest implementation of the notification backend
use super::NotificationBackend;
use crate::{
    error::{NotifyError, NotifyResult},
    models::InboxNotification,
    preferences::{NotificationPreferences, PreferenceUpdate},
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the notification service, authenticated with an ID token
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    id_token: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenList {
    #[serde(default)]
    tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PreferencesBody {
    preferences: NotificationPreferences,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, id_token: impl Into<String>) -> NotifyResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            id_token: id_token.into(),
            client,
        })
    }

    /// WebSocket URL of the live inbox, with the ID token as a query parameter
    pub fn stream_url(&self) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!(
            "{}/notifications/stream?token={}",
            ws_base,
            urlencoding::encode(&self.id_token)
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.id_token)
    }

    async fn send(&self, builder: RequestBuilder) -> NotifyResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| NotifyError::Internal(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());
        debug!("Notification service returned {}: {}", status, message);

        Err(match status {
            StatusCode::UNAUTHORIZED => NotifyError::Authentication(message),
            StatusCode::FORBIDDEN => NotifyError::Authorization(message),
            StatusCode::BAD_REQUEST => NotifyError::Validation(message),
            StatusCode::NOT_FOUND => NotifyError::NotFound(message),
            StatusCode::CONFLICT => NotifyError::Conflict(message),
            _ => NotifyError::Internal(message),
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> NotifyResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| NotifyError::Internal(format!("Invalid response body: {}", e)))
    }
}

#[async_trait]
impl NotificationBackend for HttpBackend {
    async fn store_token(&self, token: &str) -> NotifyResult<()> {
        self.send(
            self.request(Method::POST, "/notifications/token")
                .json(&json!({ "token": token })),
        )
        .await?;
        Ok(())
    }

    async fn delete_token(&self, token: &str) -> NotifyResult<()> {
        self.send(
            self.request(Method::DELETE, "/notifications/token")
                .json(&json!({ "token": token })),
        )
        .await?;
        Ok(())
    }

    async fn list_tokens(&self) -> NotifyResult<Vec<String>> {
        let response = self.send(self.request(Method::GET, "/notifications/token")).await?;
        Ok(Self::decode::<TokenList>(response).await?.tokens)
    }

    async fn fetch_inbox(&self) -> NotifyResult<Vec<InboxNotification>> {
        let response = self.send(self.request(Method::GET, "/notifications")).await?;
        Self::decode(response).await
    }

    async fn mark_read(&self, ids: &[String]) -> NotifyResult<()> {
        self.send(
            self.request(Method::POST, "/notifications/mark-read")
                .json(&json!({ "notificationIds": ids })),
        )
        .await?;
        Ok(())
    }

    async fn get_preferences(&self) -> NotifyResult<NotificationPreferences> {
        let response = self
            .send(self.request(Method::GET, "/notifications/preferences"))
            .await?;
        Ok(Self::decode::<PreferencesBody>(response).await?.preferences)
    }

    async fn put_preferences(&self, update: &PreferenceUpdate) -> NotifyResult<()> {
        self.send(
            self.request(Method::PUT, "/notifications/preferences")
                .json(&json!({ "preferences": update })),
        )
        .await?;
        Ok(())
    }
}
