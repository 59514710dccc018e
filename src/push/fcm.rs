/// Firebase Cloud Messaging (HTTP v1) push provider
///
/// Authenticates with a service account: a signed RS256 assertion is exchanged
/// for an OAuth access token, which is cached until shortly before it expires.
use crate::{
    config::PushConfig,
    error::{NotifyError, NotifyResult},
    models::NotificationPayload,
    push::{PushError, PushProvider},
    tokens::redact,
};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const FCM_BASE_URL: &str = "https://fcm.googleapis.com/v1/projects";
const ICON_PATH: &str = "/icon-192x192.png";
/// Refresh access tokens this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Service account assertion claims
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedAccessToken {
    token: String,
    expires_at: Instant,
}

/// FCM provider
pub struct FcmProvider {
    project_id: String,
    client_email: String,
    signing_key: EncodingKey,
    http_client: reqwest::Client,
    access_token: RwLock<Option<CachedAccessToken>>,
}

impl FcmProvider {
    /// Create a provider from service-account credentials
    pub fn new(config: &PushConfig) -> NotifyResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .map_err(|e| NotifyError::Jwt(format!("Invalid FCM private key: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("CineShelf/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            project_id: config.project_id.clone(),
            client_email: config.client_email.clone(),
            signing_key,
            http_client,
            access_token: RwLock::new(None),
        })
    }

    /// Get a valid access token, exchanging a fresh assertion when needed
    async fn access_token(&self) -> Result<String, PushError> {
        {
            let cached = self.access_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                    return Ok(token.token.clone());
                }
            }
        }

        let mut cached = self.access_token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.token.clone());
            }
        }

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: MESSAGING_SCOPE,
            aud: TOKEN_URL,
            iat: now,
            exp: now + 3600,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| PushError::Transient(format!("Failed to sign assertion: {}", e)))?;

        let response = self
            .http_client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PushError::Transient(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PushError::Transient(format!(
                "Token endpoint returned {}",
                response.status()
            )));
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| PushError::Transient(format!("Invalid token response: {}", e)))?;

        info!("Obtained FCM access token (expires in {}s)", body.expires_in);
        *cached = Some(CachedAccessToken {
            token: body.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });

        Ok(body.access_token)
    }

    async fn invalidate_access_token(&self) {
        *self.access_token.write().await = None;
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    async fn send(&self, token: &str, payload: &NotificationPayload) -> Result<(), PushError> {
        let access_token = self.access_token().await?;
        let url = format!("{}/{}/messages:send", FCM_BASE_URL, self.project_id);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(&build_message(token, payload))
            .send()
            .await
            .map_err(|e| PushError::Transient(format!("FCM request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("Notification sent successfully to token: {}", redact(token));
            return Ok(());
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_access_token().await;
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_failure(status.as_u16(), &body);
        warn!("Failed to send notification to token {}: {}", redact(token), err);
        Err(err)
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}

/// Build the FCM v1 message body
pub fn build_message(token: &str, payload: &NotificationPayload) -> Value {
    let mut notification = json!({
        "title": payload.title,
        "body": payload.body,
    });
    if let Some(image) = &payload.image_url {
        notification["image"] = json!(image);
    }

    let mut webpush_notification = json!({
        "icon": ICON_PATH,
        "badge": ICON_PATH,
    });
    if !payload.data.is_empty() {
        webpush_notification["data"] = json!(payload.data);
    }

    json!({
        "message": {
            "token": token,
            "notification": notification,
            "data": payload.data,
            "webpush": {
                "headers": { "Urgency": "high" },
                "notification": webpush_notification,
            },
        }
    })
}

/// Map an FCM error response onto invalid-token vs transient
pub fn classify_failure(status: u16, body: &str) -> PushError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = &parsed["error"];
    let message = error["message"].as_str().unwrap_or(body).to_string();
    let error_status = error["status"].as_str().unwrap_or_default();

    let error_codes: Vec<&str> = error["details"]
        .as_array()
        .map(|details| {
            details
                .iter()
                .filter_map(|d| d["errorCode"].as_str())
                .collect()
        })
        .unwrap_or_default();

    let unregistered = error_codes
        .iter()
        .any(|c| *c == "UNREGISTERED" || *c == "SENDER_ID_MISMATCH");
    let bad_token = (error_codes.contains(&"INVALID_ARGUMENT") || error_status == "INVALID_ARGUMENT")
        && message.to_lowercase().contains("registration token");
    let not_found = status == 404 && error_status == "NOT_FOUND";

    if unregistered || bad_token || not_found {
        PushError::InvalidToken(message)
    } else {
        PushError::Transient(format!("HTTP {}: {}", status, message))
    }
}
