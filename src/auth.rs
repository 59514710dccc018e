/// Authentication extractors and ID-token verification
///
/// Callers present an identity-provider ID token as a bearer token. Tokens
/// signed RS256 are checked against the provider's published JWKS for the
/// configured project; HS256 tokens are accepted only when a shared secret is
/// configured (development and tests).
use crate::{
    config::AuthConfig,
    context::AppContext,
    error::{NotifyError, NotifyResult},
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use jsonwebtoken::{
    decode, decode_header,
    jwk::JwkSet,
    Algorithm, DecodingKey, Validation,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const JWKS_TTL: Duration = Duration::from_secs(3600);
/// Allowed clock skew in seconds
const LEEWAY: u64 = 300;

/// Header carrying the internal API key
pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// ID token claims we rely on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies bearer ID tokens
pub struct IdTokenVerifier {
    project_id: Option<String>,
    shared_secret: Option<DecodingKey>,
    http_client: reqwest::Client,
    jwks: RwLock<Option<CachedJwks>>,
}

impl IdTokenVerifier {
    pub fn new(config: &AuthConfig) -> NotifyResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            project_id: config.project_id.clone(),
            shared_secret: config
                .shared_secret
                .as_ref()
                .map(|s| DecodingKey::from_secret(s.as_bytes())),
            http_client,
            jwks: RwLock::new(None),
        })
    }

    /// Verify a token and return its claims
    pub async fn verify(&self, token: &str) -> NotifyResult<IdTokenClaims> {
        let header = decode_header(token)
            .map_err(|e| NotifyError::Authentication(format!("Invalid token: {}", e)))?;

        let claims = match header.alg {
            Algorithm::HS256 => {
                let key = self.shared_secret.as_ref().ok_or_else(|| {
                    NotifyError::Authentication("Invalid token: unsupported algorithm".to_string())
                })?;
                let mut validation = Validation::new(Algorithm::HS256);
                validation.leeway = LEEWAY;
                validation.validate_aud = false;
                decode_claims(token, key, &validation)?
            }
            Algorithm::RS256 => {
                let project_id = self.project_id.as_deref().ok_or_else(|| {
                    NotifyError::Authentication("Invalid token: unsupported algorithm".to_string())
                })?;
                let kid = header
                    .kid
                    .ok_or_else(|| NotifyError::Authentication("Invalid token: missing key id".to_string()))?;
                let key = self.signing_key(&kid).await?;

                let mut validation = Validation::new(Algorithm::RS256);
                validation.leeway = LEEWAY;
                validation.set_audience(&[project_id]);
                validation.set_issuer(&[format!("{}{}", ISSUER_PREFIX, project_id)]);
                decode_claims(token, &key, &validation)?
            }
            other => {
                return Err(NotifyError::Authentication(format!(
                    "Invalid token: unsupported algorithm {:?}",
                    other
                )))
            }
        };

        if claims.sub.trim().is_empty() {
            return Err(NotifyError::Authentication("Invalid token: missing subject".to_string()));
        }

        Ok(claims)
    }

    /// Decoding key for a key id, refetching the JWKS when stale or unknown
    async fn signing_key(&self, kid: &str) -> NotifyResult<DecodingKey> {
        {
            let cached = self.jwks.read().await;
            if let Some(jwks) = cached.as_ref() {
                if jwks.fetched_at.elapsed() < JWKS_TTL {
                    if let Some(jwk) = jwks.keys.find(kid) {
                        return DecodingKey::from_jwk(jwk)
                            .map_err(|e| NotifyError::Jwt(format!("Unusable signing key: {}", e)));
                    }
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let key = keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| NotifyError::Jwt(format!("Unusable signing key: {}", e)))?
            .ok_or_else(|| NotifyError::Authentication("Invalid token: unknown key id".to_string()))?;

        *self.jwks.write().await = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(key)
    }

    async fn fetch_jwks(&self) -> NotifyResult<JwkSet> {
        debug!("Fetching identity provider JWKS");
        let response = self
            .http_client
            .get(JWKS_URL)
            .send()
            .await
            .map_err(|e| NotifyError::Internal(format!("JWKS fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifyError::Internal(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| NotifyError::Internal(format!("Invalid JWKS document: {}", e)))?;

        info!("Loaded {} identity provider signing keys", keys.keys.len());
        Ok(keys)
    }
}

fn decode_claims(token: &str, key: &DecodingKey, validation: &Validation) -> NotifyResult<IdTokenClaims> {
    decode::<IdTokenClaims>(token, key, validation)
        .map(|data| data.claims)
        .map_err(|e| {
            warn!("ID token verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    NotifyError::Authentication("Token has expired".to_string())
                }
                _ => NotifyError::Authentication("Invalid token".to_string()),
            }
        })
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: Option<String>,
}

impl AuthContext {
    pub async fn from_token(state: &AppContext, token: &str) -> NotifyResult<Self> {
        let claims = state.verifier.verify(token).await?;
        Ok(AuthContext {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = NotifyError;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| NotifyError::Authentication("Unauthorized".to_string()))?;

        AuthContext::from_token(state, &token).await
    }
}

/// Guard for service-to-service endpoints
///
/// Passes through when no internal key is configured.
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

#[async_trait]
impl FromRequestParts<AppContext> for InternalCaller {
    type Rejection = NotifyError;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.service.internal_api_key.as_deref() else {
            return Ok(InternalCaller);
        };

        let supplied = parts
            .headers
            .get(INTERNAL_KEY_HEADER)
            .and_then(|h| h.to_str().ok());

        match supplied {
            Some(key) if keys_match(key, expected) => Ok(InternalCaller),
            Some(_) => Err(NotifyError::Authorization("Invalid internal API key".to_string())),
            None => Err(NotifyError::Authentication("Unauthorized".to_string())),
        }
    }
}

/// Compare keys without short-circuiting on the first differing byte
fn keys_match(supplied: &str, expected: &str) -> bool {
    let (a, b) = (supplied.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
