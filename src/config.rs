/// Configuration management for the CineShelf notification service
use crate::error::{NotifyError, NotifyResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub push: Option<PushConfig>,
    pub dispatch: DispatchConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    /// When set, internal event endpoints require a matching `X-Internal-Key`
    pub internal_api_key: Option<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

/// Identity-provider token verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Identity-provider project; ID tokens are RS256 and checked against its JWKS
    pub project_id: Option<String>,
    /// HS256 shared secret for development and tests
    pub shared_secret: Option<String>,
}

/// Push provider (FCM HTTP v1) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

/// Fan-out bounds and inbox sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Concurrent push sends per user
    pub push_concurrency: usize,
    /// Concurrent user dispatches per audience
    pub user_concurrency: usize,
    /// Number of inbox records returned by GET /notifications
    pub inbox_page_size: i64,
    /// Tokens unused for this many days are pruned by the maintenance job
    pub stale_token_days: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            push_concurrency: 8,
            user_concurrency: 16,
            inbox_page_size: 50,
            stale_token_days: 270,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_nonempty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> NotifyResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CINESHELF_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("CINESHELF_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| NotifyError::Validation("Invalid port number".to_string()))?;
        let version = env!("CARGO_PKG_VERSION").to_string();
        let internal_api_key = env_nonempty("CINESHELF_INTERNAL_API_KEY");

        let database_path = env::var("CINESHELF_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/cineshelf.sqlite"));

        let project_id = env_nonempty("CINESHELF_AUTH_PROJECT_ID");
        let shared_secret = env_nonempty("CINESHELF_AUTH_SHARED_SECRET");

        let fcm_project = env_nonempty("CINESHELF_FCM_PROJECT_ID");
        let fcm_email = env_nonempty("CINESHELF_FCM_CLIENT_EMAIL");
        let fcm_key = env_nonempty("CINESHELF_FCM_PRIVATE_KEY");
        let push = match (fcm_project, fcm_email, fcm_key) {
            (Some(project_id), Some(client_email), Some(private_key)) => Some(PushConfig {
                project_id,
                client_email,
                // Keys pasted into env files carry literal "\n" sequences
                private_key: private_key.replace("\\n", "\n"),
            }),
            (None, None, None) => None,
            _ => {
                return Err(NotifyError::Validation(
                    "FCM requires project id, client email and private key together".to_string(),
                ))
            }
        };

        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            push_concurrency: env_parse("CINESHELF_PUSH_CONCURRENCY", defaults.push_concurrency),
            user_concurrency: env_parse("CINESHELF_DISPATCH_CONCURRENCY", defaults.user_concurrency),
            inbox_page_size: env_parse("CINESHELF_INBOX_PAGE_SIZE", defaults.inbox_page_size),
            stale_token_days: env_parse("CINESHELF_STALE_TOKEN_DAYS", defaults.stale_token_days),
        };

        let rate_limit = RateLimitConfig {
            enabled: env_parse("CINESHELF_RATE_LIMIT_ENABLED", true),
            requests_per_second: env_parse("CINESHELF_RATE_LIMIT_RPS", 100),
            burst_size: env_parse("CINESHELF_RATE_LIMIT_BURST", 50),
        };

        let logging = LoggingConfig {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            json: env::var("CINESHELF_LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
                internal_api_key,
            },
            storage: StorageConfig { database_path },
            authentication: AuthConfig {
                project_id,
                shared_secret,
            },
            push,
            dispatch,
            rate_limit,
            logging,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> NotifyResult<()> {
        if self.service.hostname.is_empty() {
            return Err(NotifyError::Validation("Hostname cannot be empty".to_string()));
        }

        match (&self.authentication.project_id, &self.authentication.shared_secret) {
            (None, None) => {
                return Err(NotifyError::Validation(
                    "Either an auth project id or a shared secret is required".to_string(),
                ))
            }
            (_, Some(secret)) if secret.len() < 32 => {
                return Err(NotifyError::Validation(
                    "Auth shared secret must be at least 32 characters".to_string(),
                ))
            }
            _ => {}
        }

        if self.dispatch.push_concurrency == 0 || self.dispatch.user_concurrency == 0 {
            return Err(NotifyError::Validation(
                "Dispatch concurrency must be at least 1".to_string(),
            ));
        }

        if self.dispatch.inbox_page_size <= 0 {
            return Err(NotifyError::Validation(
                "Inbox page size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Minimal configuration for tests and local tooling
    pub fn for_testing(shared_secret: &str) -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                version: env!("CARGO_PKG_VERSION").to_string(),
                internal_api_key: None,
            },
            storage: StorageConfig {
                database_path: PathBuf::from(":memory:"),
            },
            authentication: AuthConfig {
                project_id: None,
                shared_secret: Some(shared_secret.to_string()),
            },
            push: None,
            dispatch: DispatchConfig::default(),
            rate_limit: RateLimitConfig {
                enabled: false,
                requests_per_second: 100,
                burst_size: 50,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}
