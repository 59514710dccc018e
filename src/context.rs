/// Application context and dependency injection
///
/// Everything shared across requests is built once here at startup: one
/// database pool, one push client, one token verifier.
use crate::{
    auth::IdTokenVerifier,
    config::ServerConfig,
    db,
    dispatcher::Dispatcher,
    error::{NotifyError, NotifyResult},
    events::EventMappers,
    inbox::InboxStore,
    preferences::PreferenceStore,
    push::{DisabledPushProvider, FcmProvider, PushProvider},
    rate_limit::RateLimiter,
    social::{FollowManager, ReviewStore, UserStore, WatchlistStore},
    tokens::TokenStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub token_store: TokenStore,
    pub preference_store: PreferenceStore,
    pub inbox: InboxStore,
    pub dispatcher: Dispatcher,
    pub events: EventMappers,
    // Social graph and activity
    pub users: UserStore,
    pub follows: FollowManager,
    pub watchlist: WatchlistStore,
    pub reviews: ReviewStore,
    pub verifier: Arc<IdTokenVerifier>,
    pub rate_limiter: RateLimiter,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> NotifyResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let pool = db::create_pool(&config.storage.database_path, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let push: Arc<dyn PushProvider> = match &config.push {
            Some(push_config) => {
                info!("FCM push enabled for project {}", push_config.project_id);
                Arc::new(FcmProvider::new(push_config)?)
            }
            None => {
                info!("No push credentials configured; notifications are inbox-only");
                Arc::new(DisabledPushProvider)
            }
        };

        Self::with_pool(config, pool, push)
    }

    /// Assemble a context over an existing pool and push provider
    pub fn with_pool(config: ServerConfig, db: SqlitePool, push: Arc<dyn PushProvider>) -> NotifyResult<Self> {
        let token_store = TokenStore::new(db.clone());
        let preference_store = PreferenceStore::new(db.clone());
        let inbox = InboxStore::new(db.clone());
        let users = UserStore::new(db.clone());
        let follows = FollowManager::new(db.clone());
        let watchlist = WatchlistStore::new(db.clone());
        let reviews = ReviewStore::new(db.clone());

        let dispatcher = Dispatcher::new(
            token_store.clone(),
            inbox.clone(),
            push,
            config.dispatch.push_concurrency,
            config.dispatch.user_concurrency,
        );

        let events = EventMappers::new(
            dispatcher.clone(),
            preference_store.clone(),
            token_store.clone(),
            users.clone(),
            follows.clone(),
            watchlist.clone(),
        );

        let verifier = Arc::new(IdTokenVerifier::new(&config.authentication)?);
        let rate_limiter = RateLimiter::new(&config.rate_limit);

        Ok(Self {
            config: Arc::new(config),
            db,
            token_store,
            preference_store,
            inbox,
            dispatcher,
            events,
            users,
            follows,
            watchlist,
            reviews,
            verifier,
            rate_limiter,
        })
    }

    /// Ensure the database directory exists
    async fn ensure_directories(config: &ServerConfig) -> NotifyResult<()> {
        if let Some(dir) = config.storage.database_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    NotifyError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
