/// Notification Dispatcher
///
/// Turns a payload plus an audience into push attempts and inbox writes.
/// Pushes fan out with bounded concurrency; one token or user failing never
/// blocks or fails the others. The inbox record is written for every target
/// regardless of push outcome.
use crate::{
    error::NotifyResult,
    inbox::InboxStore,
    metrics,
    models::{DispatchSummary, NotificationPayload},
    push::{PushError, PushProvider},
    tokens::{redact, TokenStore},
};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of a single token send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOutcome {
    pub token: String,
    pub delivered: bool,
    pub pruned: bool,
}

/// Notification dispatcher
#[derive(Clone)]
pub struct Dispatcher {
    tokens: TokenStore,
    inbox: InboxStore,
    provider: Arc<dyn PushProvider>,
    push_concurrency: usize,
    user_concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        tokens: TokenStore,
        inbox: InboxStore,
        provider: Arc<dyn PushProvider>,
        push_concurrency: usize,
        user_concurrency: usize,
    ) -> Self {
        Self {
            tokens,
            inbox,
            provider,
            push_concurrency: push_concurrency.max(1),
            user_concurrency: user_concurrency.max(1),
        }
    }

    /// Push to every token of a user and record one inbox entry
    ///
    /// Returns whether at least one token accepted the push. Errors only when
    /// the inbox write itself fails.
    pub async fn dispatch_to_user(&self, user_id: &str, payload: &NotificationPayload) -> NotifyResult<bool> {
        let tokens = match self.tokens.list_tokens(user_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Could not load tokens for {}, skipping push: {}", user_id, e);
                Vec::new()
            }
        };

        let delivered = if tokens.is_empty() {
            debug!("No notification tokens found for user: {}", user_id);
            false
        } else {
            let outcomes = self.push_to_tokens(&tokens, payload).await;
            let pruned = outcomes.iter().filter(|o| o.pruned).count();
            if pruned > 0 {
                info!("Pruned {} invalid token(s) for user: {}", pruned, user_id);
            }
            outcomes.iter().any(|o| o.delivered)
        };

        self.inbox.append(user_id, payload).await?;
        metrics::record_dispatch(payload.notification_type.as_str(), delivered);

        if delivered {
            info!("Sent push and stored in-app notification for user: {}", user_id);
        } else {
            info!("Stored in-app notification for user {} (no push delivered)", user_id);
        }

        Ok(delivered)
    }

    /// Dispatch to many users, isolating per-user failures
    ///
    /// Duplicate ids are collapsed so each user gets exactly one inbox entry.
    /// Dispatches start in input order; completion order is unspecified.
    pub async fn dispatch_to_users(&self, user_ids: &[String], payload: &NotificationPayload) -> DispatchSummary {
        let mut seen = HashSet::new();
        let audience: Vec<String> = user_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        // Items must be owned for the returned future to be Send
        let results: Vec<bool> = stream::iter(audience)
            .map(|user_id| {
                let this = self.clone();
                let payload = payload.clone();
                async move {
                    match this.dispatch_to_user(&user_id, &payload).await {
                        Ok(delivered) => delivered,
                        Err(e) => {
                            error!("Dispatch to {} failed: {}", user_id, e);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.user_concurrency)
            .collect()
            .await;

        let succeeded = results.iter().filter(|d| **d).count();
        DispatchSummary {
            succeeded,
            failed: results.len() - succeeded,
        }
    }

    /// Send to each token with bounded concurrency
    pub async fn push_to_tokens(&self, tokens: &[String], payload: &NotificationPayload) -> Vec<TokenOutcome> {
        stream::iter(tokens.iter().cloned())
            .map(|token| {
                let this = self.clone();
                let payload = payload.clone();
                async move { this.push_one(token, &payload).await }
            })
            .buffer_unordered(self.push_concurrency)
            .collect()
            .await
    }

    async fn push_one(&self, token: String, payload: &NotificationPayload) -> TokenOutcome {
        match self.provider.send(&token, payload).await {
            Ok(()) => {
                metrics::record_push("delivered");
                if let Err(e) = self.tokens.touch_token(&token).await {
                    warn!("Failed to refresh last_used for {}: {}", redact(&token), e);
                }
                TokenOutcome {
                    token,
                    delivered: true,
                    pruned: false,
                }
            }
            Err(err) => {
                metrics::record_push(err.outcome());
                let mut pruned = false;

                match &err {
                    PushError::InvalidToken(reason) => {
                        warn!("Token {} rejected by {}: {}", redact(&token), self.provider.name(), reason);
                        // Best-effort; a failed cleanup does not fail the dispatch
                        match self.tokens.prune_invalid_token(&token).await {
                            Ok(removed) => {
                                if removed {
                                    metrics::record_token_pruned();
                                }
                                pruned = removed;
                            }
                            Err(e) => warn!("Error removing invalid token {}: {}", redact(&token), e),
                        }
                    }
                    PushError::Transient(reason) => {
                        warn!("Push to {} failed: {}", redact(&token), reason);
                    }
                    PushError::NotConfigured => {
                        debug!("Push provider not configured, skipping {}", redact(&token));
                    }
                }

                TokenOutcome {
                    token,
                    delivered: false,
                    pruned,
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Push provider with scripted per-token results; unknown tokens succeed
    #[derive(Default)]
    pub struct ScriptedProvider {
        pub outcomes: HashMap<String, PushError>,
        pub sent: Mutex<Vec<String>>,
        pub delay: Option<Duration>,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn failing(pairs: &[(&str, PushError)]) -> Self {
            Self {
                outcomes: pairs
                    .iter()
                    .map(|(t, e)| (t.to_string(), e.clone()))
                    .collect(),
                ..Default::default()
            }
        }

        /// Every send sleeps for `delay` before answering
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushProvider for ScriptedProvider {
        async fn send(&self, token: &str, _payload: &NotificationPayload) -> Result<(), PushError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.sent.lock().unwrap().push(token.to_string());
            match self.outcomes.get(token) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;
    use crate::db::create_memory_pool;
    use crate::models::NotificationType;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn payload() -> NotificationPayload {
        NotificationPayload::new(NotificationType::General, "Hello", "World", BTreeMap::new())
    }

    async fn setup(provider: Arc<ScriptedProvider>, push_concurrency: usize) -> (Dispatcher, TokenStore, InboxStore) {
        let db = create_memory_pool().await.unwrap();
        let tokens = TokenStore::new(db.clone());
        let inbox = InboxStore::new(db);
        let dispatcher = Dispatcher::new(tokens.clone(), inbox.clone(), provider, push_concurrency, 4);
        (dispatcher, tokens, inbox)
    }

    #[tokio::test]
    async fn test_user_without_tokens_gets_inbox_only() {
        let provider = Arc::new(ScriptedProvider::default());
        let (dispatcher, _, inbox) = setup(provider.clone(), 4).await;

        let delivered = dispatcher.dispatch_to_user("alice", &payload()).await.unwrap();

        assert!(!delivered);
        assert!(provider.sent().is_empty());
        let list = inbox.list_latest("alice", 50).await.unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list[0].is_read);
    }

    #[tokio::test]
    async fn test_invalid_token_pruned_and_others_still_sent() {
        let provider = Arc::new(ScriptedProvider::failing(&[
            ("dead", PushError::InvalidToken("UNREGISTERED".into())),
            ("flaky", PushError::Transient("503".into())),
        ]));
        let (dispatcher, tokens, inbox) = setup(provider.clone(), 4).await;
        for t in ["dead", "flaky", "good"] {
            tokens.store_token("alice", t).await.unwrap();
        }

        let delivered = dispatcher.dispatch_to_user("alice", &payload()).await.unwrap();

        assert!(delivered);
        assert_eq!(provider.sent().len(), 3);
        let mut remaining = tokens.list_tokens("alice").await.unwrap();
        remaining.sort();
        assert_eq!(remaining, vec!["flaky".to_string(), "good".to_string()]);
        assert_eq!(inbox.list_latest("alice", 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_token_outcomes_flag_pruned_tokens() {
        let provider = Arc::new(ScriptedProvider::failing(&[
            ("dead", PushError::InvalidToken("UNREGISTERED".into())),
            ("flaky", PushError::Transient("503".into())),
        ]));
        let (dispatcher, tokens, _) = setup(provider, 4).await;
        for t in ["dead", "flaky", "good"] {
            tokens.store_token("alice", t).await.unwrap();
        }

        let sent: Vec<String> = ["dead", "flaky", "good"].iter().map(|t| t.to_string()).collect();
        let mut outcomes = dispatcher.push_to_tokens(&sent, &payload()).await;
        outcomes.sort_by(|a, b| a.token.cmp(&b.token));

        let flags: Vec<(&str, bool, bool)> = outcomes
            .iter()
            .map(|o| (o.token.as_str(), o.delivered, o.pruned))
            .collect();
        assert_eq!(
            flags,
            vec![("dead", false, true), ("flaky", false, false), ("good", true, false)]
        );
    }

    #[tokio::test]
    async fn test_all_pushes_failing_still_writes_inbox() {
        let provider = Arc::new(ScriptedProvider::failing(&[
            ("dead", PushError::InvalidToken("gone".into())),
        ]));
        let (dispatcher, tokens, inbox) = setup(provider, 4).await;
        tokens.store_token("alice", "dead").await.unwrap();

        let delivered = dispatcher.dispatch_to_user("alice", &payload()).await.unwrap();

        assert!(!delivered);
        assert!(tokens.list_tokens("alice").await.unwrap().is_empty());
        assert_eq!(inbox.list_latest("alice", 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_to_users_counts_and_isolates() {
        let provider = Arc::new(ScriptedProvider::failing(&[
            ("carol-token", PushError::Transient("timeout".into())),
        ]));
        let (dispatcher, tokens, inbox) = setup(provider, 4).await;
        tokens.store_token("alice", "alice-token").await.unwrap();
        tokens.store_token("carol", "carol-token").await.unwrap();

        let users = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
        let summary = dispatcher.dispatch_to_users(&users, &payload()).await;

        assert_eq!(summary, DispatchSummary { succeeded: 1, failed: 2 });
        for user in &users {
            assert_eq!(inbox.list_latest(user, 50).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_fan_out_runs_on_spawned_task() {
        let provider = Arc::new(ScriptedProvider::default());
        let (dispatcher, tokens, inbox) = setup(provider, 4).await;
        tokens.store_token("alice", "alice-token").await.unwrap();

        // Spawning requires the fan-out future to be Send
        let users = vec!["alice".to_string(), "bob".to_string()];
        let summary = tokio::spawn(async move {
            let payload = payload();
            dispatcher.dispatch_to_users(&users, &payload).await
        })
        .await
        .unwrap();

        assert_eq!(summary, DispatchSummary { succeeded: 1, failed: 1 });
        assert_eq!(inbox.list_latest("bob", 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_audience_gets_one_entry() {
        let provider = Arc::new(ScriptedProvider::default());
        let (dispatcher, _, inbox) = setup(provider, 4).await;

        let users = vec!["alice".to_string(), "alice".to_string()];
        let summary = dispatcher.dispatch_to_users(&users, &payload()).await;

        assert_eq!(summary.succeeded + summary.failed, 1);
        assert_eq!(inbox.list_latest("alice", 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_token_fan_out_is_bounded() {
        let provider = Arc::new(ScriptedProvider::with_delay(Duration::from_millis(20)));
        let (dispatcher, tokens, _) = setup(provider.clone(), 2).await;
        for i in 0..6 {
            tokens.store_token("alice", &format!("T{}", i)).await.unwrap();
        }

        assert!(dispatcher.dispatch_to_user("alice", &payload()).await.unwrap());

        assert_eq!(provider.sent().len(), 6);
        let peak = provider.max_in_flight.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak in-flight was {}", peak);
    }
}
