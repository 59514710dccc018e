/// Background task implementations
use crate::{context::AppContext, error::NotifyResult, metrics};
use chrono::{Duration, Utc};
use std::time::Instant;

/// Delete push tokens that have not been used for `stale_token_days`
pub async fn prune_stale_tokens(ctx: &AppContext) -> NotifyResult<u64> {
    let start = Instant::now();
    let cutoff = Utc::now() - Duration::days(ctx.config.dispatch.stale_token_days);

    let result = ctx.token_store.prune_stale(cutoff).await;
    let status = if result.is_ok() { "success" } else { "failure" };
    metrics::record_background_job("stale_token_cleanup", status, start.elapsed().as_secs_f64());

    result
}

/// Health check - verify the database is reachable
pub async fn health_check(ctx: &AppContext) -> NotifyResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ServerConfig, db, push::DisabledPushProvider};
    use std::sync::Arc;

    async fn context() -> AppContext {
        let pool = db::create_memory_pool().await.unwrap();
        AppContext::with_pool(
            ServerConfig::for_testing("0123456789abcdef0123456789abcdef"),
            pool,
            Arc::new(DisabledPushProvider),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_prune_stale_tokens_keeps_recent() {
        let ctx = context().await;
        ctx.token_store.store_token("alice", "fresh-token").await.unwrap();

        // Backdate one token well past the cutoff
        ctx.token_store.store_token("bob", "old-token").await.unwrap();
        let old = db::timestamp(Utc::now() - Duration::days(ctx.config.dispatch.stale_token_days + 1));
        sqlx::query("UPDATE notification_tokens SET last_used = ?1 WHERE token = ?2")
            .bind(&old)
            .bind("old-token")
            .execute(&ctx.db)
            .await
            .unwrap();

        let removed = prune_stale_tokens(&ctx).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ctx.token_store.list_tokens("alice").await.unwrap(), vec!["fresh-token"]);
        assert!(ctx.token_store.list_tokens("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_check() {
        let ctx = context().await;
        tokio_test::assert_ok!(health_check(&ctx).await);
    }
}
