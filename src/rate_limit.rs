/// Global request rate limiting
use crate::{
    config::RateLimitConfig,
    context::AppContext,
    error::{NotifyError, NotifyResult},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tracing::warn;

/// Process-wide limiter; `None` when disabled
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Option<Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { limiter: None };
        }

        let quota = Quota::per_second(NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: Some(Arc::new(GovernorLimiter::direct(quota))),
        }
    }

    pub fn check(&self) -> NotifyResult<()> {
        match &self.limiter {
            Some(limiter) if limiter.check().is_err() => Err(NotifyError::RateLimitExceeded {
                retry_after: Duration::from_secs(1),
            }),
            _ => Ok(()),
        }
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, NotifyError> {
    if let Err(e) = ctx.rate_limiter.check() {
        warn!("Rate limit exceeded for {}", request.uri().path());
        return Err(e);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_limit() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst_size: 5,
        });

        for _ in 0..5 {
            assert!(limiter.check().is_ok());
        }
        assert!(matches!(
            limiter.check(),
            Err(NotifyError::RateLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_disabled_never_limits() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            requests_per_second: 1,
            burst_size: 1,
        });

        for _ in 0..100 {
            assert!(limiter.check().is_ok());
        }
    }
}
