//! Dynamic, Redis-backed rate limiting (§4.3 "dynamic rate limit"): a fixed window counter keyed
//! by `(slug, role)`, with `X-RateLimit-*` response headers and a `Retry-After` on rejection.
//!
//! A fixed window (rather than a sliding log or token bucket) is the same tradeoff the panic
//! shield and idle reaper make elsewhere in this crate: a single `INCR` + `EXPIRE` round-trip
//! per request, no Lua script to maintain, accepting a burst at window boundaries in exchange for
//! simplicity.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use crate::auth::Role;

const WINDOW_SECONDS: i64 = 60;

/// Default limits per role per window; the anon role is the one most exposed to abuse so it gets
/// the tightest ceiling, service-role callers (the tenant's own backend) get the most headroom.
fn default_limit_for(role: &Role) -> u64 {
    match role {
        Role::ServiceRole => 6000,
        Role::Authenticated => 1200,
        Role::Anon => 300,
    }
}

pub struct RateLimitOutcome {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_seconds: i64,
}

fn window_key(slug: &str, role: &Role) -> String {
    let window = chrono::Utc::now().timestamp() / WINDOW_SECONDS;
    format!("cascata:ratelimit:{slug}:{}:{window}", role.guc_value())
}

/// Increments the window counter for `(slug, role)` and reports whether this request is still
/// within the limit. Fails open (`allowed: true`) on a Redis error, since a rate limiter that
/// takes the whole gateway down with it is worse than one that occasionally over-admits.
pub async fn check(redis: &ConnectionManager, slug: &str, role: &Role) -> RateLimitOutcome {
    let limit = default_limit_for(role);
    let key = window_key(slug, role);
    let mut conn = redis.clone();

    let count: Result<i64, _> = conn.incr(&key, 1).await;
    let count = match count {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(event = "gateway.rate_limit.redis_error", error = %e, "rate limit check failed open");
            return RateLimitOutcome {
                allowed: true,
                limit,
                remaining: limit,
                reset_seconds: WINDOW_SECONDS,
            };
        }
    };
    if count == 1 {
        let _: Result<(), _> = conn.expire(&key, WINDOW_SECONDS).await;
    }

    let remaining = limit.saturating_sub(count as u64);
    RateLimitOutcome {
        allowed: count as u64 <= limit,
        limit,
        remaining,
        reset_seconds: WINDOW_SECONDS,
    }
}

pub fn retry_after() -> Duration {
    Duration::from_secs(WINDOW_SECONDS as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_has_the_tightest_default_limit() {
        assert!(default_limit_for(&Role::Anon) < default_limit_for(&Role::Authenticated));
        assert!(default_limit_for(&Role::Authenticated) < default_limit_for(&Role::ServiceRole));
    }
}
