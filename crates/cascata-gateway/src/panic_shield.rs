//! The panic shield (§4.1): a flag in the shared rate-limit store. When set for a slug, every
//! non-admin request receives `503 LockedDown`.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

fn panic_key(slug: &str) -> String {
    format!("cascata:panic:{slug}")
}

#[derive(Clone)]
pub struct PanicShield {
    redis: ConnectionManager,
}

impl PanicShield {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn is_panicked(&self, slug: &str) -> bool {
        let mut conn = self.redis.clone();
        conn.exists::<_, bool>(panic_key(slug)).await.unwrap_or(false)
    }

    pub async fn set(&self, slug: &str) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.set(panic_key(slug), 1).await?;
        Ok(())
    }

    pub async fn clear(&self, slug: &str) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(panic_key(slug)).await?;
        Ok(())
    }

    /// Exposes the shared connection manager for other Redis-backed concerns (the rate limiter)
    /// that don't warrant their own connection pool.
    pub fn redis_handle(&self) -> &ConnectionManager {
        &self.redis
    }
}
