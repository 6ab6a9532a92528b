//! Process-wide shared state, built once at startup and cloned (cheaply, behind `Arc`s) into
//! every request.

use std::sync::Arc;

use cascata_core::jwt::AdminSigner;
use cascata_core::redis_queue::RedisQueue;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::GatewayConfig;
use crate::directory::TenantDirectory;
use crate::panic_shield::PanicShield;
use crate::pool_registry::PoolRegistry;
use crate::realtime::RealtimeBridge;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub control_pool: PgPool,
    pub pool_registry: Arc<PoolRegistry>,
    pub directory: Arc<TenantDirectory>,
    pub panic_shield: PanicShield,
    pub admin_signer: Arc<AdminSigner>,
    pub queue: Arc<RedisQueue>,
    pub realtime: RealtimeBridge,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("control_pool", &"<pg pool>")
            .field("pool_registry", &"<pool registry>")
            .field("directory", &"<tenant directory>")
            .field("panic_shield", &"<panic shield>")
            .field("admin_signer", &"<admin signer>")
            .field("queue", &"<redis queue>")
            .field("realtime", &"<realtime bridge>")
            .finish()
    }
}

/// Builds the shared state, connecting to the control database and Redis exactly once.
pub async fn build_state(config: GatewayConfig) -> anyhow::Result<AppState> {
    let control_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.control_database_url)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to control database: {e}"))?;

    let redis_client = redis::Client::open(config.redis_url())
        .map_err(|e| anyhow::anyhow!("invalid redis url: {e}"))?;
    let redis_conn: ConnectionManager = redis_client
        .get_connection_manager()
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to redis: {e}"))?;

    let next = match (&config.system_jwt_next_kid, &config.system_jwt_next_secret) {
        (Some(kid), Some(secret)) => Some((kid.clone(), secret.clone())),
        _ => None,
    };
    let admin_signer = AdminSigner::new(
        &config.system_jwt_secret,
        config.system_jwt_kid.clone(),
        next,
        std::time::Duration::from_secs(12 * 3600),
    );

    let cipher = cascata_core::secrets::SecretCipher::from_base64(&config.sys_secret)?;

    let directory = TenantDirectory::new(control_pool.clone(), cipher);
    let pool_registry = PoolRegistry::new(config.max_active_pools);
    let panic_shield = PanicShield::new(redis_conn.clone());
    let queue = RedisQueue::new(redis_conn);
    let realtime = RealtimeBridge::new();

    Ok(AppState {
        config: Arc::new(config),
        control_pool,
        pool_registry,
        directory: Arc::new(directory),
        panic_shield,
        admin_signer: Arc::new(admin_signer),
        queue: Arc::new(queue),
        realtime,
    })
}
