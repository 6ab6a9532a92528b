//! Resolves a request's target database connection (§4.2 "Keying" / §4.3 "external primary /
//! replica" precedence) and hands back a pool handle from the registry, building the connect URL
//! and per-tenant pool configuration from the project's own settings.

use cascata_core::project::{PoolSelector, Project};

use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::pool_registry::{PoolConfig, PoolHandle, PoolRegistry};

fn internal_connect_url(config: &GatewayConfig, db_name: &str, direct: bool) -> String {
    let (host, port) = if direct {
        (&config.db_direct_host, config.db_direct_port)
    } else {
        (&config.db_pool_host, config.db_pool_port)
    };
    format!(
        "postgres://{}:{}@{host}:{port}/{db_name}",
        config.db_user, config.db_pass
    )
}

pub async fn acquire(
    registry: &PoolRegistry,
    config: &GatewayConfig,
    project: &Project,
    is_read: bool,
) -> Result<PoolHandle, ApiError> {
    let selector = PoolSelector::resolve(project, is_read);
    let (connect_url, external) = match &selector {
        PoolSelector::Internal { db_name, direct } => {
            (internal_connect_url(config, db_name, *direct), false)
        }
        PoolSelector::External { connection_string, .. } => (connection_string.clone(), true),
    };

    let pool_config = PoolConfig {
        max_connections: project.metadata.pool.max_connections,
        statement_timeout_ms: project.metadata.pool.statement_timeout_ms,
        external,
    };

    registry
        .get(&selector, pool_config, &connect_url)
        .await
        .map_err(ApiError::internal)
}

/// The direct (non-pooled) connect URL for the project's database, used by the realtime bridge's
/// dedicated `LISTEN` connection, which must bypass any transaction-mode pooler.
pub fn direct_connect_url(config: &GatewayConfig, project: &Project) -> String {
    match project.metadata.external_primary_url.as_ref() {
        Some(url) => url.clone(),
        None => internal_connect_url(config, &project.db_name, true),
    }
}
