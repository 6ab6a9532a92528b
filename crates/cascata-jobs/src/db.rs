//! Tenant database access for the worker processes.
//!
//! Unlike the gateway, the workers do not serve request-volume traffic against tenant databases
//! — each job or rule evaluation issues a handful of queries — so there is no adaptive pool
//! registry here, just a short-lived connection per unit of work via [`cascata_core::project`]'s
//! own selector logic.

use cascata_core::jobs::DbSelector;
use cascata_core::project::Project;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::WorkerConfig;

fn internal_connect_url(config: &WorkerConfig, db_name: &str) -> String {
    format!(
        "postgres://{}:{}@{}:{}/{db_name}",
        config.db_user, config.db_pass, config.db_direct_host, config.db_direct_port
    )
}

/// Connects a small pool (2 connections) for a job whose target database was already resolved
/// into a [`DbSelector`] at enqueue time.
pub async fn connect_selector(config: &WorkerConfig, selector: &DbSelector) -> anyhow::Result<PgPool> {
    let url = match &selector.external_connection_string {
        Some(url) => url.clone(),
        None => internal_connect_url(config, &selector.db_name),
    };
    Ok(PgPoolOptions::new().max_connections(2).connect(&url).await?)
}

/// The direct (non-pooled) connect URL for a project's database, used by the rule engine's own
/// dedicated `LISTEN` connection — the same bypass-the-pooler requirement as the gateway's
/// realtime bridge (§4.6 topology note), applied independently here since the rule engine runs
/// in its own process.
pub fn direct_connect_url(config: &WorkerConfig, project: &Project) -> String {
    match project.metadata.external_primary_url.as_ref() {
        Some(url) => url.clone(),
        None => internal_connect_url(config, &project.db_name),
    }
}
