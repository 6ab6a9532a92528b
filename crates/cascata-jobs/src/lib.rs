//! The Cascata worker: the job-engine process described in §4.7 and the notification rule engine
//! of §4.8.
//!
//! Unlike `cascata-gateway`, the worker has no HTTP surface of its own (besides what
//! `cascata-admin` drives it through for smoke-testing) — it is three independent loops sharing
//! one Redis connection and one control-database pool: the webhook worker (concurrency 1), the
//! push worker (concurrency 50), and the rule listener, which holds its own per-tenant `LISTEN`
//! connections exactly as the gateway's realtime bridge does.

pub mod config;
pub mod db;
pub mod push;
pub mod rule_listener;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use cascata_core::redis_queue::RedisQueue;
use cascata_core::Queue;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use config::WorkerConfig;

/// Shared worker-process state, analogous to the gateway's `AppState` but without a pool
/// registry: workers open short-lived per-job connections via [`db::connect_selector`].
pub struct WorkerState {
    pub config: Arc<WorkerConfig>,
    pub control_pool: PgPool,
    pub queue: Arc<dyn Queue>,
    pub http: reqwest::Client,
}

/// Connects to the control database and Redis exactly once, mirroring the gateway's
/// `build_state`.
pub async fn build_state(config: WorkerConfig) -> anyhow::Result<WorkerState> {
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

    let queue = Arc::new(RedisQueue::new(redis_conn));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build http client: {e}"))?;

    Ok(WorkerState {
        config: Arc::new(config),
        control_pool,
        queue,
        http,
    })
}

/// Runs all three worker loops to completion (they only return on shutdown signal or a fatal
/// queue error). `SERVICE_MODE=WORKER` is the only mode `cascata-jobs`'s binary serves; the
/// gateway owns `API` and `CONTROL_PLANE`.
pub async fn run_worker(state: WorkerState) {
    let WorkerState {
        config,
        control_pool,
        queue,
        http,
    } = state;

    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    let webhook_queue = queue.clone();
    let webhook_http = http.clone();
    let webhook_task = tokio::spawn(async move {
        webhook::run(webhook_queue, webhook_http, poll_interval).await;
    });

    let push_task = tokio::spawn(push::run(
        config.clone(),
        control_pool.clone(),
        queue.clone(),
        http.clone(),
        config.push_concurrency,
        poll_interval,
    ));

    let rule_task = tokio::spawn(rule_listener::run(config.clone(), control_pool, queue));

    let _ = tokio::join!(webhook_task, push_task, rule_task);
}
