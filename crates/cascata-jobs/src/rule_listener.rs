//! Notification rule engine (§4.8): an independent `LISTEN cascata_events` topology, separate
//! from the gateway's realtime bridge, that exists purely to turn row-change notifications into
//! enqueued push jobs. It periodically rescans the control database for active projects and
//! opens (or tears down) one dedicated listener per tenant, rather than piggy-backing on the
//! gateway's SSE-subscriber-driven bridge — rules must fire even when nobody has an open SSE
//! connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cascata_core::jobs::{ChangeNotification, PushJob, PushNotification, DbSelector, PUSH_QUEUE};
use cascata_core::project::{PoolSelector, Project};
use cascata_core::rules::{conditions_match, render_template, resolve_recipient, NotificationRule, RuleCondition};
use cascata_core::Queue;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::db;

const NOTIFICATION_RULES_TABLE: &str = "cascata_notification_rules";

/// Rescans every `rule_scan_interval_secs` for active projects and keeps exactly one listener
/// task alive per slug that currently has at least one active rule.
pub async fn run(cfg: Arc<WorkerConfig>, control_pool: PgPool, queue: Arc<dyn Queue>) {
    let listeners: Arc<Mutex<HashMap<String, JoinHandle<()>>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.rule_scan_interval_secs));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(event = "jobs.rules.shutdown", "rule engine shutting down");
                let mut listeners = listeners.lock().await;
                for (_, handle) in listeners.drain() {
                    handle.abort();
                }
                return;
            }
            _ = ticker.tick() => {
                reconcile(&cfg, &control_pool, &queue, &listeners).await;
            }
        }
    }
}

async fn reconcile(
    cfg: &Arc<WorkerConfig>,
    control_pool: &PgPool,
    queue: &Arc<dyn Queue>,
    listeners: &Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
) {
    let projects: Vec<Project> = match sqlx::query_as(
        "SELECT id, slug, display_name, db_name, custom_hostname, status, blocklist, \
         anon_key_encrypted, service_key_encrypted, jwt_secret_encrypted, metadata, \
         created_at, updated_at FROM projects WHERE status = 'active'",
    )
    .fetch_all(control_pool)
    .await
    {
        Ok(projects) => projects,
        Err(err) => {
            tracing::warn!(event = "jobs.rules.scan_failed", error = %err, "failed to list active projects");
            return;
        }
    };

    let mut active_slugs = std::collections::HashSet::new();
    for project in projects {
        if has_active_rules(cfg, &project).await {
            active_slugs.insert(project.slug.clone());
            let mut listeners = listeners.lock().await;
            if !listeners.contains_key(&project.slug) {
                let handle = spawn_listener(cfg.clone(), queue.clone(), project.clone());
                listeners.insert(project.slug.clone(), handle);
            }
        }
    }

    let mut listeners = listeners.lock().await;
    let doomed: Vec<String> = listeners
        .keys()
        .filter(|slug| !active_slugs.contains(*slug))
        .cloned()
        .collect();
    for slug in doomed {
        if let Some(handle) = listeners.remove(&slug) {
            tracing::info!(event = "jobs.rules.teardown", slug = %slug, "no active rules remain, tearing down listener");
            handle.abort();
        }
    }
}

async fn has_active_rules(cfg: &WorkerConfig, project: &Project) -> bool {
    let selector = PoolSelector::resolve(project, true);
    let Ok(pool) = db::connect_selector(cfg, &DbSelector::from(&selector)).await else {
        return false;
    };
    let count: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT count(*) FROM {NOTIFICATION_RULES_TABLE} WHERE active = true"
    ))
    .fetch_one(&pool)
    .await
    .ok();
    pool.close().await;
    count.unwrap_or(0) > 0
}

fn spawn_listener(cfg: Arc<WorkerConfig>, queue: Arc<dyn Queue>, project: Project) -> JoinHandle<()> {
    tokio::spawn(async move {
        let connect_url = db::direct_connect_url(&cfg, &project);
        let mut listener = match PgListener::connect(&connect_url).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(event = "jobs.rules.listen_failed", slug = %project.slug, error = %err, "failed to open LISTEN connection");
                return;
            }
        };
        if let Err(err) = listener.listen("cascata_events").await {
            tracing::error!(event = "jobs.rules.listen_failed", slug = %project.slug, error = %err, "LISTEN failed");
            return;
        }
        tracing::info!(event = "jobs.rules.listening", slug = %project.slug, "rule engine listening");

        loop {
            match listener.recv().await {
                Ok(notification) => {
                    if let Err(err) = handle_notification(&cfg, &queue, &project, notification.payload()).await {
                        tracing::warn!(event = "jobs.rules.evaluation_failed", slug = %project.slug, error = %err, "rule evaluation failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(event = "jobs.rules.recv_error", slug = %project.slug, error = %err, "listen connection error, tearing down");
                    return;
                }
            }
        }
    })
}

async fn handle_notification(
    cfg: &WorkerConfig,
    queue: &Arc<dyn Queue>,
    project: &Project,
    payload: &str,
) -> anyhow::Result<()> {
    let change: ChangeNotification = serde_json::from_str(payload)?;

    let selector = PoolSelector::resolve(project, true);
    let pool = db::connect_selector(cfg, &DbSelector::from(&selector)).await?;
    let rules = matching_rules(&pool, project, &change.table, &change.action).await?;
    if rules.is_empty() {
        pool.close().await;
        return Ok(());
    }

    let row = if change.action.eq_ignore_ascii_case("DELETE") {
        None
    } else {
        match change.record_id_string() {
            Some(id) => fetch_row(&pool, &change.table, &id).await?,
            None => None,
        }
    };
    pool.close().await;

    let Some(row) = row else {
        return Ok(());
    };

    for rule in rules {
        if !conditions_match(&rule.conditions, &row) {
            continue;
        }
        let Some(user_id) = resolve_recipient(&rule, &row) else {
            continue;
        };
        let title = render_template(&rule.title_template, &row);
        let body = render_template(&rule.body_template, &row);

        let push_job = PushJob {
            project_slug: project.slug.clone(),
            user_id,
            notification: PushNotification {
                title,
                body,
                data: rule.data_payload.clone(),
            },
            db_selector: DbSelector::from(&PoolSelector::resolve(project, false)),
        };
        let payload = serde_json::to_value(&push_job)?;
        queue.publish(PUSH_QUEUE, payload, Utc::now()).await?;
    }

    Ok(())
}

async fn matching_rules(
    pool: &PgPool,
    project: &Project,
    table: &str,
    action: &str,
) -> anyhow::Result<Vec<NotificationRule>> {
    let rows = sqlx::query(&format!(
        "SELECT table_name, event, recipient_column, title_template, body_template, conditions, data_payload \
         FROM {NOTIFICATION_RULES_TABLE} WHERE active = true AND table_name = $1"
    ))
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut rules = Vec::new();
    for row in rows {
        let event_raw: String = row.get("event");
        let Some(event) = cascata_core::jobs::RuleEvent::parse_or_all(&event_raw) else {
            continue;
        };
        if !event.matches(action) {
            continue;
        }
        let conditions_value: Value = row.try_get("conditions").unwrap_or(Value::Null);
        let conditions: Vec<RuleCondition> = serde_json::from_value(conditions_value).unwrap_or_default();
        rules.push(NotificationRule {
            project_slug: project.slug.clone(),
            table: row.get("table_name"),
            event,
            recipient_column: row.get("recipient_column"),
            title_template: row.get("title_template"),
            body_template: row.get("body_template"),
            conditions,
            data_payload: row.try_get("data_payload").unwrap_or(Value::Null),
            active: true,
        });
    }
    Ok(rules)
}

async fn fetch_row(pool: &PgPool, table: &str, id: &str) -> anyhow::Result<Option<serde_json::Map<String, Value>>> {
    let table_ident = cascata_core::query::quote_ident(table);
    let sql = format!("SELECT * FROM {table_ident} WHERE id = $1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    Ok(row.and_then(|row| match cascata_core::pg_row::row_to_json(&row) {
        Value::Object(object) => Some(object),
        _ => None,
    }))
}
