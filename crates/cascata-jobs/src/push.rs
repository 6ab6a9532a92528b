//! Push delivery worker (§4.7 "Push worker algorithm"): loads active devices, exchanges an FCM
//! OAuth bearer from the project's service-account key, and delivers per-device with
//! self-healing on `UNREGISTERED`/`404`.

use std::sync::Arc;
use std::time::Duration;

use cascata_core::jobs::{DevicePlatform, PushJob, PushOutcome};
use cascata_core::project::Project;
use cascata_core::secrets::SecretCipher;
use cascata_core::signer::{mint_fcm_assertion, FcmServiceAccountKey};
use cascata_core::{Queue, QueueMessage};
use sqlx::{PgPool, Row};

use crate::config::WorkerConfig;
use crate::db;

const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
const PUSH_HISTORY_TABLE: &str = "push_delivery_history";
const USER_DEVICES_TABLE: &str = "cascata_user_devices";
const FCM_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Runs `concurrency` push worker tasks sharing the same queue, matching §4.7's "concurrency 50"
/// target: each task pulls one job at a time so in-flight deliveries are naturally bounded.
pub async fn run(
    cfg: Arc<WorkerConfig>,
    control_pool: PgPool,
    queue: Arc<dyn Queue>,
    http: reqwest::Client,
    concurrency: usize,
    poll_interval: Duration,
) {
    let mut tasks = Vec::with_capacity(concurrency);
    for worker_id in 0..concurrency {
        let cfg = cfg.clone();
        let control_pool = control_pool.clone();
        let queue = queue.clone();
        let http = http.clone();
        tasks.push(tokio::spawn(async move {
            worker_loop(worker_id, cfg, control_pool, queue, http, poll_interval).await;
        }));
    }
    for task in tasks {
        let _ = task.await;
    }
}

async fn worker_loop(
    worker_id: usize,
    cfg: Arc<WorkerConfig>,
    control_pool: PgPool,
    queue: Arc<dyn Queue>,
    http: reqwest::Client,
    poll_interval: Duration,
) {
    tracing::info!(event = "jobs.push.started", worker_id, "push worker started");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(event = "jobs.push.shutdown", worker_id, "push worker shutting down");
                return;
            }
            res = queue.receive(cascata_core::jobs::PUSH_QUEUE, 1, VISIBILITY_TIMEOUT) => {
                let messages = match res {
                    Ok(messages) => messages,
                    Err(err) => {
                        tracing::warn!(event = "jobs.push.receive_error", error = %err, "queue receive failed");
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                };
                if messages.is_empty() {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
                for msg in messages {
                    handle_message(&cfg, &control_pool, queue.as_ref(), &http, msg).await;
                }
            }
        }
    }
}

async fn handle_message(
    cfg: &WorkerConfig,
    control_pool: &PgPool,
    queue: &dyn Queue,
    http: &reqwest::Client,
    msg: QueueMessage,
) {
    let ack_token = msg.ack_token.clone();
    let job: PushJob = match serde_json::from_value(msg.payload.clone()) {
        Ok(job) => job,
        Err(err) => {
            tracing::warn!(event = "jobs.push.invalid_payload", error = %err, "dropping unparsable push job");
            let _ = queue.ack(&ack_token).await;
            return;
        }
    };

    match deliver(cfg, control_pool, http, &job).await {
        Ok(outcome) => {
            tracing::info!(event = "jobs.push.delivered", project = %job.project_slug, user_id = %job.user_id, outcome = outcome.as_str(), "push delivery finished");
            record_history(control_pool, &job, outcome).await;
            let _ = queue.ack(&ack_token).await;
        }
        Err(err) => {
            let attempt = msg.deliveries.max(1) as u32;
            if attempt >= cascata_core::retry::PushRetryPolicy::MAX_ATTEMPTS {
                tracing::warn!(event = "jobs.push.failed", project = %job.project_slug, error = %err, "push delivery exhausted retries");
                let _ = queue.ack(&ack_token).await;
            } else {
                tracing::warn!(event = "jobs.push.retry", project = %job.project_slug, attempt, error = %err, "push delivery failed, retrying");
                let delay = cascata_core::retry::PushRetryPolicy::backoff(attempt);
                let _ = queue.nack_or_requeue(&ack_token, delay).await;
            }
        }
    }
}

async fn deliver(
    cfg: &WorkerConfig,
    control_pool: &PgPool,
    http: &reqwest::Client,
    job: &PushJob,
) -> anyhow::Result<PushOutcome> {
    let tenant_pool = db::connect_selector(cfg, &job.db_selector).await?;
    let devices = load_active_devices(&tenant_pool, &job.user_id).await?;

    if devices.is_empty() {
        tenant_pool.close().await;
        return Ok(PushOutcome::NoDevices);
    }

    let project = load_project(control_pool, &job.project_slug).await?;
    let cipher = SecretCipher::from_base64(&cfg.sys_secret)?;
    let Some(encrypted_key) = project.metadata.push.fcm_service_account_key_encrypted.as_deref() else {
        anyhow::bail!("project {} has no FCM credentials configured", job.project_slug);
    };
    let Some(fcm_project_id) = project.metadata.push.fcm_project_id.as_deref() else {
        anyhow::bail!("project {} has no FCM project id configured", job.project_slug);
    };
    let key_json = cipher.decrypt(encrypted_key)?;
    let service_account: FcmServiceAccountKey = serde_json::from_str(&key_json)?;
    let assertion = mint_fcm_assertion(&service_account)?;
    let bearer = exchange_fcm_bearer(http, &assertion).await?;

    let mut delivered = 0usize;
    let mut failed = 0usize;
    for device in &devices {
        match send_to_device(http, &bearer, fcm_project_id, device, job).await {
            Ok(true) => delivered += 1,
            Ok(false) => {
                // UNREGISTERED/NotFound: self-heal by dropping the stale token (§4.7 step 5).
                // The device row lives in the tenant database, not the control database.
                let _ = sqlx::query(&format!("DELETE FROM {USER_DEVICES_TABLE} WHERE token = $1"))
                    .bind(&device.token)
                    .execute(&tenant_pool)
                    .await;
                failed += 1;
            }
            Err(err) => {
                tracing::warn!(event = "jobs.push.device_failed", token = %redact_token(&device.token), error = %err, "fcm delivery failed");
                failed += 1;
            }
        }
    }

    tenant_pool.close().await;

    if delivered == 0 {
        anyhow::bail!("all {} device deliveries failed", devices.len());
    }
    Ok(if failed > 0 { PushOutcome::Partial } else { PushOutcome::Completed })
}

struct Device {
    token: String,
    platform: DevicePlatform,
}

async fn load_active_devices(pool: &PgPool, user_id: &str) -> anyhow::Result<Vec<Device>> {
    let rows = sqlx::query(&format!(
        "SELECT token, platform FROM {USER_DEVICES_TABLE} WHERE user_id = $1 AND is_active = true"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Device {
            token: row.get::<String, _>("token"),
            platform: DevicePlatform::parse(&row.get::<String, _>("platform")),
        })
        .collect())
}

async fn load_project(control_pool: &PgPool, slug: &str) -> anyhow::Result<Project> {
    let project: Project = sqlx::query_as(
        "SELECT id, slug, display_name, db_name, custom_hostname, status, blocklist, \
         anon_key_encrypted, service_key_encrypted, jwt_secret_encrypted, metadata, \
         created_at, updated_at FROM projects WHERE slug = $1",
    )
    .bind(slug)
    .fetch_one(control_pool)
    .await?;
    Ok(project)
}

async fn exchange_fcm_bearer(http: &reqwest::Client, assertion: &str) -> anyhow::Result<String> {
    #[derive(serde::Deserialize)]
    struct TokenResponse {
        access_token: String,
    }

    let response = http
        .post(FCM_TOKEN_URL)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion),
        ])
        .timeout(Duration::from_secs(30))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<TokenResponse>().await?.access_token)
}

/// Returns `Ok(true)` on delivery, `Ok(false)` on a device-level `UNREGISTERED`/`404` that should
/// self-heal by removing the device row, `Err` on anything else.
async fn send_to_device(
    http: &reqwest::Client,
    bearer: &str,
    fcm_project_id: &str,
    device: &Device,
    job: &PushJob,
) -> anyhow::Result<bool> {
    let url = format!("https://fcm.googleapis.com/v1/projects/{fcm_project_id}/messages:send");
    let message = platform_message(device, job);

    let response = http
        .post(&url)
        .bearer_auth(bearer)
        .timeout(Duration::from_secs(30))
        .json(&serde_json::json!({ "message": message }))
        .send()
        .await?;

    if response.status().is_success() {
        return Ok(true);
    }
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(false);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.contains("UNREGISTERED") {
        return Ok(false);
    }
    anyhow::bail!("fcm send failed: {status} {body}")
}

fn platform_message(device: &Device, job: &PushJob) -> serde_json::Value {
    let notification = serde_json::json!({
        "title": job.notification.title,
        "body": job.notification.body,
    });
    match device.platform {
        DevicePlatform::Ios => serde_json::json!({
            "token": device.token,
            "notification": notification,
            "apns": { "payload": { "aps": { "alert": { "title": job.notification.title, "body": job.notification.body } } } },
            "data": stringify_data(&job.notification.data),
        }),
        DevicePlatform::Android => serde_json::json!({
            "token": device.token,
            "notification": notification,
            "android": { "priority": "high" },
            "data": stringify_data(&job.notification.data),
        }),
        DevicePlatform::Web | DevicePlatform::Other => serde_json::json!({
            "token": device.token,
            "notification": notification,
            "data": stringify_data(&job.notification.data),
        }),
    }
}

/// FCM's `data` payload requires string values for every key.
fn stringify_data(value: &serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    if let Some(obj) = value.as_object() {
        for (k, v) in obj {
            let s = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(k.clone(), serde_json::Value::String(s));
        }
    }
    out
}

fn redact_token(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    format!("{visible}…")
}

async fn record_history(control_pool: &PgPool, job: &PushJob, outcome: PushOutcome) {
    let result = sqlx::query(&format!(
        "INSERT INTO {PUSH_HISTORY_TABLE} (project_slug, user_id, status, title, created_at) \
         VALUES ($1, $2, $3, $4, now())"
    ))
    .bind(&job.project_slug)
    .bind(&job.user_id)
    .bind(outcome.as_str())
    .bind(&job.notification.title)
    .execute(control_pool)
    .await;

    if let Err(err) = result {
        tracing::warn!(event = "jobs.push.history_write_failed", error = %err, "failed to record push history row");
    }
}
