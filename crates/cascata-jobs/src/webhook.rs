//! Webhook delivery worker (§4.7 "Webhook worker algorithm"): SSRF guard, HMAC signing, retry per
//! named policy, and a final-attempt fallback alert.

use std::sync::Arc;
use std::time::Duration;

use cascata_core::jobs::WebhookJob;
use cascata_core::retry::RetryPolicy;
use cascata_core::signer::hmac_sign_hex;
use cascata_core::ssrf;
use cascata_core::{Queue, QueueMessage};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(5);
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the webhook worker loop until ctrl-c. Concurrency is 1 per §4.7, so a single task owns
/// the whole queue; the gateway enqueues, this is the only consumer.
pub async fn run(queue: Arc<dyn Queue>, http: reqwest::Client, poll_interval: Duration) {
    tracing::info!(event = "jobs.webhook.started", "webhook worker started");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(event = "jobs.webhook.shutdown", "webhook worker shutting down");
                return;
            }
            res = queue.receive(cascata_core::jobs::WEBHOOK_QUEUE, 1, VISIBILITY_TIMEOUT) => {
                let messages = match res {
                    Ok(messages) => messages,
                    Err(err) => {
                        tracing::warn!(event = "jobs.webhook.receive_error", error = %err, "queue receive failed");
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                };
                if messages.is_empty() {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
                for msg in messages {
                    handle_message(queue.as_ref(), &http, msg).await;
                }
            }
        }
    }
}

async fn handle_message(queue: &dyn Queue, http: &reqwest::Client, msg: QueueMessage) {
    let ack_token = msg.ack_token.clone();
    let job: WebhookJob = match serde_json::from_value(msg.payload.clone()) {
        Ok(job) => job,
        Err(err) => {
            tracing::warn!(event = "jobs.webhook.invalid_payload", error = %err, "dropping unparsable webhook job");
            let _ = queue.ack(&ack_token).await;
            return;
        }
    };

    let policy = RetryPolicy::parse(&job.retry_policy).unwrap_or(RetryPolicy::Standard);
    let attempt = msg.deliveries.max(1) as u32;

    let outcome = attempt_delivery(http, &job).await;
    let is_final = match &outcome {
        Ok(()) => false,
        Err(DeliveryError::Permanent(_)) => true,
        Err(DeliveryError::Transient(Some(status))) => {
            attempt >= policy.max_attempts() || (*status != 429 && (400..500).contains(status))
        }
        Err(DeliveryError::Transient(None)) => attempt >= policy.max_attempts(),
    };

    match outcome {
        Ok(()) => {
            tracing::info!(event = "jobs.webhook.delivered", target = %job.target_url, table = %job.table_name, "webhook delivered");
            let _ = queue.ack(&ack_token).await;
        }
        Err(err) if is_final => {
            tracing::warn!(event = "jobs.webhook.final_attempt", target = %job.target_url, error = %err, "webhook delivery exhausted, dispatching fallback");
            dispatch_fallback(http, &job, &err.to_string()).await;
            let _ = queue.ack(&ack_token).await;
        }
        Err(err) => {
            tracing::warn!(event = "jobs.webhook.retry", target = %job.target_url, attempt, error = %err, "webhook delivery failed, retrying");
            let delay = policy.backoff(attempt);
            let _ = queue.nack_or_requeue(&ack_token, delay).await;
        }
    }
}

enum DeliveryError {
    /// An SSRF rejection or malformed URL; retrying would never succeed.
    Permanent(Option<u16>),
    /// A network error or non-2xx response that may succeed on a later attempt.
    Transient(Option<u16>),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Permanent(status) => write!(f, "permanent failure (status {status:?})"),
            DeliveryError::Transient(status) => write!(f, "transient failure (status {status:?})"),
        }
    }
}

async fn attempt_delivery(http: &reqwest::Client, job: &WebhookJob) -> Result<(), DeliveryError> {
    let url = ssrf::check_url(&job.target_url).map_err(|_| DeliveryError::Permanent(None))?;

    let host = url.host_str().ok_or(DeliveryError::Permanent(None))?.to_string();
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map(|iter| iter.map(|a| a.ip()).collect())
        .unwrap_or_default();
    if !addrs.is_empty() {
        ssrf::check_resolved_addrs(&addrs).map_err(|_| DeliveryError::Permanent(None))?;
    }

    let body = serde_json::to_vec(&job.payload).map_err(|_| DeliveryError::Permanent(None))?;
    let signature = hmac_sign_hex(&job.secret, &body).map_err(|_| DeliveryError::Permanent(None))?;

    let response = http
        .post(url)
        .timeout(WEBHOOK_TIMEOUT)
        .header("X-Cascata-Signature", signature)
        .header("X-Cascata-Event", &job.event_type)
        .header("X-Cascata-Table", &job.table_name)
        .header("User-Agent", concat!("Cascata-Webhook-Engine/", env!("CARGO_PKG_VERSION")))
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|_| DeliveryError::Transient(None))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(DeliveryError::Transient(Some(status.as_u16())))
    }
}

/// Final-attempt fallback alert (§4.7 step 5): best-effort, failure is logged and discarded.
async fn dispatch_fallback(http: &reqwest::Client, job: &WebhookJob, error_message: &str) {
    let Some(fallback_url) = &job.fallback_url else {
        return;
    };
    let Ok(url) = ssrf::check_url(fallback_url) else {
        tracing::warn!(event = "jobs.webhook.fallback_ssrf", "fallback url rejected by SSRF guard");
        return;
    };

    let alert = serde_json::json!({
        "target_url": job.target_url,
        "error": error_message,
        "event_type": job.event_type,
        "table_name": job.table_name,
        "payload": job.payload,
    });

    if let Err(err) = http.post(url).timeout(FALLBACK_TIMEOUT).json(&alert).send().await {
        tracing::warn!(event = "jobs.webhook.fallback_failed", error = %err, "fallback alert delivery failed");
    }
}
