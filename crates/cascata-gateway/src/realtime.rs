//! The realtime bridge (§4.6): one dedicated `LISTEN` connection per tenant with at least one
//! live subscriber, fanning out `pg_notify('cascata_events', ...)` payloads as SSE events.
//!
//! The dedicated connection deliberately bypasses [`crate::pool_registry`] — pool-side
//! transactional poolers (pgbouncer in transaction mode and similar) break `LISTEN`/`NOTIFY`
//! because they may hand the backend connection to a different client between transactions.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgListener;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

pub const MAX_SUBSCRIBERS_PER_PROJECT: usize = 5000;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ChangeEvent {
    table: String,
    #[allow(dead_code)]
    schema: String,
    action: String,
    record_id: Option<Value>,
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConnectedFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "clientId")]
    client_id: String,
}

struct Subscriber {
    table_filter: Option<String>,
    sender: mpsc::Sender<Event>,
}

struct TenantChannel {
    subscribers: HashMap<Uuid, Subscriber>,
    shutdown: mpsc::Sender<()>,
}

/// One entry per tenant slug with a live listener; created on first subscriber, torn down on
/// last unsubscribe (§4.9 "Down → Subscribing → Listening").
#[derive(Clone)]
pub struct RealtimeBridge {
    channels: Arc<RwLock<HashMap<String, TenantChannel>>>,
}

impl RealtimeBridge {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a new SSE subscriber for `slug`, starting the tenant's listener if this is the
    /// first one, and returns the stream to hand back as the HTTP response body.
    pub async fn subscribe(
        &self,
        slug: &str,
        connect_url: &str,
        table_filter: Option<String>,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, &'static str> {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel::<Event>(64);

        {
            let mut channels = self.channels.write().await;
            if let Some(channel) = channels.get_mut(slug) {
                if channel.subscribers.len() >= MAX_SUBSCRIBERS_PER_PROJECT {
                    return Err("subscriber cap reached for project");
                }
                channel.subscribers.insert(
                    client_id,
                    Subscriber {
                        table_filter,
                        sender: tx.clone(),
                    },
                );
            } else {
                let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
                channels.insert(
                    slug.to_string(),
                    TenantChannel {
                        subscribers: HashMap::from([(
                            client_id,
                            Subscriber {
                                table_filter,
                                sender: tx.clone(),
                            },
                        )]),
                        shutdown: shutdown_tx,
                    },
                );
                spawn_listener(self.channels.clone(), slug.to_string(), connect_url.to_string(), shutdown_rx);
            }
        }

        let connected = ConnectedFrame {
            kind: "connected",
            client_id: client_id.to_string(),
        };
        let _ = tx
            .send(Event::default().data(serde_json::to_string(&connected).unwrap_or_default()))
            .await;

        let stream = SubscriberStream {
            inner: ReceiverStream::new(rx),
            channels: self.channels.clone(),
            slug: slug.to_string(),
            client_id,
        };

        Ok(Sse::new(stream).keep_alive(
            KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"),
        ))
    }
}

/// Wraps the subscriber's event receiver so that dropping the SSE stream (client disconnect)
/// removes it from the tenant channel and, if it was the last one, tears down the listener
/// (§4.6 "Subscriber lifecycle": on socket close, remove from the set; if empty, close").
struct SubscriberStream {
    inner: ReceiverStream<Event>,
    channels: Arc<RwLock<HashMap<String, TenantChannel>>>,
    slug: String,
    client_id: Uuid,
}

impl Stream for SubscriberStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|item| item.map(Ok))
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        let channels = self.channels.clone();
        let slug = self.slug.clone();
        let client_id = self.client_id;
        tokio::spawn(async move {
            unsubscribe(&channels, &slug, client_id).await;
        });
    }
}

async fn unsubscribe(
    channels: &Arc<RwLock<HashMap<String, TenantChannel>>>,
    slug: &str,
    client_id: Uuid,
) {
    let mut channels = channels.write().await;
    let Some(channel) = channels.get_mut(slug) else {
        return;
    };
    channel.subscribers.remove(&client_id);
    if channel.subscribers.is_empty() {
        if let Some(channel) = channels.remove(slug) {
            let _ = channel.shutdown.send(()).await;
        }
    }
}

/// Holds the dedicated `LISTEN` connection open and fans each notification out to every
/// subscriber whose table filter matches (§4.6 "Consumer").
fn spawn_listener(
    channels: Arc<RwLock<HashMap<String, TenantChannel>>>,
    slug: String,
    connect_url: String,
    mut shutdown: mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut listener = match PgListener::connect(&connect_url).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(event = "gateway.realtime.listen_failed", slug = %slug, error = %e, "failed to open LISTEN connection");
                channels.write().await.remove(&slug);
                return;
            }
        };
        if let Err(e) = listener.listen("cascata_events").await {
            tracing::error!(event = "gateway.realtime.listen_failed", slug = %slug, error = %e, "LISTEN failed");
            channels.write().await.remove(&slug);
            return;
        }

        tracing::info!(event = "gateway.realtime.listening", slug = %slug, "realtime bridge listening");

        loop {
            tokio::select! {
                notification = listener.recv() => {
                    match notification {
                        Ok(notification) => {
                            dispatch(&channels, &slug, notification.payload()).await;
                        }
                        Err(e) => {
                            tracing::warn!(event = "gateway.realtime.recv_error", slug = %slug, error = %e, "listen connection error");
                            channels.write().await.remove(&slug);
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!(event = "gateway.realtime.teardown", slug = %slug, "realtime bridge torn down, no subscribers remain");
                    return;
                }
            }
        }
    });
}

async fn dispatch(channels: &Arc<RwLock<HashMap<String, TenantChannel>>>, slug: &str, payload: &str) {
    let Ok(change) = serde_json::from_str::<ChangeEvent>(payload) else {
        tracing::warn!(event = "gateway.realtime.bad_payload", slug = %slug, "dropping unparsable notification");
        return;
    };

    let channels = channels.read().await;
    let Some(channel) = channels.get(slug) else {
        return;
    };

    let data = serde_json::json!({
        "table": change.table,
        "action": change.action,
        "record_id": change.record_id,
        "timestamp": change.timestamp,
    });
    let rendered = data.to_string();

    for subscriber in channel.subscribers.values() {
        let matches = subscriber
            .table_filter
            .as_deref()
            .map(|f| f == change.table)
            .unwrap_or(true);
        if matches {
            let _ = subscriber.sender.send(Event::default().data(rendered.clone())).await;
        }
    }
}

/// The trigger body attached to every platform-created table (§4.6 "Producer"). Executed once
/// per table at creation time by the data controller.
pub fn change_trigger_sql(table: &str, schema: &str) -> String {
    let table_ident = cascata_core::query::quote_ident(table);
    let trigger_name = cascata_core::query::quote_ident(&format!("cascata_notify_{table}"));
    format!(
        "CREATE TRIGGER {trigger_name} AFTER INSERT OR UPDATE OR DELETE ON {table_ident} \
         FOR EACH ROW EXECUTE FUNCTION cascata_notify_change('{schema}')"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_sql_names_the_table_and_schema() {
        let sql = change_trigger_sql("customers", "public");
        assert!(sql.contains("\"customers\""));
        assert!(sql.contains("cascata_notify_change('public')"));
    }
}
