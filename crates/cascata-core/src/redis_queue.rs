//! A Redis-backed implementation of [`crate::Queue`] (§4.7 "Two named, disjoint queues backed by
//! a Redis-compatible store").
//!
//! Readiness is modelled as a sorted set keyed by `available_at` (epoch millis): `publish` and
//! `nack_or_requeue` both just `ZADD` into it, which gives retries-after-backoff for free and
//! matches §5's ordering guarantee ("retries are delivered after their scheduled delay has
//! elapsed, not necessarily in original insertion order"). A claimed message moves from the
//! ready set into a parallel inflight sorted set keyed by its visibility deadline; `reap_expired`
//! (run periodically by the worker) moves anything whose worker never ack'd or nack'd back onto
//! the ready set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::{Error, Queue, QueueMessage, Result};

fn ready_key(queue: &str) -> String {
    format!("cascata:queue:{queue}:ready")
}
fn inflight_key(queue: &str) -> String {
    format!("cascata:queue:{queue}:inflight")
}
fn payload_key(queue: &str, id: &str) -> String {
    format!("cascata:queue:{queue}:payload:{id}")
}

fn encode_ack_token(queue: &str, id: &str) -> String {
    format!("{queue}:{id}")
}

fn decode_ack_token(ack_token: &str) -> Result<(String, String)> {
    ack_token
        .split_once(':')
        .map(|(q, id)| (q.to_string(), id.to_string()))
        .ok_or_else(|| Error::msg("malformed ack token"))
}

#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Moves any inflight message whose visibility deadline has passed back onto the ready set,
    /// for the worker's periodic reaper to call.
    pub async fn reap_expired(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = conn
            .zrangebyscore(inflight_key(queue), 0, now)
            .await
            .map_err(Error::from)?;
        for id in &expired {
            let _: () = conn.zrem(inflight_key(queue), id).await.map_err(Error::from)?;
            let _: () = conn
                .zadd(ready_key(queue), id, now)
                .await
                .map_err(Error::from)?;
        }
        Ok(expired.len())
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn publish(
        &self,
        queue: &str,
        payload: Value,
        available_at: DateTime<Utc>,
    ) -> Result<String> {
        let mut conn = self.conn.clone();
        let id = Uuid::new_v4().to_string();
        let envelope = serde_json::json!({ "payload": payload, "deliveries": 0 });
        let _: () = conn
            .set(payload_key(queue, &id), envelope.to_string())
            .await
            .map_err(Error::from)?;
        let _: () = conn
            .zadd(ready_key(queue), &id, available_at.timestamp_millis())
            .await
            .map_err(Error::from)?;
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        max: i64,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();

        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(ready_key(queue))
            .arg(0)
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(Error::from)?;

        let mut messages = Vec::with_capacity(ids.len());
        let deadline = now + visibility_timeout.as_millis() as i64;

        for id in ids {
            let _: () = conn.zrem(ready_key(queue), &id).await.map_err(Error::from)?;

            let raw: Option<String> = conn.get(payload_key(queue, &id)).await.map_err(Error::from)?;
            let Some(raw) = raw else {
                // Payload evicted out from under us; skip rather than hand the worker garbage.
                continue;
            };
            let mut envelope: Value = serde_json::from_str(&raw)
                .map_err(|e| Error::msg(format!("corrupt queue payload: {e}")))?;
            let deliveries = envelope["deliveries"].as_i64().unwrap_or(0) + 1;
            envelope["deliveries"] = Value::from(deliveries);
            let _: () = conn
                .set(payload_key(queue, &id), envelope.to_string())
                .await
                .map_err(Error::from)?;

            let _: () = conn
                .zadd(inflight_key(queue), &id, deadline)
                .await
                .map_err(Error::from)?;

            messages.push(QueueMessage {
                ack_token: encode_ack_token(queue, &id),
                queue_name: queue.to_string(),
                payload: envelope["payload"].clone(),
                deliveries: deliveries as i32,
            });
        }

        Ok(messages)
    }

    async fn ack(&self, ack_token: &str) -> Result<()> {
        let (queue, id) = decode_ack_token(ack_token)?;
        let mut conn = self.conn.clone();
        let _: () = conn.del(payload_key(&queue, &id)).await.map_err(Error::from)?;
        let _: () = conn.zrem(inflight_key(&queue), &id).await.map_err(Error::from)?;
        Ok(())
    }

    async fn nack_or_requeue(&self, ack_token: &str, delay: Duration) -> Result<()> {
        let (queue, id) = decode_ack_token(ack_token)?;
        let mut conn = self.conn.clone();
        let available_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let _: () = conn
            .zadd(ready_key(&queue), &id, available_at)
            .await
            .map_err(Error::from)?;
        let _: () = conn.zrem(inflight_key(&queue), &id).await.map_err(Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_token_round_trips_queue_and_id() {
        let token = encode_ack_token("webhooks", "abc-123");
        let (queue, id) = decode_ack_token(&token).unwrap();
        assert_eq!(queue, "webhooks");
        assert_eq!(id, "abc-123");
    }

    #[test]
    fn malformed_ack_token_is_rejected() {
        assert!(decode_ack_token("no-colon-here").is_err());
    }
}
