//! Shared core abstractions for Cascata.
//!
//! This crate defines the cross-crate contracts used by the gateway and the worker: the job
//! queue, the PostgREST query translator, tenant secret encryption, JWT issuance/verification,
//! and the webhook SSRF guard.
//!
//! # API notes
//! `cascata-core` is an internal crate (`publish = false`). Its public API uses a few
//! third-party types (`uuid::Uuid`, `chrono::DateTime<Utc>`, `serde_json::Value`) as part of the
//! Cascata contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{fmt, time::Duration};

pub mod jobs;
pub mod jwt;
pub mod pg_row;
pub mod project;
pub mod query;
pub mod redis_queue;
pub mod retry;
pub mod rules;
pub mod secrets;
pub mod signer;
pub mod ssrf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    inner: anyhow::Error,
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            inner: anyhow::anyhow!(message.into()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self { inner: value }
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Self {
            inner: anyhow::Error::from(value),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(value: redis::RedisError) -> Self {
        Self {
            inner: anyhow::Error::from(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        Self {
            inner: anyhow::Error::from(value),
        }
    }
}

/// A message pulled off a named queue, pending acknowledgement.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Opaque token used to acknowledge or requeue the message: the Redis list/zset member id.
    pub ack_token: String,
    pub queue_name: String,
    pub payload: Value,
    pub deliveries: i32,
}

/// At-least-once queue contract. [`redis_queue::RedisQueue`] is the production implementation;
/// this trait keeps the webhook/push worker logic storage-agnostic and lets tests substitute an
/// in-memory fake.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn publish(
        &self,
        queue: &str,
        payload: Value,
        available_at: DateTime<Utc>,
    ) -> Result<String>;

    async fn receive(
        &self,
        queue: &str,
        max: i64,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>>;

    async fn ack(&self, ack_token: &str) -> Result<()>;

    async fn nack_or_requeue(&self, ack_token: &str, delay: Duration) -> Result<()>;
}
