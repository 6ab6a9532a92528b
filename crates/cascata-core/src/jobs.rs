//! Wire shapes for the two job-engine queues (§3 "Job", §4.7).
//!
//! These are the payloads that travel through [`crate::Queue`]; the gateway enqueues them, the
//! worker decodes and executes them. Keeping them here (rather than duplicated in the gateway and
//! the worker crate) is what lets both sides agree on the JSON shape without a wire-format test.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const WEBHOOK_QUEUE: &str = "webhooks";
pub const PUSH_QUEUE: &str = "push";

/// A webhook delivery job (§3 "Job"). The signing secret travels in the job so the worker does
/// not need a second round-trip to the control database to re-fetch it, but it is never logged or
/// echoed back to a caller (see [`crate::signer::hmac_sign_hex`]'s callers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookJob {
    pub project_slug: String,
    pub target_url: String,
    pub payload: Value,
    pub secret: String,
    pub event_type: String,
    pub table_name: String,
    pub fallback_url: Option<String>,
    pub retry_policy: String,
}

/// A push delivery job. `db_selector` carries enough of the project's pool selector for the
/// worker to reconstruct a connection without re-querying the control database on every attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushJob {
    pub project_slug: String,
    pub user_id: String,
    pub notification: PushNotification,
    pub db_selector: DbSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Value,
}

/// A flattened, queue-serialisable form of [`crate::project::PoolSelector`] (the enum itself
/// isn't `Serialize`/`Deserialize` since it doesn't need to cross a wire anywhere else).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSelector {
    pub db_name: String,
    pub external_connection_string: Option<String>,
}

impl From<&crate::project::PoolSelector> for DbSelector {
    fn from(selector: &crate::project::PoolSelector) -> Self {
        use crate::project::PoolSelector;
        match selector {
            PoolSelector::Internal { db_name, .. } => DbSelector {
                db_name: db_name.clone(),
                external_connection_string: None,
            },
            PoolSelector::External {
                db_name,
                connection_string,
            } => DbSelector {
                db_name: db_name.clone(),
                external_connection_string: Some(connection_string.clone()),
            },
        }
    }
}

/// Audit row written to the control database's history table after a push job finishes (§4.7
/// step 6), not dependent on any particular ORM so both the worker and any admin tooling can
/// construct one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Completed,
    Partial,
    NoDevices,
}

impl PushOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PushOutcome::Completed => "completed",
            PushOutcome::Partial => "partial",
            PushOutcome::NoDevices => "no_devices",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlatform {
    Ios,
    Android,
    Web,
    Other,
}

impl DevicePlatform {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ios" => Self::Ios,
            "android" => Self::Android,
            "web" => Self::Web,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserDevice {
    pub user_id: String,
    pub token: String,
    pub platform: DevicePlatform,
    pub app_version: Option<String>,
    pub is_active: bool,
}

/// A realtime change notification, the payload `pg_notify('cascata_events', ...)` carries (§4.6
/// "Producer"). Shared between the realtime bridge's SSE fan-out and the rule engine, which both
/// consume the same wire shape from the same channel but act on it differently.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeNotification {
    pub table: String,
    pub schema: String,
    pub action: String,
    pub record_id: Option<Value>,
    pub timestamp: Option<String>,
}

impl ChangeNotification {
    pub fn record_id_string(&self) -> Option<String> {
        match &self.record_id {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleEvent {
    Insert,
    Update,
    Delete,
    All,
}

impl RuleEvent {
    /// Parses the `event` column of a notification rule row, defaulting to `All` for anything
    /// other than the three known actions rather than dropping the rule.
    pub fn parse_or_all(raw: &str) -> Option<Self> {
        Some(match raw.to_ascii_uppercase().as_str() {
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            _ => Self::All,
        })
    }

    pub fn matches(self, action: &str) -> bool {
        match self {
            RuleEvent::All => true,
            RuleEvent::Insert => action.eq_ignore_ascii_case("INSERT"),
            RuleEvent::Update => action.eq_ignore_ascii_case("UPDATE"),
            RuleEvent::Delete => action.eq_ignore_ascii_case("DELETE"),
        }
    }
}

/// Unique id for a job handler; present mostly so tests and the admin CLI can address a rule by
/// something other than its full row.
pub type RuleId = Uuid;
