//! Notification rule matching and template rendering (§4.8), kept free of any database or queue
//! dependency so the condition/template logic is unit-testable in isolation; [`crate::jobs`]
//! defines the job shape it ultimately produces.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jobs::RuleEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ConditionOp {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub op: ConditionOp,
    pub value: Value,
}

/// A control-plane notification rule binding `(project, table, event)` to a templated push
/// notification (§3 "Notification Rule").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub project_slug: String,
    pub table: String,
    pub event: RuleEvent,
    pub recipient_column: String,
    pub title_template: String,
    pub body_template: String,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub data_payload: Value,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

fn compare(op: ConditionOp, field_value: &Value, expected: &Value) -> bool {
    match op {
        ConditionOp::Eq => field_value == expected,
        ConditionOp::Neq => field_value != expected,
        ConditionOp::Gt | ConditionOp::Gte | ConditionOp::Lt | ConditionOp::Lte => {
            let (Some(a), Some(b)) = (as_f64(field_value), as_f64(expected)) else {
                return false;
            };
            match op {
                ConditionOp::Gt => a > b,
                ConditionOp::Gte => a >= b,
                ConditionOp::Lt => a < b,
                ConditionOp::Lte => a <= b,
                ConditionOp::Eq | ConditionOp::Neq => unreachable!(),
            }
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// All conditions must match (§4.8 "evaluate conditions (all must match)").
pub fn conditions_match(conditions: &[RuleCondition], row: &serde_json::Map<String, Value>) -> bool {
    conditions.iter().all(|condition| {
        let field_value = row.get(&condition.field).unwrap_or(&Value::Null);
        compare(condition.op, field_value, &condition.value)
    })
}

/// Resolves the recipient from `row[rule.recipient_column]`, stringified. Returns `None` when the
/// column is absent or null — a rule whose recipient can't be determined enqueues nothing.
pub fn resolve_recipient(rule: &NotificationRule, row: &serde_json::Map<String, Value>) -> Option<String> {
    match row.get(&rule.recipient_column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Replaces every `{{field}}` occurrence with the stringified field value (empty string for
/// null), per §4.8 "render templates".
pub fn render_template(template: &str, row: &serde_json::Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str("{{");
            rest = after_open;
            continue;
        };
        let field = after_open[..end].trim();
        out.push_str(&stringify_field(row, field));
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    out
}

fn stringify_field(row: &serde_json::Map<String, Value>, field: &str) -> String {
    match row.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> serde_json::Map<String, Value> {
        json!({ "id": 42, "user_id": "u1", "status": "paid" })
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn renders_multiple_placeholders() {
        let rendered = render_template("Order {{id}}", &row());
        assert_eq!(rendered, "Order 42");
        let rendered = render_template("Status {{status}}", &row());
        assert_eq!(rendered, "Status paid");
    }

    #[test]
    fn missing_field_renders_as_empty_string() {
        assert_eq!(render_template("Hi {{missing}}!", &row()), "Hi !");
    }

    #[test]
    fn all_conditions_must_match() {
        let conditions = vec![
            RuleCondition {
                field: "status".into(),
                op: ConditionOp::Eq,
                value: json!("paid"),
            },
            RuleCondition {
                field: "id".into(),
                op: ConditionOp::Gt,
                value: json!(10),
            },
        ];
        assert!(conditions_match(&conditions, &row()));

        let conditions = vec![RuleCondition {
            field: "status".into(),
            op: ConditionOp::Eq,
            value: json!("refunded"),
        }];
        assert!(!conditions_match(&conditions, &row()));
    }

    #[test]
    fn recipient_resolves_from_configured_column() {
        let rule = NotificationRule {
            project_slug: "acme".into(),
            table: "orders".into(),
            event: RuleEvent::Insert,
            recipient_column: "user_id".into(),
            title_template: "Order {{id}}".into(),
            body_template: "Status {{status}}".into(),
            conditions: Vec::new(),
            data_payload: Value::Null,
            active: true,
        };
        assert_eq!(resolve_recipient(&rule, &row()), Some("u1".into()));
    }

    #[test]
    fn rule_event_all_matches_every_action() {
        assert!(RuleEvent::All.matches("INSERT"));
        assert!(RuleEvent::All.matches("DELETE"));
        assert!(RuleEvent::Insert.matches("INSERT"));
        assert!(!RuleEvent::Insert.matches("UPDATE"));
    }
}
