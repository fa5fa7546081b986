use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Fire-and-forget audit trail. Audit failures are logged, never surfaced:
/// a transition must not fail because its audit row could not be written.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    actor_id: Option<&str>,
    action: &str,
    entity_table: &str,
    entity_id: Option<&str>,
    before: Option<Value>,
    after: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut row = Map::new();
    row.insert("action".to_string(), Value::String(action.to_string()));
    row.insert(
        "entity_table".to_string(),
        Value::String(entity_table.to_string()),
    );
    row.insert(
        "occurred_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    if let Some(actor_id) = actor_id {
        row.insert(
            "actor_user_id".to_string(),
            Value::String(actor_id.to_string()),
        );
    }
    if let Some(entity_id) = entity_id {
        row.insert(
            "entity_id".to_string(),
            Value::String(entity_id.to_string()),
        );
    }
    if let Some(before) = before {
        row.insert("before_state".to_string(), before);
    }
    if let Some(after) = after {
        row.insert("after_state".to_string(), after);
    }

    if let Err(e) = create_row(pool, "audit_logs", &row).await {
        tracing::warn!(error = %e, action, entity_table, "Failed to write audit log");
    }
}
