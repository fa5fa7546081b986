use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{get_row, update_row_guarded};

/// Result of a mark-paid call. Re-invoking on an already-paid step is a
/// no-op that reports `already_paid` instead of erroring.
pub struct MarkPaidResult {
    pub step: Value,
    pub already_paid: bool,
}

pub async fn fetch_step(pool: &PgPool, step_id: &str) -> AppResult<Value> {
    get_row(pool, "payment_steps", step_id, "id").await
}

/// Transition a step to `paid` with a single conditional update
/// (`WHERE status <> 'paid'`). Idempotent.
pub async fn mark_paid(pool: &PgPool, step_id: &str, paid_at: &str) -> AppResult<MarkPaidResult> {
    let updated = update_row_guarded(
        pool,
        "payment_steps",
        step_id,
        &paid_patch(paid_at),
        "id",
        Some(&paid_guards()),
    )
    .await?;
    if let Some(step) = updated {
        return Ok(MarkPaidResult {
            step,
            already_paid: false,
        });
    }

    // No row matched the guard: either the step is already paid or it does
    // not exist. Distinguish with a plain fetch.
    let step = fetch_step(pool, step_id).await?;
    Ok(MarkPaidResult {
        step,
        already_paid: true,
    })
}

fn paid_patch(paid_at: &str) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String("paid".to_string()));
    patch.insert("paid_at".to_string(), Value::String(paid_at.to_string()));
    patch
}

/// Any status other than `paid` may transition, whatever taxonomy the row
/// carries.
fn paid_guards() -> Map<String, Value> {
    let mut guards = Map::new();
    guards.insert("status__ne".to_string(), Value::String("paid".to_string()));
    guards
}

/// Record that a payment contract document was generated for this step.
/// At-most-once: the precondition (`contract_created = false`) and the write
/// are one atomic statement, so two concurrent actors cannot both succeed.
pub async fn record_contract_created(
    pool: &PgPool,
    step_id: &str,
    actor_id: &str,
    at: DateTime<Utc>,
) -> AppResult<Value> {
    let updated = update_row_guarded(
        pool,
        "payment_steps",
        step_id,
        &creation_patch(actor_id, at),
        "id",
        Some(&creation_guards()),
    )
    .await?;

    match updated {
        Some(step) => Ok(step),
        None => {
            // Row missing vs. precondition failed.
            let _ = fetch_step(pool, step_id).await?;
            Err(AppError::PreconditionFailed(
                "A payment contract was already created for this step.".to_string(),
            ))
        }
    }
}

fn creation_patch(actor_id: &str, at: DateTime<Utc>) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("contract_created".to_string(), Value::Bool(true));
    patch.insert(
        "contract_created_at".to_string(),
        Value::String(at.to_rfc3339()),
    );
    patch.insert(
        "contract_created_by".to_string(),
        Value::String(actor_id.to_string()),
    );
    patch
}

fn creation_guards() -> Map<String, Value> {
    let mut guards = Map::new();
    guards.insert("contract_created".to_string(), Value::Bool(false));
    guards
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{creation_guards, creation_patch, paid_guards, paid_patch};
    use crate::repository::table_service::build_guarded_update;

    const STEP_ID: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";
    const ACTOR_ID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn mark_paid_statement_updates_only_non_paid_rows() {
        let query = build_guarded_update(
            "payment_steps",
            STEP_ID,
            &paid_patch("2025-06-15T08:00:00+00:00"),
            "id",
            Some(&paid_guards()),
        )
        .unwrap();
        let sql = query.sql();
        assert!(sql.starts_with("UPDATE payment_steps t SET paid_at = r.paid_at, status = r.status"));
        assert!(sql.contains("WHERE t.id = "));
        assert!(
            sql.contains(" AND t.status::text <> "),
            "expected a status guard in: {sql}"
        );
    }

    #[test]
    fn create_contract_statement_guards_on_unset_flag() {
        let query = build_guarded_update(
            "payment_steps",
            STEP_ID,
            &creation_patch(ACTOR_ID, Utc::now()),
            "id",
            Some(&creation_guards()),
        )
        .unwrap();
        let sql = query.sql();
        assert!(sql.contains("contract_created = r.contract_created"));
        assert!(sql.contains("contract_created_by = r.contract_created_by"));
        assert!(
            sql.contains(" AND t.contract_created = "),
            "expected the at-most-once guard in: {sql}"
        );
    }
}
