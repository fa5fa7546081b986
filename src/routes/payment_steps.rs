use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_actor,
    error::{AppError, AppResult},
    repository::payment_steps::{fetch_step, mark_paid, record_contract_created},
    repository::table_service::{create_row_tx, get_row, list_rows},
    schemas::{
        clamp_limit_in_range, parse_rfc3339_timestamp, validate_input, ContractPath,
        CreatePaymentScheduleInput, MarkStepPaidInput, PaymentStepsQuery, StepPath,
    },
    services::audit::write_audit_log,
    services::payment_steps::decimal_from_value,
    services::permissions::can_create_payment_contract,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/contracts/{contract_id}/payment-steps",
            axum::routing::post(create_payment_schedule),
        )
        .route("/payment-steps", axum::routing::get(list_payment_steps))
        .route(
            "/payment-steps/{step_id}/mark-paid",
            axum::routing::post(mark_step_paid),
        )
        .route(
            "/payment-steps/{step_id}/create-contract",
            axum::routing::post(create_step_contract),
        )
}

/// Establish a contract's payment schedule: N steps numbered 1..N, all
/// unpaid. A schedule can only be established once per contract.
async fn create_payment_schedule(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentScheduleInput>,
) -> AppResult<impl IntoResponse> {
    let actor = require_actor(&state, &headers).await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    let _contract = get_row(pool, "contracts", &path.contract_id, "id").await?;

    let existing = list_rows(
        pool,
        "payment_steps",
        Some(&json_map(&[(
            "contract_id",
            Value::String(path.contract_id.clone()),
        )])),
        1,
        0,
        "step_number",
        true,
    )
    .await?;
    if !existing.is_empty() {
        return Err(AppError::PreconditionFailed(
            "A payment schedule was already established for this contract.".to_string(),
        ));
    }

    // Validate every step before inserting any.
    let mut parsed_steps = Vec::with_capacity(payload.steps.len());
    for (index, step) in payload.steps.iter().enumerate() {
        let amount = decimal_from_value(Some(&Value::String(step.amount.clone())))
            .ok_or_else(|| {
                AppError::UnprocessableEntity(format!(
                    "Step {}: amount must be a non-negative decimal.",
                    index + 1
                ))
            })?;
        let due_date = NaiveDate::parse_from_str(step.due_date.trim(), "%Y-%m-%d")
            .map_err(|_| {
                AppError::UnprocessableEntity(format!(
                    "Step {}: due_date must be an ISO date (YYYY-MM-DD).",
                    index + 1
                ))
            })?;
        parsed_steps.push((step.description.clone(), amount, due_date));
    }

    let mut transaction = pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to open transaction");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let mut created_steps = Vec::with_capacity(parsed_steps.len());
    for (index, (description, amount, due_date)) in parsed_steps.into_iter().enumerate() {
        let mut row = Map::new();
        row.insert(
            "contract_id".to_string(),
            Value::String(path.contract_id.clone()),
        );
        row.insert(
            "step_number".to_string(),
            Value::Number(((index + 1) as i64).into()),
        );
        row.insert("description".to_string(), Value::String(description));
        row.insert("amount".to_string(), Value::String(amount.to_string()));
        row.insert(
            "due_date".to_string(),
            Value::String(due_date.to_string()),
        );
        row.insert("status".to_string(), Value::String("unpaid".to_string()));
        row.insert("contract_created".to_string(), Value::Bool(false));

        let created = create_row_tx(&mut transaction, "payment_steps", &row).await?;
        created_steps.push(created);
    }

    transaction.commit().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to commit payment schedule");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&actor.id),
        "create_schedule",
        "payment_steps",
        Some(&path.contract_id),
        None,
        Some(json!({ "steps_count": created_steps.len() })),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "data": created_steps })),
    ))
}

async fn list_payment_steps(
    State(state): State<AppState>,
    Query(query): Query<PaymentStepsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _actor = require_actor(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let rows = list_rows(
        pool,
        "payment_steps",
        Some(&json_map(&[(
            "contract_id",
            Value::String(query.contract_id.clone()),
        )])),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "step_number",
        true,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

/// Mark a payment step paid. Idempotent: a second call reports
/// `already_paid` with a 200 instead of erroring.
async fn mark_step_paid(
    State(state): State<AppState>,
    Path(path): Path<StepPath>,
    headers: HeaderMap,
    Json(payload): Json<MarkStepPaidInput>,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let paid_at = match payload.paid_at.as_deref() {
        Some(raw) => parse_rfc3339_timestamp(raw)?.to_rfc3339(),
        None => Utc::now().to_rfc3339(),
    };
    let result = mark_paid(pool, &path.step_id, &paid_at).await?;

    if result.already_paid {
        return Ok(Json(json!({
            "data": result.step,
            "already_paid": true,
            "detail": "Step is already marked as paid."
        })));
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&actor.id),
        "mark_paid",
        "payment_steps",
        Some(&path.step_id),
        None,
        Some(result.step.clone()),
    )
    .await;

    Ok(Json(json!({ "data": result.step, "already_paid": false })))
}

/// Record that a payment contract document was generated for a step.
/// Timing is gated by due date for non-administrators; generation is
/// at-most-once per step.
async fn create_step_contract(
    State(state): State<AppState>,
    Path(path): Path<StepPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let actor = require_actor(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let step = fetch_step(pool, &path.step_id).await?;
    let contract_created = step
        .get("contract_created")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let due_date = step
        .get("due_date")
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
        .ok_or_else(|| {
            AppError::Internal("Payment step has a malformed due date.".to_string())
        })?;

    let today = state.config.today();
    if !can_create_payment_contract(&actor, contract_created, due_date, today) {
        if contract_created {
            return Err(AppError::PreconditionFailed(
                "A payment contract was already created for this step.".to_string(),
            ));
        }
        return Err(AppError::Forbidden(
            "This step is not due yet; only an administrator can create its contract early."
                .to_string(),
        ));
    }

    let updated = record_contract_created(pool, &path.step_id, &actor.id, Utc::now()).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&actor.id),
        "create_contract",
        "payment_steps",
        Some(&path.step_id),
        Some(step),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({ "data": updated })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}
