use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_actor,
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows},
    schemas::ContractPath,
    services::contract_totals::aggregate_contract,
    services::payment_steps::StepRecord,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/contracts/{contract_id}/payment-summary",
        axum::routing::get(contract_payment_summary),
    )
}

async fn contract_payment_summary(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _actor = require_actor(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let contract = get_row(pool, "contracts", &path.contract_id, "id").await?;

    let mut filters = Map::new();
    filters.insert(
        "contract_id".to_string(),
        Value::String(path.contract_id.clone()),
    );
    let rows = list_rows(pool, "payment_steps", Some(&filters), 1000, 0, "step_number", true)
        .await?;

    let steps = rows
        .iter()
        .filter_map(StepRecord::from_row)
        .collect::<Vec<_>>();
    let totals = aggregate_contract(&steps);

    Ok(Json(json!({
        "contract_id": path.contract_id,
        "contract_code": contract.get("contract_code").cloned().unwrap_or(Value::Null),
        "contract_status": contract.get("status").cloned().unwrap_or(Value::Null),
        "totals": totals,
    })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}
