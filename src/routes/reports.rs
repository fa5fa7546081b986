use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value};

use crate::{
    auth::require_actor,
    error::{AppError, AppResult},
    repository::table_service::list_rows,
    schemas::{MonthlyReportQuery, YearlyReportQuery},
    services::monthly_report::{aggregate_monthly, degraded_monthly, MonthlyReport},
    services::payment_steps::{parse_step_rows, StepRecord},
    services::yearly_report::{
        aggregate_yearly, degraded_yearly, ContractWithSteps, LandRef, PartyRef, YearSelection,
        YearlyReport,
    },
    state::AppState,
};

const REPORT_FETCH_LIMIT: i64 = 5000;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/reports/monthly-payments",
            axum::routing::get(monthly_payments_report),
        )
        .route(
            "/reports/yearly-payments",
            axum::routing::get(yearly_payments_report),
        )
}

/// Monthly payment report. Reporting endpoints degrade instead of failing:
/// any internal error yields a zeroed summary with an `error` marker, so a
/// dashboard request never turns into a 500.
async fn monthly_payments_report(
    State(state): State<AppState>,
    Query(query): Query<MonthlyReportQuery>,
    headers: HeaderMap,
) -> AppResult<Json<MonthlyReport>> {
    let _actor = require_actor(&state, &headers).await?;
    let from_date = parse_date(&query.from_date)?;
    let to_date = parse_date(&query.to_date)?;
    if to_date < from_date {
        return Err(AppError::BadRequest(
            "to_date must not be before from_date.".to_string(),
        ));
    }

    let report = match fetch_monthly(&state, from_date, to_date).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Monthly report aggregation failed, returning degraded result");
            degraded_monthly(from_date, to_date, "aggregation_failed")
        }
    };
    Ok(Json(report))
}

async fn fetch_monthly(
    state: &AppState,
    from_date: NaiveDate,
    to_date: NaiveDate,
) -> AppResult<MonthlyReport> {
    let pool = db_pool(state)?;

    let step_rows = list_rows(
        pool,
        "payment_steps",
        Some(&json_map(&[
            ("due_date__gte", Value::String(from_date.to_string())),
            ("due_date__lte", Value::String(to_date.to_string())),
        ])),
        REPORT_FETCH_LIMIT,
        0,
        "due_date",
        true,
    )
    .await?;

    // Join in the parent contract codes; steps whose parent is missing stay
    // without a code and are treated as orphans by the aggregator.
    let contract_ids = step_rows
        .iter()
        .filter_map(|row| value_str(row, "contract_id"))
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .map(Value::String)
        .collect::<Vec<_>>();

    let contract_index = if contract_ids.is_empty() {
        HashMap::new()
    } else {
        let contracts = list_rows(
            pool,
            "contracts",
            Some(&json_map(&[("id__in", Value::Array(contract_ids))])),
            REPORT_FETCH_LIMIT,
            0,
            "created_at",
            true,
        )
        .await?;
        index_by_id(&contracts)
    };

    let (parsed, skipped) = parse_step_rows(&step_rows);
    let steps = parsed
        .into_iter()
        .map(|mut step| {
            step.contract_code = contract_index
                .get(&step.contract_id)
                .and_then(|contract| value_str(contract, "contract_code"));
            step
        })
        .collect::<Vec<_>>();

    let mut report = aggregate_monthly(&steps, from_date, to_date);
    if skipped > 0 {
        tracing::warn!(skipped, "Monthly report skipped malformed payment step rows");
        report.error = Some(format!("skipped_malformed_rows:{skipped}"));
    }
    Ok(report)
}

/// Yearly payment report: per-contract month buckets for a specific year,
/// or year buckets within the configured window for `year=all`.
async fn yearly_payments_report(
    State(state): State<AppState>,
    Query(query): Query<YearlyReportQuery>,
    headers: HeaderMap,
) -> AppResult<Json<YearlyReport>> {
    let _actor = require_actor(&state, &headers).await?;
    let selection = parse_year_selection(&state, &query.year)?;

    let report = match fetch_yearly(&state, selection).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Yearly report aggregation failed, returning degraded result");
            degraded_yearly("aggregation_failed")
        }
    };
    Ok(Json(report))
}

fn parse_year_selection(state: &AppState, raw: &str) -> AppResult<YearSelection> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("all") {
        return Ok(YearSelection::AllYears {
            current_year: state.config.today().year(),
            window: state.config.yearly_report_window_years,
        });
    }
    if trimmed.len() == 4 {
        if let Ok(year) = trimmed.parse::<i32>() {
            return Ok(YearSelection::Single(year));
        }
    }
    Err(AppError::BadRequest(
        "year must be a four-digit year or 'all'.".to_string(),
    ))
}

async fn fetch_yearly(state: &AppState, selection: YearSelection) -> AppResult<YearlyReport> {
    let pool = db_pool(state)?;

    let contract_rows = list_rows(pool, "contracts", None, REPORT_FETCH_LIMIT, 0, "created_at", true)
        .await?;
    let contract_id_values = contract_rows
        .iter()
        .filter_map(|row| value_str(row, "id"))
        .map(Value::String)
        .collect::<Vec<_>>();
    if contract_id_values.is_empty() {
        return Ok(aggregate_yearly(&[], selection));
    }

    // Year filtering happens in the query for the single-year view; the
    // all-years view fetches everything and lets the aggregator window it.
    let mut step_filters = json_map(&[(
        "contract_id__in",
        Value::Array(contract_id_values.clone()),
    )]);
    if let YearSelection::Single(year) = selection {
        step_filters.insert(
            "due_date__gte".to_string(),
            Value::String(format!("{year}-01-01")),
        );
        step_filters.insert(
            "due_date__lte".to_string(),
            Value::String(format!("{year}-12-31")),
        );
    }
    let step_rows = list_rows(
        pool,
        "payment_steps",
        Some(&step_filters),
        REPORT_FETCH_LIMIT,
        0,
        "due_date",
        true,
    )
    .await?;

    let (parsed, skipped) = parse_step_rows(&step_rows);
    let mut steps_by_contract: HashMap<String, Vec<StepRecord>> = HashMap::new();
    for step in parsed {
        steps_by_contract
            .entry(step.contract_id.clone())
            .or_default()
            .push(step);
    }

    let lands_by_contract = fetch_display_refs(
        pool,
        "contract_lands",
        "lands",
        "land_id",
        &contract_id_values,
    )
    .await?;
    let buyers_by_contract = fetch_display_refs(
        pool,
        "contract_buyers",
        "buyers",
        "buyer_id",
        &contract_id_values,
    )
    .await?;
    let sellers_by_contract = fetch_display_refs(
        pool,
        "contract_sellers",
        "sellers",
        "seller_id",
        &contract_id_values,
    )
    .await?;

    let mut contracts = Vec::with_capacity(contract_rows.len());
    for row in &contract_rows {
        let Some(contract_id) = value_str(row, "id") else {
            continue;
        };
        let contract_code =
            value_str(row, "contract_code").unwrap_or_else(|| contract_id.clone());

        let lands = lands_by_contract
            .get(&contract_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(id, label)| LandRef {
                id,
                plot_number: label,
            })
            .collect::<Vec<_>>();
        let buyers = party_refs(&buyers_by_contract, &contract_id);
        let sellers = party_refs(&sellers_by_contract, &contract_id);

        contracts.push(ContractWithSteps {
            contract_code,
            lands,
            buyers,
            sellers,
            steps: steps_by_contract.remove(&contract_id).unwrap_or_default(),
        });
    }

    let mut report = aggregate_yearly(&contracts, selection);
    if skipped > 0 {
        tracing::warn!(skipped, "Yearly report skipped malformed payment step rows");
        report.error = Some(format!("skipped_malformed_rows:{skipped}"));
    }
    Ok(report)
}

/// Resolve a contract→entity link table into `(entity_id, display_label)`
/// pairs per contract. Lands label with `plot_number`, parties with `name`.
async fn fetch_display_refs(
    pool: &sqlx::PgPool,
    link_table: &str,
    entity_table: &str,
    entity_id_field: &str,
    contract_ids: &[Value],
) -> AppResult<HashMap<String, Vec<(String, String)>>> {
    let links = list_rows(
        pool,
        link_table,
        Some(&json_map(&[(
            "contract_id__in",
            Value::Array(contract_ids.to_vec()),
        )])),
        REPORT_FETCH_LIMIT,
        0,
        "created_at",
        true,
    )
    .await?;

    let entity_ids = links
        .iter()
        .filter_map(|row| value_str(row, entity_id_field))
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .map(Value::String)
        .collect::<Vec<_>>();

    let entity_index = if entity_ids.is_empty() {
        HashMap::new()
    } else {
        let entities = list_rows(
            pool,
            entity_table,
            Some(&json_map(&[("id__in", Value::Array(entity_ids))])),
            REPORT_FETCH_LIMIT,
            0,
            "created_at",
            true,
        )
        .await?;
        index_by_id(&entities)
    };

    let label_field = if entity_table == "lands" {
        "plot_number"
    } else {
        "name"
    };

    let mut refs: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for link in &links {
        let (Some(contract_id), Some(entity_id)) = (
            value_str(link, "contract_id"),
            value_str(link, entity_id_field),
        ) else {
            continue;
        };
        let label = entity_index
            .get(&entity_id)
            .and_then(|entity| value_str(entity, label_field))
            .unwrap_or_default();
        refs.entry(contract_id).or_default().push((entity_id, label));
    }
    Ok(refs)
}

fn party_refs(
    by_contract: &HashMap<String, Vec<(String, String)>>,
    contract_id: &str,
) -> Vec<PartyRef> {
    by_contract
        .get(contract_id)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|(id, name)| PartyRef { id, name })
        .collect()
}

fn index_by_id(rows: &[Value]) -> HashMap<String, Value> {
    let mut index = HashMap::new();
    for row in rows {
        if let Some(id) = value_str(row, "id") {
            index.insert(id, row.clone());
        }
    }
    index
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date.".to_string()))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}
