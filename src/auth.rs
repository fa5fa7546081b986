use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::get_row;
use crate::services::permissions::Actor;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Resolve the acting user for a request.
///
/// Accepts a `Bearer` HS256 token whose `sub` is the user id, or — outside
/// production with DEV_AUTH_OVERRIDES_ENABLED — a plain `x-user-id` header.
pub async fn require_actor(state: &AppState, headers: &HeaderMap) -> AppResult<Actor> {
    let user_id = resolve_user_id(state, headers)?;
    load_actor(state, &user_id).await
}

fn resolve_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_str(headers, "x-user-id") {
            return Ok(user_id);
        }
    }

    let token = header_str(headers, "authorization")
        .and_then(|value| value.strip_prefix("Bearer ").map(ToOwned::to_owned))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token.".to_string()))?;

    let secret = state
        .config
        .jwt_secret
        .as_deref()
        .ok_or_else(|| AppError::Dependency("JWT_SECRET is not configured.".to_string()))?;

    let decoded = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Rejected bearer token");
        AppError::Unauthorized("Invalid or expired token.".to_string())
    })?;

    Ok(decoded.claims.sub)
}

async fn load_actor(state: &AppState, user_id: &str) -> AppResult<Actor> {
    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })?;

    let user = get_row(pool, "app_users", user_id, "id")
        .await
        .map_err(unauthorized_if_missing)?;

    Ok(Actor {
        id: user_id.to_string(),
        is_administrator: bool_value(user.get("is_administrator")),
    })
}

/// An unknown user id is a credential problem; anything else (DB outage,
/// bad query) keeps its own status.
fn unauthorized_if_missing(error: AppError) -> AppError {
    match error {
        AppError::NotFound(_) => AppError::Unauthorized("Unknown user.".to_string()),
        other => other,
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn bool_value(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => {
            let lower = text.trim().to_ascii_lowercase();
            lower == "true" || lower == "1"
        }
        Some(Value::Number(number)) => number.as_i64().is_some_and(|value| value != 0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::unauthorized_if_missing;
    use crate::error::AppError;

    #[test]
    fn only_missing_users_become_unauthorized() {
        let mapped = unauthorized_if_missing(AppError::NotFound("app_users".to_string()));
        assert!(matches!(mapped, AppError::Unauthorized(_)));

        let outage = unauthorized_if_missing(AppError::Dependency("db down".to_string()));
        assert!(matches!(outage, AppError::Dependency(_)));
    }
}
