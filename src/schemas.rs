use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

/// Parse a client-supplied timestamp before it reaches the database, so a
/// malformed value is a 422 instead of a failed statement.
pub fn parse_rfc3339_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, AppError> {
    DateTime::parse_from_rfc3339(raw.trim()).map_err(|_| {
        AppError::UnprocessableEntity(
            "Expected an RFC 3339 timestamp (e.g. 2025-06-15T08:00:00Z).".to_string(),
        )
    })
}

pub fn clamp_limit_in_range(limit: Option<i64>, min: i64, max: i64) -> i64 {
    limit.unwrap_or(max).clamp(min, max)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepPath {
    pub step_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractPath {
    pub contract_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentStepsQuery {
    pub contract_id: String,
    pub limit: Option<i64>,
}

/// One installment in a new payment schedule. Amounts travel as strings so
/// decimal precision survives JSON (`"1250.50"`).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PaymentStepInput {
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    #[validate(length(min = 1, max = 32))]
    pub amount: String,
    /// ISO-8601 date (`YYYY-MM-DD`).
    pub due_date: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePaymentScheduleInput {
    #[validate(length(min = 1, max = 120), nested)]
    pub steps: Vec<PaymentStepInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkStepPaidInput {
    /// RFC 3339 timestamp; defaults to now.
    pub paid_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonthlyReportQuery {
    pub from_date: String,
    pub to_date: String,
}

fn default_year_all() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct YearlyReportQuery {
    /// A four-digit year, or `all` for the multi-year window view.
    #[serde(default = "default_year_all")]
    pub year: String,
}

#[cfg(test)]
mod tests {
    use super::{
        clamp_limit_in_range, parse_rfc3339_timestamp, validate_input, CreatePaymentScheduleInput,
    };

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(None, 1, 1000), 1000);
        assert_eq!(clamp_limit_in_range(Some(0), 1, 1000), 1);
        assert_eq!(clamp_limit_in_range(Some(50), 1, 1000), 50);
        assert_eq!(clamp_limit_in_range(Some(9999), 1, 1000), 1000);
    }

    #[test]
    fn accepts_rfc3339_and_rejects_everything_else() {
        assert!(parse_rfc3339_timestamp("2025-06-15T08:00:00Z").is_ok());
        assert!(parse_rfc3339_timestamp("2025-06-15T08:00:00+07:00").is_ok());
        assert!(parse_rfc3339_timestamp("2025-06-15").is_err());
        assert!(parse_rfc3339_timestamp("yesterday").is_err());
    }

    #[test]
    fn rejects_empty_schedule() {
        let input: CreatePaymentScheduleInput =
            serde_json::from_value(serde_json::json!({ "steps": [] })).unwrap();
        assert!(validate_input(&input).is_err());
    }
}
