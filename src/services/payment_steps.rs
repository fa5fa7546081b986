use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

/// Lifecycle status of a payment step. The persisted column is text because
/// historical rows carry a wider taxonomy (`pending`, `contract_created`,
/// `overdue`); everything that is not `paid` behaves as unpaid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Unpaid,
    Paid,
}

impl StepStatus {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("paid") {
            Self::Paid
        } else {
            Self::Unpaid
        }
    }
}

/// Report bucket for a raw status string. Explicit lookup with a safe
/// default: an unrecognized status must never crash a report, it folds into
/// the pending column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    Paid,
    Overdue,
    Pending,
}

pub fn bucket_for_status(raw: &str) -> StatusBucket {
    match raw.trim().to_ascii_lowercase().as_str() {
        "paid" => StatusBucket::Paid,
        "overdue" => StatusBucket::Overdue,
        "pending" | "contract_created" | "unpaid" => StatusBucket::Pending,
        _ => StatusBucket::Pending,
    }
}

/// A payment step as the aggregators see it: parsed out of a `row_to_json`
/// row, with the denormalized parent contract code attached by the caller's
/// join (None when the parent record is missing — an orphan).
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub id: String,
    pub contract_id: String,
    pub contract_code: Option<String>,
    pub step_number: i64,
    pub description: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: String,
    pub contract_created: bool,
}

impl StepRecord {
    /// Parse a step row. Returns `None` when the fields aggregation depends
    /// on (id, due date, amount) are missing or malformed; batch callers go
    /// through `parse_step_rows`, which counts such rows.
    pub fn from_row(row: &Value) -> Option<Self> {
        let id = value_str(row, "id")?;
        let contract_id = value_str(row, "contract_id").unwrap_or_default();
        let due_date = value_str(row, "due_date")
            .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok())?;
        let amount = decimal_from_value(row.get("amount"))?;

        Some(Self {
            id,
            contract_id,
            contract_code: None,
            step_number: row
                .get("step_number")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
            description: value_str(row, "description").unwrap_or_default(),
            amount,
            due_date,
            status: value_str(row, "status").unwrap_or_else(|| "unpaid".to_string()),
            contract_created: row
                .get("contract_created")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    pub fn is_paid(&self) -> bool {
        StepStatus::parse(&self.status) == StepStatus::Paid
    }
}

/// Parse a batch of step rows, counting the ones that fail. Callers surface
/// a non-zero skip count on the report's `error` marker so partial totals
/// are never mistaken for complete ones.
pub fn parse_step_rows(rows: &[Value]) -> (Vec<StepRecord>, usize) {
    let mut steps = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for row in rows {
        match StepRecord::from_row(row) {
            Some(step) => steps.push(step),
            None => skipped += 1,
        }
    }
    (steps, skipped)
}

/// Amount columns arrive from `row_to_json` either as a JSON number or as a
/// string (numeric is stringified by some drivers). Negative amounts are
/// rejected; amounts are business-invalid below zero.
pub fn decimal_from_value(value: Option<&Value>) -> Option<Decimal> {
    let parsed = match value {
        Some(Value::Number(number)) => number.to_string().parse::<Decimal>().ok(),
        Some(Value::String(text)) => text.trim().parse::<Decimal>().ok(),
        _ => None,
    }?;
    if parsed < Decimal::ZERO {
        return None;
    }
    Some(parsed)
}

fn value_str(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{
        bucket_for_status, decimal_from_value, parse_step_rows, StatusBucket, StepRecord,
        StepStatus,
    };

    #[test]
    fn status_parse_folds_legacy_values_into_unpaid() {
        assert_eq!(StepStatus::parse("paid"), StepStatus::Paid);
        assert_eq!(StepStatus::parse("PAID"), StepStatus::Paid);
        assert_eq!(StepStatus::parse("unpaid"), StepStatus::Unpaid);
        assert_eq!(StepStatus::parse("pending"), StepStatus::Unpaid);
        assert_eq!(StepStatus::parse("contract_created"), StepStatus::Unpaid);
        assert_eq!(StepStatus::parse("overdue"), StepStatus::Unpaid);
    }

    #[test]
    fn bucket_mapping_has_safe_default() {
        assert_eq!(bucket_for_status("paid"), StatusBucket::Paid);
        assert_eq!(bucket_for_status("overdue"), StatusBucket::Overdue);
        assert_eq!(bucket_for_status("pending"), StatusBucket::Pending);
        assert_eq!(bucket_for_status("contract_created"), StatusBucket::Pending);
        assert_eq!(bucket_for_status("unpaid"), StatusBucket::Pending);
        assert_eq!(bucket_for_status("some_future_status"), StatusBucket::Pending);
        assert_eq!(bucket_for_status(""), StatusBucket::Pending);
    }

    #[test]
    fn parses_amount_from_number_or_string() {
        assert_eq!(
            decimal_from_value(Some(&json!("1250.50"))),
            Some(Decimal::new(125050, 2))
        );
        assert_eq!(
            decimal_from_value(Some(&json!(100))),
            Some(Decimal::from(100))
        );
        assert_eq!(decimal_from_value(Some(&json!("-5"))), None);
        assert_eq!(decimal_from_value(Some(&json!(null))), None);
        assert_eq!(decimal_from_value(None), None);
    }

    #[test]
    fn step_record_requires_id_date_and_amount() {
        let full = json!({
            "id": "s1",
            "contract_id": "c1",
            "step_number": 2,
            "description": "second installment",
            "amount": "500.00",
            "due_date": "2025-06-15",
            "status": "unpaid",
            "contract_created": false
        });
        let record = StepRecord::from_row(&full).expect("well-formed row");
        assert_eq!(record.step_number, 2);
        assert_eq!(record.amount, Decimal::from(500));
        assert!(!record.is_paid());

        let missing_date = json!({ "id": "s1", "amount": "500.00" });
        assert!(StepRecord::from_row(&missing_date).is_none());

        let bad_amount = json!({ "id": "s1", "due_date": "2025-06-15", "amount": "n/a" });
        assert!(StepRecord::from_row(&bad_amount).is_none());
    }

    #[test]
    fn batch_parse_counts_malformed_rows() {
        let rows = vec![
            json!({
                "id": "s1",
                "contract_id": "c1",
                "amount": "100.00",
                "due_date": "2025-06-15",
                "status": "unpaid"
            }),
            json!({ "id": "s2", "amount": "not-a-number", "due_date": "2025-06-15" }),
            json!({ "id": "s3", "amount": "50.00" }),
        ];
        let (steps, skipped) = parse_step_rows(&rows);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id, "s1");
        assert_eq!(skipped, 2);
    }
}
