use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::services::payment_steps::{bucket_for_status, StatusBucket, StepRecord};

/// One calendar month of payment steps, keyed by `YYYY-MM`.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MonthlyBucket {
    pub total_amount: Decimal,
    pub total_paid: Decimal,
    pub total_overdue: Decimal,
    pub total_pending: Decimal,
    pub steps: Vec<StepProjection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepProjection {
    pub id: String,
    pub contract_code: String,
    pub step_number: i64,
    pub description: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlySummary {
    pub total_amount: Decimal,
    pub total_paid: Decimal,
    pub total_overdue: Decimal,
    pub total_pending: Decimal,
    pub payment_steps_count: usize,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    /// BTreeMap keeps keys ascending, which is chronological for `YYYY-MM`.
    pub monthly_data: BTreeMap<String, MonthlyBucket>,
    pub summary: MonthlySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bucket payment steps into calendar months by due date.
///
/// The caller supplies steps already filtered to `[from_date, to_date]` and
/// pre-sorted by due date; within a bucket the supplied order is preserved.
/// Steps whose parent contract record is missing (`contract_code == None`)
/// are orphans and are excluded entirely — they appear in no bucket and
/// contribute to no total.
pub fn aggregate_monthly(
    steps: &[StepRecord],
    from_date: NaiveDate,
    to_date: NaiveDate,
) -> MonthlyReport {
    let mut monthly_data: BTreeMap<String, MonthlyBucket> = BTreeMap::new();
    let mut summary_total = Decimal::ZERO;
    let mut summary_paid = Decimal::ZERO;
    let mut summary_overdue = Decimal::ZERO;
    let mut summary_pending = Decimal::ZERO;
    let mut steps_count = 0usize;

    for step in steps {
        let Some(contract_code) = step.contract_code.clone() else {
            continue;
        };

        let month_key = format!("{:04}-{:02}", step.due_date.year(), step.due_date.month());
        let bucket = monthly_data.entry(month_key).or_default();

        bucket.total_amount += step.amount;
        summary_total += step.amount;
        match bucket_for_status(&step.status) {
            StatusBucket::Paid => {
                bucket.total_paid += step.amount;
                summary_paid += step.amount;
            }
            StatusBucket::Overdue => {
                bucket.total_overdue += step.amount;
                summary_overdue += step.amount;
            }
            StatusBucket::Pending => {
                bucket.total_pending += step.amount;
                summary_pending += step.amount;
            }
        }

        bucket.steps.push(StepProjection {
            id: step.id.clone(),
            contract_code,
            step_number: step.step_number,
            description: step.description.clone(),
            amount: step.amount,
            due_date: step.due_date,
            status: step.status.clone(),
        });
        steps_count += 1;
    }

    MonthlyReport {
        monthly_data,
        summary: MonthlySummary {
            total_amount: summary_total,
            total_paid: summary_paid,
            total_overdue: summary_overdue,
            total_pending: summary_pending,
            payment_steps_count: steps_count,
            from_date,
            to_date,
        },
        error: None,
    }
}

/// Degraded result for a failed aggregation: zeroed summary plus an error
/// marker. A partial report could be mistaken for a complete one; an empty
/// report with an error flag cannot.
pub fn degraded_monthly(from_date: NaiveDate, to_date: NaiveDate, marker: &str) -> MonthlyReport {
    MonthlyReport {
        monthly_data: BTreeMap::new(),
        summary: MonthlySummary {
            total_amount: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            total_overdue: Decimal::ZERO,
            total_pending: Decimal::ZERO,
            payment_steps_count: 0,
            from_date,
            to_date,
        },
        error: Some(marker.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::aggregate_monthly;
    use crate::services::payment_steps::StepRecord;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn step(id: &str, due: &str, amount: i64, status: &str) -> StepRecord {
        StepRecord {
            id: id.to_string(),
            contract_id: "c1".to_string(),
            contract_code: Some("LD-0001".to_string()),
            step_number: 1,
            description: String::new(),
            amount: Decimal::from(amount),
            due_date: date(due),
            status: status.to_string(),
            contract_created: false,
        }
    }

    #[test]
    fn buckets_by_calendar_month() {
        let steps = vec![
            step("s1", "2025-01-10", 100, "paid"),
            step("s2", "2025-01-20", 50, "pending"),
            step("s3", "2025-02-05", 200, "paid"),
        ];
        let report = aggregate_monthly(&steps, date("2025-01-01"), date("2025-02-28"));

        let january = &report.monthly_data["2025-01"];
        assert_eq!(january.total_amount, Decimal::from(150));
        assert_eq!(january.total_paid, Decimal::from(100));
        assert_eq!(january.total_pending, Decimal::from(50));

        let february = &report.monthly_data["2025-02"];
        assert_eq!(february.total_paid, Decimal::from(200));

        assert_eq!(report.summary.total_amount, Decimal::from(350));
        assert_eq!(report.summary.payment_steps_count, 3);
        assert!(report.error.is_none());
    }

    #[test]
    fn month_keys_are_chronological() {
        let steps = vec![
            step("s1", "2025-11-01", 10, "paid"),
            step("s2", "2025-02-01", 10, "paid"),
            step("s3", "2024-12-01", 10, "paid"),
        ];
        let report = aggregate_monthly(&steps, date("2024-12-01"), date("2025-11-30"));
        let keys: Vec<&String> = report.monthly_data.keys().collect();
        assert_eq!(keys, ["2024-12", "2025-02", "2025-11"]);
    }

    #[test]
    fn orphan_steps_are_excluded_entirely() {
        let mut orphan = step("s1", "2025-01-10", 100, "paid");
        orphan.contract_code = None;
        let steps = vec![orphan, step("s2", "2025-01-20", 50, "paid")];

        let report = aggregate_monthly(&steps, date("2025-01-01"), date("2025-01-31"));
        assert_eq!(report.summary.total_amount, Decimal::from(50));
        assert_eq!(report.summary.payment_steps_count, 1);
        assert_eq!(report.monthly_data["2025-01"].steps.len(), 1);
    }

    #[test]
    fn bucket_partition_is_exhaustive_for_any_status() {
        let steps = vec![
            step("s1", "2025-03-01", 100, "paid"),
            step("s2", "2025-03-02", 40, "overdue"),
            step("s3", "2025-03-03", 30, "contract_created"),
            step("s4", "2025-03-04", 20, "unpaid"),
            step("s5", "2025-03-05", 10, "status_from_the_future"),
        ];
        let report = aggregate_monthly(&steps, date("2025-03-01"), date("2025-03-31"));
        let bucket = &report.monthly_data["2025-03"];
        assert_eq!(
            bucket.total_paid + bucket.total_overdue + bucket.total_pending,
            bucket.total_amount
        );
        assert_eq!(bucket.total_amount, Decimal::from(200));
        assert_eq!(bucket.total_pending, Decimal::from(60));
    }

    #[test]
    fn within_month_order_follows_input_order() {
        let steps = vec![
            step("later", "2025-05-20", 10, "paid"),
            step("earlier", "2025-05-01", 10, "paid"),
        ];
        let report = aggregate_monthly(&steps, date("2025-05-01"), date("2025-05-31"));
        let ids: Vec<&str> = report.monthly_data["2025-05"]
            .steps
            .iter()
            .map(|projection| projection.id.as_str())
            .collect();
        assert_eq!(ids, ["later", "earlier"]);
    }
}
