use rust_decimal::Decimal;
use serde::Serialize;

use crate::services::payment_steps::StepRecord;

#[derive(Debug, Clone, Serialize)]
pub struct ContractTotals {
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub unpaid_amount: Decimal,
    pub steps_count: usize,
    pub paid_steps_count: usize,
    pub unpaid_steps_count: usize,
}

/// Fold a contract's steps into paid/unpaid totals. `unpaid_amount` is
/// derived as `total - paid` rather than summed from unpaid rows, so the
/// partition invariant survives any future status value. An empty schedule
/// yields zeros, not an error.
pub fn aggregate_contract(steps: &[StepRecord]) -> ContractTotals {
    let mut total_amount = Decimal::ZERO;
    let mut paid_amount = Decimal::ZERO;
    let mut paid_steps_count = 0usize;

    for step in steps {
        total_amount += step.amount;
        if step.is_paid() {
            paid_amount += step.amount;
            paid_steps_count += 1;
        }
    }

    ContractTotals {
        total_amount,
        paid_amount,
        unpaid_amount: total_amount - paid_amount,
        steps_count: steps.len(),
        paid_steps_count,
        unpaid_steps_count: steps.len() - paid_steps_count,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::aggregate_contract;
    use crate::services::payment_steps::StepRecord;

    fn step(amount: i64, status: &str) -> StepRecord {
        StepRecord {
            id: format!("s-{amount}-{status}"),
            contract_id: "c1".to_string(),
            contract_code: Some("LD-0001".to_string()),
            step_number: 1,
            description: String::new(),
            amount: Decimal::from(amount),
            due_date: NaiveDate::from_ymd_opt(2025, 6, 15).unwrap(),
            status: status.to_string(),
            contract_created: false,
        }
    }

    #[test]
    fn empty_schedule_yields_zeros() {
        let totals = aggregate_contract(&[]);
        assert_eq!(totals.total_amount, Decimal::ZERO);
        assert_eq!(totals.paid_amount, Decimal::ZERO);
        assert_eq!(totals.unpaid_amount, Decimal::ZERO);
        assert_eq!(totals.steps_count, 0);
    }

    #[test]
    fn partition_invariant_holds_with_unknown_statuses() {
        let steps = vec![
            step(100, "paid"),
            step(50, "unpaid"),
            step(25, "mystery_status"),
        ];
        let totals = aggregate_contract(&steps);
        assert_eq!(totals.total_amount, Decimal::from(175));
        assert_eq!(totals.paid_amount, Decimal::from(100));
        assert_eq!(totals.unpaid_amount, Decimal::from(75));
        assert_eq!(
            totals.paid_amount + totals.unpaid_amount,
            totals.total_amount
        );
        assert_eq!(totals.paid_steps_count, 1);
        assert_eq!(totals.unpaid_steps_count, 2);
    }
}
