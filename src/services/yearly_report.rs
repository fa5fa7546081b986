use std::collections::BTreeMap;

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::services::payment_steps::StepRecord;

/// Only the first two sellers are surfaced per contract in this report.
/// A contract can record more; consumers see `seller_count` and can tell
/// the list was truncated.
pub const MAX_DISPLAYED_SELLERS: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct PartyRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LandRef {
    pub id: String,
    pub plot_number: String,
}

/// Input shape: one contract with its joined display records and steps,
/// assembled by the route's queries.
#[derive(Debug, Clone)]
pub struct ContractWithSteps {
    pub contract_code: String,
    pub lands: Vec<LandRef>,
    pub buyers: Vec<PartyRef>,
    pub sellers: Vec<PartyRef>,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearSelection {
    /// Steps were pre-filtered to this year by the query; `time_data` is
    /// keyed by month 1..12.
    Single(i32),
    /// `time_data` is keyed by year within `[current - window, current +
    /// window]`. Out-of-window steps still count toward totals; the window
    /// is a display constraint, not a filter.
    AllYears { current_year: i32, window: i32 },
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TimeBucket {
    pub paid: Decimal,
    pub unpaid: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearlyContractProjection {
    pub contract_code: String,
    pub lands: Vec<LandRef>,
    pub buyers: Vec<PartyRef>,
    pub sellers: Vec<PartyRef>,
    pub seller_count: usize,
    pub time_data: BTreeMap<i32, TimeBucket>,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub unpaid_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct YearlySummary {
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub unpaid_amount: Decimal,
    pub contracts_count: usize,
    pub lands_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearlyReport {
    pub contracts: Vec<YearlyContractProjection>,
    pub summary: YearlySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build the yearly payment report. Contracts without any linked land are
/// incomplete setup data and are skipped, not errored.
pub fn aggregate_yearly(contracts: &[ContractWithSteps], selection: YearSelection) -> YearlyReport {
    let mut projections = Vec::new();
    let mut summary = YearlySummary::default();

    for contract in contracts {
        if contract.lands.is_empty() {
            continue;
        }

        let mut time_data: BTreeMap<i32, TimeBucket> = BTreeMap::new();
        let mut paid_amount = Decimal::ZERO;
        let mut unpaid_amount = Decimal::ZERO;

        for step in &contract.steps {
            let paid = step.is_paid();
            if paid {
                paid_amount += step.amount;
            } else {
                unpaid_amount += step.amount;
            }

            let time_key = match selection {
                YearSelection::Single(_) => Some(step.due_date.month() as i32),
                YearSelection::AllYears {
                    current_year,
                    window,
                } => {
                    let step_year = step.due_date.year();
                    if (step_year - current_year).abs() <= window {
                        Some(step_year)
                    } else {
                        None
                    }
                }
            };

            if let Some(key) = time_key {
                let bucket = time_data.entry(key).or_default();
                if paid {
                    bucket.paid += step.amount;
                } else {
                    bucket.unpaid += step.amount;
                }
            }
        }

        let total_amount = paid_amount + unpaid_amount;
        summary.total_amount += total_amount;
        summary.paid_amount += paid_amount;
        summary.unpaid_amount += unpaid_amount;
        summary.contracts_count += 1;
        summary.lands_count += contract.lands.len();

        projections.push(YearlyContractProjection {
            contract_code: contract.contract_code.clone(),
            lands: contract.lands.clone(),
            buyers: contract.buyers.clone(),
            sellers: contract
                .sellers
                .iter()
                .take(MAX_DISPLAYED_SELLERS)
                .cloned()
                .collect(),
            seller_count: contract.sellers.len(),
            time_data,
            total_amount,
            paid_amount,
            unpaid_amount,
        });
    }

    YearlyReport {
        contracts: projections,
        summary,
        error: None,
    }
}

pub fn degraded_yearly(marker: &str) -> YearlyReport {
    YearlyReport {
        contracts: Vec::new(),
        summary: YearlySummary::default(),
        error: Some(marker.to_string()),
    }
}
