pub mod audit;
pub mod contract_totals;
pub mod monthly_report;
pub mod payment_steps;
pub mod permissions;
pub mod yearly_report;
