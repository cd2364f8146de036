//! Period totals over stored calculations.

use crate::models::{Amount, CalculatedPayroll, PayrollPeriod};
use crate::store::{fetch_all, RecordStore, StoreError};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub workers: usize,
    pub total_earnings: Amount,
    pub total_contributable_base: Amount,
    pub total_deductions: Amount,
    pub pension: Amount,
    pub health: Amount,
    pub unemployment_insurance: Amount,
    pub income_tax: Amount,
    pub advances: Amount,
    pub net_pay: Amount,
}

/// Aggregates the records of `period`, ignoring any other period.
pub fn summarize<'a>(
    period: PayrollPeriod,
    records: impl IntoIterator<Item = &'a CalculatedPayroll>,
) -> PeriodSummary {
    records
        .into_iter()
        .filter(|record| record.period == period)
        .fold(PeriodSummary::default(), |mut acc, record| {
            acc.workers += 1;
            acc.total_earnings += record.totals.total_earnings;
            acc.total_contributable_base += record.totals.total_contributable_base;
            acc.total_deductions += record.totals.total_deductions;
            acc.pension += record.deductions.pension_amount;
            acc.health += record.deductions.health_amount;
            acc.unemployment_insurance += record.deductions.unemployment_insurance_amount;
            acc.income_tax += record.deductions.income_tax_amount;
            acc.advances += record.deductions.advances_amount;
            acc.net_pay += record.totals.net_pay;
            acc
        })
}

/// Stored calculations of one period, ordered by key.
pub fn period_records(
    store: &dyn RecordStore,
    period: PayrollPeriod,
) -> Result<Vec<CalculatedPayroll>, StoreError> {
    let mut records: Vec<CalculatedPayroll> = fetch_all(store)?;
    records.retain(|record| record.period == period);
    records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(records)
}
