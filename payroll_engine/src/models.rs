//! Data models for the payroll engine.
//!
//! The `models` module defines the serialisable master data the engine
//! reads (workers, concepts, cost centers, contract types), the monthly
//! movements captured per worker, and the [`CalculatedPayroll`] record
//! the engine produces.  Field names serialise in camelCase so records
//! stay compatible with the collections already written by the
//! administration screens.

use crate::error::PayrollError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Currency amount in whole pesos.  The domain has no sub-unit.
pub type Amount = i64;

/// A (month, year) processing cycle.  `month` is zero based (0 =
/// January) to match the persisted record keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayrollPeriod {
    pub month: u8,
    pub year: i32,
}

impl PayrollPeriod {
    /// Builds a period, rejecting months outside `0..=11`.
    pub fn new(month: u8, year: i32) -> Result<Self, PayrollError> {
        if month > 11 {
            return Err(PayrollError::InvalidPeriod {
                month: month as i64,
                year,
            });
        }
        Ok(Self { month, year })
    }

    /// Persistence key for a worker in this period:
    /// `"{workerId}_{month}_{year}"`, no padding.
    pub fn record_key(&self, worker_id: &str) -> String {
        format!("{}_{}_{}", worker_id, self.month, self.year)
    }

    /// The twelve periods of `year`, January first.
    pub fn months_of(year: i32) -> impl Iterator<Item = PayrollPeriod> {
        (0u8..12).map(move |month| PayrollPeriod { month, year })
    }
}

impl Ord for PayrollPeriod {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.month).cmp(&(other.year, other.month))
    }
}

impl PartialOrd for PayrollPeriod {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PayrollPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{}", self.month + 1, self.year)
    }
}

/// Health insurance system chosen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthSystem {
    /// Public system.
    Fonasa,
    /// Private provider.  Plan-based pricing is not modelled; the flat
    /// health rate applies.
    Isapre,
}

/// How a worker's legal gratification is obtained each month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GratificationMode {
    /// 25 % of the base salary, capped by the minimum-wage formula.
    #[default]
    Computed,
    /// Supplied by the employer as a monthly movement; the engine adds
    /// nothing on its own.
    Informed,
    /// Like `Computed`, but over the base salary plus the period's
    /// gratification-eligible variable earnings.
    Proportional,
}

/// Represents one employment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    /// Directory identifier, first component of every record key.
    pub id: String,
    /// National id (RUT) as entered; not validated here.
    pub rut: String,
    pub first_name: String,
    pub paternal_surname: String,
    #[serde(default)]
    pub maternal_surname: String,
    #[serde(default)]
    pub job_title: String,
    /// Must resolve to a [`CostCenter`] in the directory.
    pub cost_center_id: String,
    /// Monthly base salary.  Negative values are rejected at
    /// calculation time rather than at deserialisation so the batch can
    /// report them per worker.
    pub base_salary: Amount,
    pub health_system: HealthSystem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isapre_name: Option<String>,
    /// Pension fund administrator.  Must be non-empty.
    pub afp_name: String,
    pub has_unemployment_insurance: bool,
    /// Must resolve to a [`ContractType`] in the directory.
    pub contract_type_id: String,
    #[serde(default)]
    pub gratification_mode: GratificationMode,
}

impl Worker {
    pub fn full_name(&self) -> String {
        [
            self.first_name.as_str(),
            self.paternal_surname.as_str(),
            self.maternal_surname.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostCenter {
    pub id: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractType {
    pub id: String,
    pub name: String,
}

/// Whether a concept adds to or subtracts from pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptKind {
    Earning,
    Deduction,
}

/// Catalog entry for a named pay component.
///
/// The three flags only carry meaning for earnings; deductions are
/// always plain net subtractions whatever the flags say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollConcept {
    pub id: String,
    /// Lookup key used by monthly movements.
    pub code: String,
    pub name: String,
    pub kind: ConceptKind,
    /// Counts toward the contribution (imponible) base.
    pub contributable: bool,
    /// Counts toward the taxable (tributable) base.
    pub taxable: bool,
    /// Counts toward the gratification base.
    pub gratification_eligible: bool,
}

/// One variable amount for a concept in a worker's month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementItem {
    pub concept_code: String,
    /// May carry a fractional part (e.g. hour-based amounts); sums are
    /// rounded once per bucket.
    pub amount: f64,
}

/// Variable amounts entered for a worker in a period.  Stored under the
/// same `"{workerId}_{month}_{year}"` key as the calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyMovement {
    pub id: String,
    pub worker_id: String,
    pub period: PayrollPeriod,
    #[serde(default)]
    pub items: Vec<MovementItem>,
}

impl MonthlyMovement {
    pub fn new(worker_id: &str, period: PayrollPeriod, items: Vec<MovementItem>) -> Self {
        Self {
            id: period.record_key(worker_id),
            worker_id: worker_id.to_string(),
            period,
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Earnings {
    pub base_salary: Amount,
    pub gratification: Amount,
    pub transport_allowance: Amount,
    pub meal_allowance: Amount,
    /// Contributable variable earnings of the period.
    pub other_contributable: Amount,
    /// Variable earnings outside the contribution base.
    pub other_non_contributable: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deductions {
    pub pension_amount: Amount,
    pub health_amount: Amount,
    pub unemployment_insurance_amount: Amount,
    pub income_tax_amount: Amount,
    /// Advances, loans and any other catalog deduction.
    pub advances_amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_earnings: Amount,
    pub total_contributable_base: Amount,
    pub taxable_base: Amount,
    pub total_deductions: Amount,
    /// Not clamped: negative when deductions exceed earnings.
    pub net_pay: Amount,
}

/// The engine's output for one worker and period.
///
/// Identity is the composite `id` built by
/// [`PayrollPeriod::record_key`].  A record is always written whole and
/// replaced whole on recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedPayroll {
    pub id: String,
    pub worker_id: String,
    pub period: PayrollPeriod,
    pub earnings: Earnings,
    pub deductions: Deductions,
    pub totals: Totals,
}

impl CalculatedPayroll {
    /// Checks the arithmetic closure every produced record must satisfy.
    /// Returns the first violated relation, if any.
    pub fn check_invariants(&self) -> Result<(), String> {
        let e = &self.earnings;
        let d = &self.deductions;
        let t = &self.totals;

        if t.total_contributable_base != e.base_salary + e.gratification + e.other_contributable {
            return Err("contributable base does not match its components".into());
        }
        let earnings = t.total_contributable_base
            + e.transport_allowance
            + e.meal_allowance
            + e.other_non_contributable;
        if t.total_earnings != earnings {
            return Err("total earnings do not match their components".into());
        }
        let deductions = d.pension_amount
            + d.health_amount
            + d.unemployment_insurance_amount
            + d.income_tax_amount
            + d.advances_amount;
        if t.total_deductions != deductions {
            return Err("total deductions do not match their components".into());
        }
        if t.net_pay != t.total_earnings - t.total_deductions {
            return Err("net pay is not earnings minus deductions".into());
        }
        let non_negative = [
            e.base_salary,
            e.gratification,
            e.transport_allowance,
            e.meal_allowance,
            e.other_contributable,
            e.other_non_contributable,
            d.pension_amount,
            d.health_amount,
            d.unemployment_insurance_amount,
            d.income_tax_amount,
            d.advances_amount,
            t.total_earnings,
            t.total_contributable_base,
            t.taxable_base,
            t.total_deductions,
        ];
        if non_negative.iter().any(|amount| *amount < 0) {
            return Err("a monetary field other than net pay is negative".into());
        }
        Ok(())
    }
}
