//! Error taxonomy for the payroll engine.
//!
//! Every failure the engine can report for a worker is a
//! [`PayrollError`].  The batch runner records them per worker instead
//! of aborting the run; [`PayrollError::category`] tells the caller how
//! to react (fix data, register parameters, or retry persistence).

use crate::models::PayrollPeriod;
use crate::store::StoreError;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayrollError {
    #[error("negative input for {field}: {amount}")]
    NegativeInput { field: String, amount: f64 },

    #[error("{field} is out of range: {amount}")]
    AmountOutOfRange { field: String, amount: f64 },

    #[error("worker {worker_id} is malformed: {reason}")]
    InvalidWorker { worker_id: String, reason: String },

    #[error("invalid period {month}/{year}: month must be within 0..=11")]
    InvalidPeriod { month: i64, year: i32 },

    #[error("no legal parameters registered for period {0}")]
    UnknownPeriod(PayrollPeriod),

    #[error("unknown payroll concept: {0}")]
    UnknownConcept(String),

    #[error("payroll concept {0} is defined more than once")]
    DuplicateConcept(String),

    #[error("invalid legal parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse grouping used by callers to decide what to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Bad worker or movement data; fix the record and re-run.
    InputValidation,
    /// A period or concept is missing from the reference data.
    ReferenceDataMissing,
    /// The result could not be read or written.
    StorageFailure,
    /// Parameter tables or catalogs that fail validation.
    Configuration,
}

impl PayrollError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PayrollError::NegativeInput { .. }
            | PayrollError::AmountOutOfRange { .. }
            | PayrollError::InvalidWorker { .. }
            | PayrollError::InvalidPeriod { .. } => ErrorCategory::InputValidation,
            PayrollError::UnknownPeriod(_) | PayrollError::UnknownConcept(_) => {
                ErrorCategory::ReferenceDataMissing
            }
            PayrollError::Store(_) => ErrorCategory::StorageFailure,
            PayrollError::DuplicateConcept(_) | PayrollError::InvalidParameters(_) => {
                ErrorCategory::Configuration
            }
        }
    }

    pub(crate) fn negative(field: impl Into<String>, amount: f64) -> Self {
        PayrollError::NegativeInput {
            field: field.into(),
            amount,
        }
    }

    pub(crate) fn out_of_range(field: impl Into<String>, amount: f64) -> Self {
        PayrollError::AmountOutOfRange {
            field: field.into(),
            amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        let period = PayrollPeriod { month: 0, year: 1900 };
        assert_eq!(
            PayrollError::negative("baseSalary", -1.0).category(),
            ErrorCategory::InputValidation
        );
        assert_eq!(
            PayrollError::out_of_range("movement 010", f64::INFINITY).category(),
            ErrorCategory::InputValidation
        );
        assert_eq!(
            PayrollError::UnknownPeriod(period).category(),
            ErrorCategory::ReferenceDataMissing
        );
        assert_eq!(
            PayrollError::UnknownConcept("999".into()).category(),
            ErrorCategory::ReferenceDataMissing
        );
        assert_eq!(
            PayrollError::from(StoreError::Unavailable("down".into())).category(),
            ErrorCategory::StorageFailure
        );
    }

    #[test]
    fn unknown_period_message_names_the_period() {
        let err = PayrollError::UnknownPeriod(PayrollPeriod { month: 0, year: 1900 });
        assert_eq!(err.to_string(), "no legal parameters registered for period 01/1900");
    }
}
