//! Payroll engine library crate.
//!
//! This crate computes the monthly payroll (liquidación de
//! remuneraciones) of a company's workers under Chilean labour law.
//! Applications embed it by building a [`engine::PayrollRunner`] over a
//! [`directory::Directory`], a [`store::RecordStore`] and a
//! [`params::LegalParameterSource`], then calling
//! [`engine::PayrollRunner::run_period`]; single calculations are
//! available through [`calculator::PayrollCalculator`].  The HTTP
//! surface in [`api`] is a thin wrapper over the runner.

pub mod api;
pub mod calculator;
pub mod concepts;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod models;
pub mod params;
pub mod store;
pub mod summary;
pub mod tax;
pub mod telemetry;

pub use calculator::{calculate_with, PayrollCalculator};
pub use engine::{BatchResult, PayrollRunner, RunHandle, RunState};
pub use error::{ErrorCategory, PayrollError};
pub use models::{CalculatedPayroll, PayrollPeriod, Worker};
