//! Period-scoped legal parameters.
//!
//! Statutory figures (minimum wage, contribution rates, allowance
//! amounts, tax brackets) change over time, so the engine never reads
//! them from literals.  A [`LegalParameterSource`] resolves the
//! [`LegalParameters`] for a [`PayrollPeriod`] and fails with
//! [`PayrollError::UnknownPeriod`] when nothing is registered; there is
//! no fallback to another period.
//!
//! Parameter sets are stored externally as JSON files, one file per
//! year (optionally restricted to some months), and loaded with
//! [`load_parameters_from_dir`].

use crate::calculator::round_amount;
use crate::error::PayrollError;
use crate::models::{Amount, PayrollPeriod};
use crate::tax::TaxBracketTable;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalParameters {
    /// Minimum monthly wage (ingreso mínimo mensual).
    pub minimum_wage: Amount,
    /// Share of the base salary paid as gratification.
    #[serde(default = "default_gratification_rate")]
    pub gratification_rate: f64,
    /// Annual gratification cap, in minimum wages.
    pub gratification_cap_multiplier: f64,
    /// Months the annual cap is spread over.
    #[serde(default = "default_gratification_cap_divisor")]
    pub gratification_cap_divisor: f64,
    pub transport_allowance: Amount,
    pub meal_allowance: Amount,
    /// Default pension contribution rate.
    pub afp_rate: f64,
    /// Per-fund rates keyed by AFP name; funds missing here use
    /// `afp_rate`.
    #[serde(default)]
    pub afp_rates: HashMap<String, f64>,
    pub health_rate: f64,
    /// Employee share of the unemployment insurance.
    pub unemployment_rate: f64,
    /// Cap on the base used for pension and health contributions.
    #[serde(default)]
    pub contribution_cap: Option<Amount>,
    /// Cap on the base used for unemployment insurance.
    #[serde(default)]
    pub unemployment_cap: Option<Amount>,
    pub tax_brackets: TaxBracketTable,
}

fn default_gratification_rate() -> f64 {
    0.25
}

fn default_gratification_cap_divisor() -> f64 {
    12.0
}

impl LegalParameters {
    /// Pension rate for a fund, falling back to the default rate.
    pub fn afp_rate_for(&self, afp_name: &str) -> f64 {
        self.afp_rates.get(afp_name).copied().unwrap_or(self.afp_rate)
    }

    /// Monthly gratification cap: `round(minimumWage × multiplier ÷ divisor)`.
    pub fn gratification_cap(&self) -> Amount {
        round_amount(
            self.minimum_wage as f64 * self.gratification_cap_multiplier
                / self.gratification_cap_divisor,
        )
    }

    pub fn validate(&self) -> Result<(), PayrollError> {
        let rates = [
            ("gratificationRate", self.gratification_rate),
            ("afpRate", self.afp_rate),
            ("healthRate", self.health_rate),
            ("unemploymentRate", self.unemployment_rate),
        ];
        for (name, rate) in rates
            .iter()
            .copied()
            .chain(self.afp_rates.iter().map(|(name, rate)| (name.as_str(), *rate)))
        {
            if !(0.0..=1.0).contains(&rate) {
                return Err(PayrollError::InvalidParameters(format!(
                    "{name} rate {rate} is outside [0, 1]"
                )));
            }
        }
        let amounts = [
            ("minimumWage", self.minimum_wage),
            ("transportAllowance", self.transport_allowance),
            ("mealAllowance", self.meal_allowance),
            ("contributionCap", self.contribution_cap.unwrap_or(0)),
            ("unemploymentCap", self.unemployment_cap.unwrap_or(0)),
        ];
        if let Some((name, amount)) = amounts.iter().find(|(_, amount)| *amount < 0) {
            return Err(PayrollError::InvalidParameters(format!(
                "{name} must not be negative (got {amount})"
            )));
        }
        let multiplier = self.gratification_cap_multiplier;
        if !(multiplier.is_finite() && multiplier >= 0.0) {
            return Err(PayrollError::InvalidParameters(
                "gratificationCapMultiplier must be a finite, non-negative number".into(),
            ));
        }
        let divisor = self.gratification_cap_divisor;
        if !(divisor.is_finite() && divisor > 0.0) {
            return Err(PayrollError::InvalidParameters(
                "gratificationCapDivisor must be positive".into(),
            ));
        }
        self.tax_brackets.validate()
    }
}

/// Supplies legal parameters per period.
///
/// Implementations must be thread-safe because the batch runner
/// resolves parameters from whichever thread starts a run.
pub trait LegalParameterSource: Send + Sync {
    fn parameters_for(&self, period: PayrollPeriod) -> Result<Arc<LegalParameters>, PayrollError>;
}

/// In-memory period-indexed table.
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    entries: BTreeMap<PayrollPeriod, Arc<LegalParameters>>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the parameters of one period.
    pub fn register(
        &mut self,
        period: PayrollPeriod,
        params: LegalParameters,
    ) -> Result<(), PayrollError> {
        params.validate()?;
        self.entries.insert(period, Arc::new(params));
        Ok(())
    }

    /// Registers the same parameters for all twelve months of `year`.
    pub fn register_year(&mut self, year: i32, params: LegalParameters) -> Result<(), PayrollError> {
        params.validate()?;
        let shared = Arc::new(params);
        for period in PayrollPeriod::months_of(year) {
            self.entries.insert(period, shared.clone());
        }
        Ok(())
    }

    pub fn periods(&self) -> impl Iterator<Item = &PayrollPeriod> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LegalParameterSource for ParameterTable {
    fn parameters_for(&self, period: PayrollPeriod) -> Result<Arc<LegalParameters>, PayrollError> {
        self.entries
            .get(&period)
            .cloned()
            .ok_or(PayrollError::UnknownPeriod(period))
    }
}

/// On-disk layout of a parameter file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterFile {
    pub year: i32,
    /// Zero-based months covered; all twelve when omitted.
    #[serde(default)]
    pub months: Option<Vec<u8>>,
    pub parameters: LegalParameters,
}

/// Load every `*.json` parameter file found in `path`.
///
/// Files are applied in file-name order, so a later file may override
/// some months of an earlier one.  A file that fails to parse or
/// validate is an error: skipping it would leave the affected periods
/// on stale figures.  A missing directory yields an empty table.
pub fn load_parameters_from_dir(path: &Path) -> Result<ParameterTable> {
    let mut table = ParameterTable::new();
    if !path.is_dir() {
        debug!(dir = %path.display(), "legal parameter directory not found");
        return Ok(table);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("reading parameter directory {}", path.display()))?
    {
        let entry = entry?;
        let file_path = entry.path();
        if entry.file_type()?.is_file()
            && file_path.extension().map_or(false, |ext| ext == "json")
        {
            files.push(file_path);
        }
    }
    files.sort();

    for file_path in files {
        let data = std::fs::read_to_string(&file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        let file: ParameterFile = serde_json::from_str(&data)
            .with_context(|| format!("parsing legal parameters {}", file_path.display()))?;
        match &file.months {
            Some(months) => {
                for month in months {
                    let period = PayrollPeriod::new(*month, file.year)
                        .with_context(|| format!("in {}", file_path.display()))?;
                    table
                        .register(period, file.parameters.clone())
                        .with_context(|| format!("in {}", file_path.display()))?;
                }
            }
            None => table
                .register_year(file.year, file.parameters.clone())
                .with_context(|| format!("in {}", file_path.display()))?,
        }
        info!(file = %file_path.display(), year = file.year, "loaded legal parameters");
    }
    Ok(table)
}

/// Reference statutory figures used by the product before parameters
/// were made configurable.
pub fn reference_parameters() -> Result<LegalParameters, PayrollError> {
    const UF: f64 = 36_197.53;
    const UTM: f64 = 63_326.0;

    let tax_brackets = TaxBracketTable::progressive_from_utm(
        UTM,
        &[
            (0.0, 0.0),
            (13.5, 0.04),
            (30.0, 0.08),
            (50.0, 0.135),
            (70.0, 0.23),
            (90.0, 0.304),
            (120.0, 0.35),
            (310.0, 0.40),
        ],
    )?;

    Ok(LegalParameters {
        minimum_wage: 440_000,
        gratification_rate: default_gratification_rate(),
        gratification_cap_multiplier: 4.75,
        gratification_cap_divisor: default_gratification_cap_divisor(),
        transport_allowance: 45_000,
        meal_allowance: 45_000,
        afp_rate: 0.1145,
        afp_rates: HashMap::new(),
        health_rate: 0.07,
        unemployment_rate: 0.006,
        contribution_cap: Some(round_amount(81.6 * UF)),
        unemployment_cap: Some(round_amount(122.6 * UF)),
        tax_brackets,
    })
}
