//! Income tax (impuesto único de segunda categoría) brackets.
//!
//! A [`TaxBracketTable`] is an ordered list of [`TaxBracket`]s expressed
//! in currency units of the taxable base.  The tax for a base is found
//! by locating the bracket with the greatest lower bound not above the
//! base and applying that bracket's marginal rate to the excess over
//! the bound.  `base_tax` lets a table carry the tax already accrued by
//! lower brackets, which turns the lookup into a full progressive
//! schedule; a table whose brackets all have `base_tax == 0` behaves as
//! a plain single-threshold rule.

use crate::calculator::round_amount;
use crate::error::PayrollError;
use crate::models::Amount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    /// Inclusive lower bound of the bracket in currency units.
    pub lower_bound: Amount,
    /// Marginal rate applied to the excess over `lower_bound`.
    pub rate: f64,
    /// Tax accrued below `lower_bound`.
    #[serde(default)]
    pub base_tax: f64,
}

impl TaxBracket {
    pub fn new(lower_bound: Amount, rate: f64) -> Self {
        Self {
            lower_bound,
            rate,
            base_tax: 0.0,
        }
    }
}

/// Strictly ascending bracket table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxBracketTable(Vec<TaxBracket>);

impl TaxBracketTable {
    pub fn new(brackets: Vec<TaxBracket>) -> Result<Self, PayrollError> {
        let table = Self(brackets);
        table.validate()?;
        Ok(table)
    }

    /// Builds a progressive table from bounds given in UTM units.
    ///
    /// `steps` lists `(lower_bound_in_utm, rate)` pairs in ascending
    /// order.  Each bound is converted with `utm_value` and rounded;
    /// `base_tax` accumulates the full tax of every lower bracket.
    pub fn progressive_from_utm(utm_value: f64, steps: &[(f64, f64)]) -> Result<Self, PayrollError> {
        let mut brackets: Vec<TaxBracket> = Vec::with_capacity(steps.len());
        for (factor, rate) in steps {
            let lower_bound = round_amount(factor * utm_value);
            let base_tax = match brackets.last() {
                Some(prev) => prev.base_tax + prev.rate * (lower_bound - prev.lower_bound) as f64,
                None => 0.0,
            };
            brackets.push(TaxBracket {
                lower_bound,
                rate: *rate,
                base_tax,
            });
        }
        Self::new(brackets)
    }

    pub fn brackets(&self) -> &[TaxBracket] {
        &self.0
    }

    pub fn validate(&self) -> Result<(), PayrollError> {
        if self.0.is_empty() {
            return Err(PayrollError::InvalidParameters(
                "tax bracket table is empty".into(),
            ));
        }
        for bracket in &self.0 {
            if !(0.0..=1.0).contains(&bracket.rate) {
                return Err(PayrollError::InvalidParameters(format!(
                    "tax rate {} at bound {} is outside [0, 1]",
                    bracket.rate, bracket.lower_bound
                )));
            }
            let base_tax_ok = bracket.base_tax.is_finite() && bracket.base_tax >= 0.0;
            if bracket.lower_bound < 0 || !base_tax_ok {
                return Err(PayrollError::InvalidParameters(format!(
                    "tax bracket at bound {} has a negative amount",
                    bracket.lower_bound
                )));
            }
        }
        if self
            .0
            .windows(2)
            .any(|pair| pair[0].lower_bound >= pair[1].lower_bound)
        {
            return Err(PayrollError::InvalidParameters(
                "tax brackets must be strictly ascending by lower bound".into(),
            ));
        }
        Ok(())
    }

    /// The bracket that applies to `taxable_base`, if any.
    pub fn bracket_for(&self, taxable_base: Amount) -> Option<&TaxBracket> {
        // Brackets are ascending, so the applicable one is the last
        // bound not above the base.
        let idx = self.0.partition_point(|b| b.lower_bound <= taxable_base);
        idx.checked_sub(1).map(|i| &self.0[i])
    }

    /// Income tax owed on `taxable_base`.  Zero below the first bound.
    pub fn tax_for(&self, taxable_base: Amount) -> Amount {
        match self.bracket_for(taxable_base) {
            Some(bracket) => round_amount(
                bracket.base_tax + bracket.rate * (taxable_base - bracket.lower_bound) as f64,
            ),
            None => 0,
        }
    }
}
