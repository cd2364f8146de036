//! Monthly payroll calculation.
//!
//! [`calculate_with`] turns one worker, one period and that worker's
//! variable movements into a [`CalculatedPayroll`].  It is a pure
//! function: no storage, no clock, no shared state.  The order of the
//! rules below matters and is reproduced exactly:
//!
//! 1. variable earnings are summed per bucket and rounded once;
//! 2. gratification is `round(base × rate)` capped by
//!    `round(minimumWage × multiplier ÷ divisor)`;
//! 3. the contributable base adds base salary, gratification and the
//!    contributable variable earnings;
//! 4. transport and meal allowances come from the period parameters;
//! 5. pension, health and unemployment insurance are rates over the
//!    contributable base;
//! 6. the taxable base is the contributable base minus those three;
//! 7. income tax comes from the period's bracket table;
//! 8. catalog deductions are summed verbatim;
//! 9. totals are assembled.
//!
//! Amounts are rounded half-up (half away from zero, which is the same
//! thing for the non-negative amounts handled here).

use crate::concepts::ConceptClassifier;
use crate::error::PayrollError;
use crate::models::{
    Amount, CalculatedPayroll, Deductions, Earnings, GratificationMode, MovementItem,
    PayrollPeriod, Totals, Worker,
};
use crate::params::{LegalParameterSource, LegalParameters};

/// Largest amount accepted on any input or produced in any total.
pub const MAX_AMOUNT: Amount = 1_000_000_000_000_000;

/// Round to the nearest whole currency unit, halves going up.
pub fn round_amount(value: f64) -> Amount {
    value.round() as Amount
}

/// Rounds `value`, rejecting non-finite values and anything past
/// [`MAX_AMOUNT`].
fn bounded_amount(field: &str, value: f64) -> Result<Amount, PayrollError> {
    if !value.is_finite() || value.round() > MAX_AMOUNT as f64 {
        return Err(PayrollError::out_of_range(field, value));
    }
    Ok(round_amount(value))
}

/// Sum of `parts`, failing instead of overflowing.
fn checked_sum(field: &str, parts: &[Amount]) -> Result<Amount, PayrollError> {
    parts
        .iter()
        .try_fold(0, |acc: Amount, part| acc.checked_add(*part))
        .filter(|total| *total <= MAX_AMOUNT)
        .ok_or_else(|| {
            PayrollError::out_of_range(field, parts.iter().map(|p| *p as f64).sum())
        })
}

/// Calculator bound to a parameter source and a concept classifier.
///
/// [`PayrollCalculator::calculate`] resolves the period's parameters on
/// every call; the batch runner resolves them once per run and calls
/// [`calculate_with`] directly.
pub struct PayrollCalculator<'a> {
    parameters: &'a dyn LegalParameterSource,
    classifier: &'a dyn ConceptClassifier,
}

impl<'a> PayrollCalculator<'a> {
    pub fn new(
        parameters: &'a dyn LegalParameterSource,
        classifier: &'a dyn ConceptClassifier,
    ) -> Self {
        Self {
            parameters,
            classifier,
        }
    }

    pub fn calculate(
        &self,
        worker: &Worker,
        period: PayrollPeriod,
        movements: &[MovementItem],
    ) -> Result<CalculatedPayroll, PayrollError> {
        let params = self.parameters.parameters_for(period)?;
        calculate_with(worker, period, movements, self.classifier, &params)
    }
}

/// Variable amounts of a month, grouped by what they count toward.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct VariableAmounts {
    contributable: Amount,
    non_contributable: Amount,
    gratification_eligible: Amount,
    deductions: Amount,
}

fn sum_movements(
    movements: &[MovementItem],
    classifier: &dyn ConceptClassifier,
) -> Result<VariableAmounts, PayrollError> {
    let mut contributable = 0.0;
    let mut non_contributable = 0.0;
    let mut gratification_eligible = 0.0;
    let mut deductions = 0.0;

    for item in movements {
        let field = format!("movement {}", item.concept_code);
        if item.amount < 0.0 || item.amount.is_nan() {
            return Err(PayrollError::negative(field, item.amount));
        }
        bounded_amount(&field, item.amount)?;
        let class = classifier.classify(&item.concept_code)?;
        if !class.is_earning() {
            deductions += item.amount;
            continue;
        }
        if class.contributable {
            contributable += item.amount;
        } else {
            non_contributable += item.amount;
        }
        if class.gratification_eligible {
            gratification_eligible += item.amount;
        }
    }

    Ok(VariableAmounts {
        contributable: bounded_amount("contributable movements", contributable)?,
        non_contributable: bounded_amount("non-contributable movements", non_contributable)?,
        gratification_eligible: bounded_amount(
            "gratification-eligible movements",
            gratification_eligible,
        )?,
        deductions: bounded_amount("deduction movements", deductions)?,
    })
}

fn validate_worker(worker: &Worker) -> Result<(), PayrollError> {
    if worker.base_salary < 0 {
        return Err(PayrollError::negative("baseSalary", worker.base_salary as f64));
    }
    if worker.base_salary > MAX_AMOUNT {
        return Err(PayrollError::out_of_range("baseSalary", worker.base_salary as f64));
    }
    if worker.afp_name.trim().is_empty() {
        return Err(PayrollError::InvalidWorker {
            worker_id: worker.id.clone(),
            reason: "AFP name is empty".into(),
        });
    }
    Ok(())
}

/// Legal gratification for the month.
///
/// The raw amount is rounded before it is compared with the (already
/// rounded) cap; comparing unrounded values changes the result for
/// salaries right at the cap.
pub fn gratification(base: Amount, params: &LegalParameters) -> Amount {
    let raw = round_amount(base as f64 * params.gratification_rate);
    raw.min(params.gratification_cap())
}

fn contribution(base: Amount, cap: Option<Amount>, rate: f64) -> Amount {
    let capped = cap.map_or(base, |cap| base.min(cap));
    round_amount(capped as f64 * rate)
}

/// Calculates one worker's payroll for `period` with the given
/// parameter snapshot.
pub fn calculate_with(
    worker: &Worker,
    period: PayrollPeriod,
    movements: &[MovementItem],
    classifier: &dyn ConceptClassifier,
    params: &LegalParameters,
) -> Result<CalculatedPayroll, PayrollError> {
    validate_worker(worker)?;
    let variable = sum_movements(movements, classifier)?;

    let base_salary = worker.base_salary;
    let gratification = match worker.gratification_mode {
        GratificationMode::Computed => gratification(base_salary, params),
        GratificationMode::Proportional => gratification(
            checked_sum(
                "gratification base",
                &[base_salary, variable.gratification_eligible],
            )?,
            params,
        ),
        GratificationMode::Informed => 0,
    };

    let contributable_base = checked_sum(
        "totalContributableBase",
        &[base_salary, gratification, variable.contributable],
    )?;
    let transport_allowance = params.transport_allowance;
    let meal_allowance = params.meal_allowance;

    let pension = contribution(
        contributable_base,
        params.contribution_cap,
        params.afp_rate_for(&worker.afp_name),
    );
    let health = contribution(contributable_base, params.contribution_cap, params.health_rate);
    let unemployment_insurance = if worker.has_unemployment_insurance {
        contribution(
            contributable_base,
            params.unemployment_cap,
            params.unemployment_rate,
        )
    } else {
        0
    };

    let taxable_base = (contributable_base - pension - health - unemployment_insurance).max(0);
    let income_tax = params.tax_brackets.tax_for(taxable_base);

    let earnings = Earnings {
        base_salary,
        gratification,
        transport_allowance,
        meal_allowance,
        other_contributable: variable.contributable,
        other_non_contributable: variable.non_contributable,
    };
    let deductions = Deductions {
        pension_amount: pension,
        health_amount: health,
        unemployment_insurance_amount: unemployment_insurance,
        income_tax_amount: income_tax,
        advances_amount: variable.deductions,
    };

    let total_earnings = checked_sum(
        "totalEarnings",
        &[
            contributable_base,
            transport_allowance,
            meal_allowance,
            variable.non_contributable,
        ],
    )?;
    let total_deductions = checked_sum(
        "totalDeductions",
        &[
            pension,
            health,
            unemployment_insurance,
            income_tax,
            variable.deductions,
        ],
    )?;

    Ok(CalculatedPayroll {
        id: period.record_key(&worker.id),
        worker_id: worker.id.clone(),
        period,
        earnings,
        deductions,
        totals: Totals {
            total_earnings,
            total_contributable_base: contributable_base,
            taxable_base,
            total_deductions,
            net_pay: total_earnings - total_deductions,
        },
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::concepts::{reference_concepts, ConceptCatalog};
    use crate::error::ErrorCategory;
    use crate::models::HealthSystem;
    use crate::params::{reference_parameters, ParameterTable};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    pub(crate) fn worker(id: &str, base_salary: Amount) -> Worker {
        Worker {
            id: id.to_string(),
            rut: "18.999.888-7".into(),
            first_name: "Sebastián".into(),
            paternal_surname: "Opazo".into(),
            maternal_surname: "Candia".into(),
            job_title: "Contador".into(),
            cost_center_id: "cc1".into(),
            base_salary,
            health_system: HealthSystem::Fonasa,
            isapre_name: None,
            afp_name: "Provida".into(),
            has_unemployment_insurance: true,
            contract_type_id: "ct1".into(),
            gratification_mode: GratificationMode::Computed,
        }
    }

    fn item(code: &str, amount: f64) -> MovementItem {
        MovementItem {
            concept_code: code.into(),
            amount,
        }
    }

    fn period() -> PayrollPeriod {
        PayrollPeriod { month: 2, year: 2025 }
    }

    fn run(worker: &Worker, movements: &[MovementItem]) -> CalculatedPayroll {
        let catalog = ConceptCatalog::new(reference_concepts()).unwrap();
        let params = reference_parameters().unwrap();
        calculate_with(worker, period(), movements, &catalog, &params).unwrap()
    }

    #[test]
    fn scenario_capped_gratification() {
        let payroll = run(&worker("1", 850_000), &[]);

        assert_eq!(payroll.id, "1_2_2025");
        assert_eq!(payroll.earnings.gratification, 174_167);
        assert_eq!(payroll.totals.total_contributable_base, 1_024_167);
        assert_eq!(payroll.deductions.pension_amount, 117_267);
        assert_eq!(payroll.deductions.health_amount, 71_692);
        assert_eq!(payroll.deductions.unemployment_insurance_amount, 6_145);
        assert_eq!(payroll.totals.taxable_base, 829_063);
        assert_eq!(payroll.deductions.income_tax_amount, 0);
        assert_eq!(payroll.totals.total_earnings, 1_114_167);
        assert_eq!(payroll.totals.total_deductions, 195_104);
        assert_eq!(payroll.totals.net_pay, 919_063);
    }

    #[test]
    fn scenario_gratification_below_cap() {
        let payroll = run(&worker("2", 400_000), &[]);
        assert_eq!(payroll.earnings.gratification, 100_000);
        assert_eq!(payroll.totals.total_contributable_base, 500_000);
    }

    #[test]
    fn gratification_rounds_before_comparing_with_cap() {
        let params = reference_parameters().unwrap();
        assert_eq!(params.gratification_cap(), 174_167);
        // 696,665 × 0.25 = 174,166.25
        assert_eq!(gratification(696_665, &params), 174_166);
        // 696,666 × 0.25 = 174,166.5, rounds up onto the cap.
        assert_eq!(gratification(696_666, &params), 174_167);
        // 696,667 × 0.25 = 174,166.75
        assert_eq!(gratification(696_667, &params), 174_167);
    }

    #[test]
    fn gratification_is_flat_once_cap_is_reached() {
        let params = reference_parameters().unwrap();
        let cap = params.gratification_cap();
        let mut salary = 0;
        while salary <= 3_000_000 {
            let raw = round_amount(salary as f64 * 0.25);
            let expected = if raw < cap { raw } else { cap };
            assert_eq!(gratification(salary, &params), expected, "salary {salary}");
            salary += 1_111;
        }
        assert_eq!(gratification(5_000_000, &params), cap);
        assert_eq!(gratification(50_000_000, &params), cap);
    }

    #[test]
    fn no_unemployment_insurance_when_worker_is_not_covered() {
        let mut w = worker("3", 850_000);
        w.has_unemployment_insurance = false;
        let payroll = run(&w, &[]);
        assert_eq!(payroll.deductions.unemployment_insurance_amount, 0);
        assert_eq!(payroll.totals.taxable_base, 1_024_167 - 117_267 - 71_692);
    }

    #[test]
    fn income_tax_uses_matching_bracket() {
        let payroll = run(&worker("4", 1_500_000), &[]);
        assert_eq!(payroll.totals.total_contributable_base, 1_674_167);
        assert_eq!(payroll.deductions.pension_amount, 191_692);
        assert_eq!(payroll.deductions.health_amount, 117_192);
        assert_eq!(payroll.deductions.unemployment_insurance_amount, 10_045);
        assert_eq!(payroll.totals.taxable_base, 1_355_238);
        // 4 % over the 13.5 UTM exemption (854,901).
        assert_eq!(payroll.deductions.income_tax_amount, 20_013);
    }

    #[test]
    fn contributions_stop_at_the_caps() {
        let payroll = run(&worker("5", 5_000_000), &[]);
        assert_eq!(payroll.totals.total_contributable_base, 5_174_167);
        assert_eq!(payroll.deductions.pension_amount, 338_201);
        assert_eq!(payroll.deductions.health_amount, 206_760);
        assert_eq!(payroll.deductions.unemployment_insurance_amount, 26_627);
    }

    #[test]
    fn movements_are_split_by_classification() {
        let movements = [
            item("010", 100_000.4),
            item("010", 50_000.2),
            item("005", 10_000.0),
            item("501", 200_000.0),
            item("505", 25_000.5),
        ];
        let payroll = run(&worker("6", 400_000), &movements);

        assert_eq!(payroll.earnings.other_contributable, 150_001);
        assert_eq!(payroll.earnings.other_non_contributable, 10_000);
        assert_eq!(payroll.deductions.advances_amount, 225_001);
        // Computed mode ignores variable earnings for gratification.
        assert_eq!(payroll.earnings.gratification, 100_000);
        assert_eq!(payroll.totals.total_contributable_base, 400_000 + 100_000 + 150_001);
        assert_eq!(
            payroll.totals.total_earnings,
            650_001 + 45_000 + 45_000 + 10_000
        );
        payroll.check_invariants().unwrap();
    }

    #[test]
    fn proportional_mode_includes_eligible_earnings() {
        let mut w = worker("7", 400_000);
        w.gratification_mode = GratificationMode::Proportional;
        let payroll = run(&w, &[item("010", 100_000.0), item("005", 50_000.0)]);
        assert_eq!(payroll.earnings.gratification, 125_000);
    }

    #[test]
    fn informed_mode_takes_gratification_from_movements_only() {
        let mut w = worker("8", 400_000);
        w.gratification_mode = GratificationMode::Informed;
        let payroll = run(&w, &[]);
        assert_eq!(payroll.earnings.gratification, 0);
        assert_eq!(payroll.totals.total_contributable_base, 400_000);
    }

    #[test]
    fn advances_beyond_pay_yield_negative_net() {
        let payroll = run(&worker("9", 400_000), &[item("501", 2_000_000.0)]);
        assert!(payroll.totals.net_pay < 0);
        payroll.check_invariants().unwrap();
    }

    #[test]
    fn negative_inputs_are_rejected() {
        let catalog = ConceptCatalog::new(reference_concepts()).unwrap();
        let params = reference_parameters().unwrap();

        let err = calculate_with(&worker("10", -1), period(), &[], &catalog, &params).unwrap_err();
        assert!(matches!(err, PayrollError::NegativeInput { ref field, .. } if field == "baseSalary"));

        let err = calculate_with(
            &worker("10", 500_000),
            period(),
            &[item("010", -5.0)],
            &catalog,
            &params,
        )
        .unwrap_err();
        assert!(matches!(err, PayrollError::NegativeInput { .. }));
    }

    #[test]
    fn unbounded_movements_are_rejected() {
        let catalog = ConceptCatalog::new(reference_concepts()).unwrap();
        let params = reference_parameters().unwrap();
        for amount in [f64::INFINITY, 1e19, (MAX_AMOUNT as f64) * 2.0] {
            let err = calculate_with(
                &worker("15", 500_000),
                period(),
                &[item("010", amount)],
                &catalog,
                &params,
            )
            .unwrap_err();
            assert!(
                matches!(err, PayrollError::AmountOutOfRange { ref field, .. } if field == "movement 010"),
                "amount {amount}: {err:?}"
            );
            assert_eq!(err.category(), ErrorCategory::InputValidation);
        }
    }

    #[test]
    fn movements_that_only_overflow_together_are_rejected() {
        let half = (MAX_AMOUNT / 2 + 1) as f64;
        let err = calculate_with(
            &worker("16", 0),
            period(),
            &[item("010", half), item("010", half)],
            &ConceptCatalog::new(reference_concepts()).unwrap(),
            &reference_parameters().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, PayrollError::AmountOutOfRange { .. }));
    }

    #[test]
    fn totals_past_the_limit_fail_instead_of_wrapping() {
        let catalog = ConceptCatalog::new(reference_concepts()).unwrap();
        let params = reference_parameters().unwrap();

        let err = calculate_with(&worker("17", i64::MAX), period(), &[], &catalog, &params)
            .unwrap_err();
        assert!(matches!(err, PayrollError::AmountOutOfRange { ref field, .. } if field == "baseSalary"));

        // Each input is in range but base plus gratification is not.
        let err = calculate_with(&worker("18", MAX_AMOUNT), period(), &[], &catalog, &params)
            .unwrap_err();
        assert!(matches!(
            err,
            PayrollError::AmountOutOfRange { ref field, .. } if field == "totalContributableBase"
        ));

        let mut lavish = params.clone();
        lavish.meal_allowance = MAX_AMOUNT;
        let err = calculate_with(&worker("19", 850_000), period(), &[], &catalog, &lavish)
            .unwrap_err();
        assert!(matches!(
            err,
            PayrollError::AmountOutOfRange { ref field, .. } if field == "totalEarnings"
        ));
    }

    #[test]
    fn empty_afp_is_a_malformed_worker() {
        let mut w = worker("11", 500_000);
        w.afp_name = "  ".into();
        let catalog = ConceptCatalog::new(reference_concepts()).unwrap();
        let params = reference_parameters().unwrap();
        assert!(matches!(
            calculate_with(&w, period(), &[], &catalog, &params),
            Err(PayrollError::InvalidWorker { .. })
        ));
    }

    #[test]
    fn unknown_concept_aborts_the_calculation() {
        let catalog = ConceptCatalog::new(reference_concepts()).unwrap();
        let params = reference_parameters().unwrap();
        assert_eq!(
            calculate_with(&worker("12", 500_000), period(), &[item("777", 1.0)], &catalog, &params),
            Err(PayrollError::UnknownConcept("777".into()))
        );
    }

    #[test]
    fn unknown_period_fails_through_the_calculator() {
        let mut table = ParameterTable::new();
        table.register_year(2025, reference_parameters().unwrap()).unwrap();
        let catalog = ConceptCatalog::new(reference_concepts()).unwrap();
        let calculator = PayrollCalculator::new(&table, &catalog);

        let ancient = PayrollPeriod { month: 0, year: 1900 };
        assert_eq!(
            calculator.calculate(&worker("13", 850_000), ancient, &[]),
            Err(PayrollError::UnknownPeriod(ancient))
        );
        assert!(calculator.calculate(&worker("13", 850_000), period(), &[]).is_ok());
    }

    #[test]
    fn identical_inputs_give_identical_records() {
        let movements = [item("010", 33_333.3), item("501", 10_000.0)];
        let first = run(&worker("14", 777_777), &movements);
        let second = run(&worker("14", 777_777), &movements);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn invariants_hold_for_generated_inputs() {
        let catalog = ConceptCatalog::new(reference_concepts()).unwrap();
        let codes = ["001", "005", "006", "010", "501", "505"];
        let modes = [
            GratificationMode::Computed,
            GratificationMode::Informed,
            GratificationMode::Proportional,
        ];
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for case in 0..2_000 {
            let mut params = reference_parameters().unwrap();
            if rng.gen_range(0..4) == 0 {
                params.contribution_cap = None;
                params.unemployment_cap = None;
            }
            let mut w = worker(&case.to_string(), rng.gen_range(0..8_000_000));
            w.has_unemployment_insurance = rng.gen_bool(0.5);
            w.gratification_mode = modes[rng.gen_range(0..modes.len())];

            let movements: Vec<MovementItem> = (0..rng.gen_range(0..6))
                .map(|_| {
                    let code = codes[rng.gen_range(0..codes.len())];
                    let amount = rng.gen_range(0..50_000_000) as f64 / 100.0;
                    item(code, amount)
                })
                .collect();

            let payroll = calculate_with(&w, period(), &movements, &catalog, &params).unwrap();
            if let Err(reason) = payroll.check_invariants() {
                panic!("case {case}: {reason}: {payroll:?}");
            }
            assert_eq!(payroll.earnings.base_salary, w.base_salary);
        }
    }
}
