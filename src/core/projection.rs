use std::collections::BTreeSet;

use chrono::{Datelike, Local};

use super::engine::{ReinvestParams, run_coupon_reinvestment};
use super::fx::{FxMultiplierProvider, FxTable};
use super::injection::build_injection_schedule;
use super::replacement::{ReplacementParams, replacement_end_year, run_maturity_replacement};
use super::slots::{SlotBuilder, model_basis, parse_maturity_year, portfolio_yield};
use super::types::{
    Holding, InjectionConfig, Projection, ReinvestMode, ScenarioConfig, ScenarioResult,
    SimulationRequest,
};
use crate::error::RequestError;

pub const BASELINE_ID: &str = "baseline";
pub const MAX_SIMULATION_YEARS: u32 = 100;
pub const MIN_START_YEAR: i32 = 1900;
pub const MAX_START_YEAR: i32 = 2200;

/// Calendar year used when a request does not pin its start year.
pub fn current_year() -> i32 {
    Local::now().year()
}

impl SimulationRequest {
    pub fn resolved_start_year(&self) -> i32 {
        self.start_year.unwrap_or_else(current_year)
    }

    pub fn validate(&self, start_year: i32) -> Result<(), RequestError> {
        if !(MIN_START_YEAR..=MAX_START_YEAR).contains(&start_year) {
            return Err(RequestError::InvalidStartYear {
                got: start_year,
                min: MIN_START_YEAR,
                max: MAX_START_YEAR,
            });
        }
        if !(1..=MAX_SIMULATION_YEARS).contains(&self.simulation_years) {
            return Err(RequestError::InvalidHorizon {
                got: self.simulation_years,
                max: MAX_SIMULATION_YEARS,
            });
        }
        if self.holdings.is_empty() {
            return Err(RequestError::NoHoldings);
        }
        for holding in &self.holdings {
            validate_holding(holding)?;
        }
        if let Some(capital) = self.start_capital {
            if !capital.is_finite() || capital <= 0.0 {
                return Err(RequestError::InvalidStartCapital);
            }
        }
        if let Some(pct) = self.default_reinvest_yield_pct {
            if !pct.is_finite() {
                return Err(RequestError::InvalidScenario {
                    id: BASELINE_ID.to_string(),
                    reason: "defaultReinvestYieldPct must be finite".to_string(),
                });
            }
        }
        validate_injection(&self.injection)?;

        let mut ids = BTreeSet::new();
        for scenario in &self.scenarios {
            if !ids.insert(scenario.id()) {
                return Err(RequestError::DuplicateScenario {
                    id: scenario.id().to_string(),
                });
            }
            validate_scenario(scenario, start_year)?;
        }
        Ok(())
    }
}

fn validate_holding(holding: &Holding) -> Result<(), RequestError> {
    let invalid = |reason: &str| RequestError::InvalidHolding {
        isin: holding.isin.clone(),
        reason: reason.to_string(),
    };
    if holding.isin.trim().is_empty() {
        return Err(invalid("isin must not be empty"));
    }
    let fields = [
        ("quantity", holding.quantity),
        ("price", holding.price),
        ("priceEur", holding.price_eur),
        ("couponPct", holding.coupon_pct),
        ("taxRatePct", holding.tax_rate_pct),
        ("nominal", holding.nominal),
    ];
    for (name, value) in fields {
        if !value.is_finite() {
            return Err(invalid(&format!("{name} must be finite")));
        }
    }
    Ok(())
}

fn validate_injection(injection: &InjectionConfig) -> Result<(), RequestError> {
    if !injection.enabled {
        return Ok(());
    }
    let invalid = |reason: String| RequestError::InvalidInjection { reason };
    let amount = injection.annual_amount_eur;
    if !amount.is_finite() || amount < 0.0 {
        return Err(invalid("annualAmountEur must be a finite value >= 0".to_string()));
    }
    let mut total = 0.0;
    for (isin, &pct) in &injection.allocation {
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return Err(invalid(format!("allocation for {isin} must be between 0 and 100")));
        }
        total += pct;
    }
    if total > 100.0 + 1e-9 {
        return Err(invalid(format!("allocation sums to {total}%, above 100%")));
    }
    Ok(())
}

fn validate_scenario(scenario: &ScenarioConfig, start_year: i32) -> Result<(), RequestError> {
    let id = scenario.id();
    let invalid = |reason: String| RequestError::InvalidScenario {
        id: id.to_string(),
        reason,
    };
    if id.trim().is_empty() {
        return Err(invalid("id must not be empty".to_string()));
    }
    match scenario {
        ScenarioConfig::CouponReinvestment {
            price_shift_pct,
            reinvest_yield_pct,
            overrides,
            ..
        } => {
            if !price_shift_pct.is_finite() {
                return Err(invalid("priceShiftPct must be finite".to_string()));
            }
            if reinvest_yield_pct.is_some_and(|y| !y.is_finite()) {
                return Err(invalid("reinvestYieldPct must be finite".to_string()));
            }
            for (isin, over) in overrides {
                let values = [over.price_shift_pct, over.reinvest_yield_pct];
                if values.iter().flatten().any(|v| !v.is_finite()) {
                    return Err(invalid(format!("override for {isin} has a non-finite value")));
                }
            }
        }
        ScenarioConfig::MaturityReplacement { replacements, .. } => {
            if replacements.is_empty() {
                return Err(invalid("no replacements configured".to_string()));
            }
            let mut sources = BTreeSet::new();
            for terms in replacements {
                if !sources.insert(terms.source_isin.as_str()) {
                    return Err(RequestError::DuplicateReplacementSource {
                        id: id.to_string(),
                        isin: terms.source_isin.clone(),
                    });
                }
                if !terms.net_coupon_pct.is_finite() || !terms.price_shift_pct.is_finite() {
                    return Err(invalid(format!(
                        "replacement for {} has a non-finite coupon or price shift",
                        terms.source_isin
                    )));
                }
                if terms.maturity_year <= start_year {
                    return Err(invalid(format!(
                        "replacement for {} matures in {}, not after {start_year}",
                        terms.source_isin, terms.maturity_year
                    )));
                }
                let latest = start_year + MAX_SIMULATION_YEARS as i32;
                if terms.maturity_year > latest {
                    return Err(invalid(format!(
                        "replacement for {} matures in {}, past the last year {latest}",
                        terms.source_isin, terms.maturity_year
                    )));
                }
            }
        }
    }
    Ok(())
}

/// `(currency, years to maturity)` pairs the slot builder will look up.
pub fn fx_needs(holdings: &[Holding], start_year: i32) -> Vec<(String, u32)> {
    holdings
        .iter()
        .filter_map(|h| {
            let maturity = parse_maturity_year(&h.maturity)?.max(start_year + 1);
            Some((h.currency.clone(), (maturity - start_year) as u32))
        })
        .collect()
}

/// Validates `request`, prefetches its FX multipliers and runs every scenario.
pub fn project<P>(
    request: &SimulationRequest,
    provider: &P,
    report_currency: &str,
) -> Result<Projection, RequestError>
where
    P: FxMultiplierProvider + ?Sized,
{
    let start_year = request.resolved_start_year();
    request.validate(start_year)?;
    let fx = FxTable::prefetch(
        provider,
        report_currency,
        fx_needs(&request.holdings, start_year),
    );
    Ok(project_with_table(request, start_year, &fx))
}

/// Runs the "no reinvestment" baseline and every configured scenario against
/// an already populated FX table.
pub fn project_with_table(
    request: &SimulationRequest,
    start_year: i32,
    fx: &FxTable,
) -> Projection {
    let built = SlotBuilder::new(start_year, fx).build(&request.holdings);
    let slots = built.slots;
    let basis = model_basis(&slots);

    let last_year = request
        .scenarios
        .iter()
        .filter_map(|scenario| match scenario {
            ScenarioConfig::MaturityReplacement { replacements, .. } => Some(replacement_end_year(
                start_year,
                request.simulation_years,
                replacements,
            )),
            ScenarioConfig::CouponReinvestment { .. } => None,
        })
        .fold(start_year + request.simulation_years as i32, i32::max);
    let years: Vec<i32> = ((start_year + 1)..=last_year).collect();
    let schedule = build_injection_schedule(&request.holdings, &request.injection, &years);
    let injection = (!schedule.is_empty()).then_some(&schedule);

    let default_yield = request
        .default_reinvest_yield_pct
        .unwrap_or_else(|| portfolio_yield(&slots, start_year));

    let baseline = run_coupon_reinvestment(
        &slots,
        &ReinvestParams {
            id: BASELINE_ID,
            start_year,
            simulation_years: request.simulation_years,
            reinvest_mode: ReinvestMode::None,
            price_shift_pct: 0.0,
            reinvest_yield_pct: default_yield,
            overrides: None,
            injection,
        },
    );

    let scenarios: Vec<ScenarioResult> = request
        .scenarios
        .iter()
        .map(|scenario| match scenario {
            ScenarioConfig::CouponReinvestment {
                id,
                reinvest_mode,
                price_shift_pct,
                reinvest_yield_pct,
                overrides,
            } => run_coupon_reinvestment(
                &slots,
                &ReinvestParams {
                    id,
                    start_year,
                    simulation_years: request.simulation_years,
                    reinvest_mode: *reinvest_mode,
                    price_shift_pct: *price_shift_pct,
                    reinvest_yield_pct: reinvest_yield_pct.unwrap_or(default_yield),
                    overrides: Some(overrides),
                    injection,
                },
            ),
            ScenarioConfig::MaturityReplacement { id, replacements } => run_maturity_replacement(
                &slots,
                &ReplacementParams {
                    id,
                    start_year,
                    simulation_years: request.simulation_years,
                    replacements,
                    injection,
                },
            ),
        })
        .collect();

    let scale = match request.start_capital {
        Some(capital) if basis > 0.0 => capital / basis,
        Some(_) => {
            tracing::warn!("model basis is zero, start capital cannot be applied");
            1.0
        }
        None => 1.0,
    };

    tracing::info!(
        start_year,
        end_year = last_year,
        holdings = slots.len(),
        skipped = built.skipped.len(),
        scenarios = scenarios.len(),
        model_basis = basis,
        scale,
        "projection complete"
    );

    Projection {
        start_year,
        end_year: last_year,
        model_basis: basis,
        scale,
        skipped_holdings: built.skipped,
        baseline: baseline.rescaled(scale),
        scenarios: scenarios.into_iter().map(|s| s.rescaled(scale)).collect(),
    }
}
