use std::collections::BTreeMap;

use serde::Serialize;

use super::engine::{ReinvestPolicy, RunState, price_factor};
use super::injection::InjectionSchedule;
use super::types::{
    ReinvestMode, ReplacementTerms, ScenarioResult, Slot, SlotId, SlotKind, YearValue,
};

/// Lifecycle of one configured replacement.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "state", content = "slot")]
pub enum ReplacementState {
    /// Source holding has not matured yet.
    Pending,
    /// Source matured; the synthetic instrument lives in this slot.
    Active(SlotId),
    /// The synthetic instrument reached its own maturity.
    Redeemed,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Role {
    Baseline,
    Source(usize),
    Replacement(usize),
}

#[derive(Debug, Clone)]
pub struct ReplacementParams<'a> {
    pub id: &'a str,
    pub start_year: i32,
    pub simulation_years: u32,
    pub replacements: &'a [ReplacementTerms],
    pub injection: Option<&'a InjectionSchedule>,
}

/// Last projected year: the horizon, stretched to the latest replacement maturity.
pub fn replacement_end_year(
    start_year: i32,
    simulation_years: u32,
    replacements: &[ReplacementTerms],
) -> i32 {
    let horizon = start_year + simulation_years as i32;
    replacements
        .iter()
        .map(|t| t.maturity_year)
        .fold(horizon, i32::max)
}

fn role_of(roles: &[Role], id: SlotId) -> Role {
    roles.get(id.0).copied().unwrap_or(Role::Baseline)
}

pub fn run_maturity_replacement(slots: &[Slot], params: &ReplacementParams<'_>) -> ScenarioResult {
    run_maturity_replacement_traced(slots, params).0
}

/// Runs the scenario and also reports the final state of each replacement,
/// keyed by source ISIN.
pub fn run_maturity_replacement_traced(
    slots: &[Slot],
    params: &ReplacementParams<'_>,
) -> (ScenarioResult, BTreeMap<String, ReplacementState>) {
    let terms = params.replacements;
    let end_year = replacement_end_year(params.start_year, params.simulation_years, terms);
    let baseline_policy = ReinvestPolicy {
        mode: ReinvestMode::SameInstrument,
        price_shift_pct: 0.0,
        reinvest_yield_pct: 0.0,
        overrides: None,
    };

    let mut roles: Vec<Role> = slots
        .iter()
        .map(|slot| {
            terms
                .iter()
                .position(|t| slot.kind == SlotKind::Real && t.source_isin == slot.isin)
                .map_or(Role::Baseline, Role::Source)
        })
        .collect();
    for (k, t) in terms.iter().enumerate() {
        if !roles.contains(&Role::Source(k)) {
            tracing::warn!(
                scenario = params.id,
                source = %t.source_isin,
                "replacement source not found in portfolio, it will never activate"
            );
        }
    }
    let mut states = vec![ReplacementState::Pending; terms.len()];

    let mut state = RunState::new(slots.to_vec(), params.start_year, end_year);
    let start_value = state.portfolio_value();
    let mut values = vec![YearValue {
        year: params.start_year,
        portfolio_value: start_value,
    }];
    let mut events = Vec::new();
    let mut previous_value = start_value;

    for year in (params.start_year + 1)..=end_year {
        let mut ledger = state.begin_year(year);
        let coupons = state.accrue_income(&mut ledger);
        let matured = state.redeem_matured(&mut ledger);
        if let Some(amounts) = params.injection.and_then(|s| s.get(&year)) {
            state.apply_injection(amounts, &mut ledger);
        }

        let mut maturing_sources = vec![false; terms.len()];
        for &(id, _) in &matured {
            if let Role::Source(k) = role_of(&roles, id) {
                maturing_sources[k] = true;
            }
        }

        let mut proceeds = vec![0.0; terms.len()];
        let mut baseline_cash = 0.0;
        for &(id, coupon) in &coupons {
            match role_of(&roles, id) {
                Role::Baseline => baseline_cash += coupon,
                Role::Source(k) if maturing_sources[k] => proceeds[k] += coupon,
                Role::Source(_) | Role::Replacement(_) => state.hold_cash(coupon),
            }
        }
        for &(id, redemption) in &matured {
            match role_of(&roles, id) {
                Role::Baseline => baseline_cash += redemption,
                Role::Source(k) => proceeds[k] += redemption,
                Role::Replacement(k) => {
                    state.hold_cash(redemption);
                    states[k] = ReplacementState::Redeemed;
                    tracing::debug!(
                        scenario = params.id,
                        source = %terms[k].source_isin,
                        year,
                        redemption,
                        "replacement redeemed"
                    );
                }
            }
        }

        for (k, t) in terms.iter().enumerate() {
            if !maturing_sources[k] || states[k] != ReplacementState::Pending {
                continue;
            }
            let price = price_factor(t.price_shift_pct);
            let amount = proceeds[k];
            let slot = Slot {
                isin: format!("REPL-{}", t.source_isin),
                kind: SlotKind::Replacement,
                units_held: amount / price,
                face_per_unit: 1.0,
                coupon_per_unit: (t.net_coupon_pct / 100.0).max(0.0),
                price_per_unit: price,
                accrued_per_unit: 0.0,
                start_year: year,
                maturity_year: t.maturity_year.max(year + 1),
                fx_buy: 1.0,
                take_coupon_as_cash: !t.reinvest_coupons,
            };
            let id = state.invest_in_new_slot(slot, amount, &mut ledger);
            if roles.len() <= id.0 {
                roles.resize(id.0 + 1, Role::Baseline);
            }
            roles[id.0] = Role::Replacement(k);
            states[k] = ReplacementState::Active(id);
            ledger.activated_sources.push(t.source_isin.clone());
            tracing::debug!(
                scenario = params.id,
                source = %t.source_isin,
                year,
                proceeds = amount,
                "replacement activated"
            );
        }

        if baseline_cash > 0.0 {
            let alive: Vec<SlotId> = state
                .alive_ids()
                .into_iter()
                .filter(|&id| role_of(&roles, id) == Role::Baseline)
                .collect();
            let pool = if alive.is_empty() {
                matured
                    .iter()
                    .map(|&(id, _)| id)
                    .filter(|&id| role_of(&roles, id) == Role::Baseline)
                    .collect()
            } else {
                alive
            };
            state.allocate(baseline_cash, &pool, &baseline_policy, &mut ledger);
        }

        let event = state.close_year(ledger, previous_value);
        previous_value = event.portfolio_value;
        values.push(YearValue {
            year,
            portfolio_value: event.portfolio_value,
        });
        events.push(event);
    }

    let final_states = terms
        .iter()
        .zip(states)
        .map(|(t, s)| (t.source_isin.clone(), s))
        .collect();
    let result = ScenarioResult {
        id: params.id.to_string(),
        values,
        events,
    };
    (result, final_states)
}
