use std::collections::BTreeMap;

use super::slots::parse_maturity_year;
use super::types::{Holding, InjectionConfig};

/// EUR injected per ISIN, per projected year.
pub type InjectionSchedule = BTreeMap<i32, BTreeMap<String, f64>>;

/// Spreads the annual contribution over the holdings still alive each year.
///
/// `years` are the projected years (the start year itself never receives an
/// injection). Percentages of holdings that have matured are redistributed
/// over the survivors so the full amount is always allocated.
pub fn build_injection_schedule(
    holdings: &[Holding],
    config: &InjectionConfig,
    years: &[i32],
) -> InjectionSchedule {
    let mut schedule = InjectionSchedule::new();
    let amount = config.annual_amount_eur;
    if !config.enabled || !amount.is_finite() || amount <= 0.0 {
        return schedule;
    }

    let mut maturities: BTreeMap<&str, i32> = BTreeMap::new();
    for holding in holdings {
        let Some(year) = parse_maturity_year(&holding.maturity) else {
            continue;
        };
        let entry = maturities.entry(holding.isin.as_str()).or_insert(year);
        *entry = (*entry).max(year);
    }

    let limit = config.years.map(|n| n as usize).unwrap_or(years.len());
    for &year in years.iter().take(limit) {
        let active: Vec<&str> = maturities
            .iter()
            .filter(|&(_, &maturity)| maturity >= year)
            .map(|(&isin, _)| isin)
            .collect();
        if active.is_empty() {
            continue;
        }

        let weights = active_weights(&active, &config.allocation);
        let total: f64 = weights.iter().sum();
        let per_year: BTreeMap<String, f64> = if total > 0.0 {
            active
                .iter()
                .zip(&weights)
                .filter(|&(_, &w)| w > 0.0)
                .map(|(&isin, &w)| (isin.to_string(), amount * w / total))
                .collect()
        } else {
            let equal = amount / active.len() as f64;
            active
                .iter()
                .map(|&isin| (isin.to_string(), equal))
                .collect()
        };
        schedule.insert(year, per_year);
    }
    schedule
}

/// Configured percentage for each active holding; unconfigured holdings split
/// whatever the configured ones leave of 100%.
fn active_weights(active: &[&str], allocation: &BTreeMap<String, f64>) -> Vec<f64> {
    let configured = |isin: &str| {
        allocation
            .get(isin)
            .copied()
            .filter(|pct| pct.is_finite())
            .map(|pct| pct.clamp(0.0, 100.0))
    };

    let specified: f64 = active.iter().filter_map(|&isin| configured(isin)).sum();
    let unspecified = active
        .iter()
        .filter(|&&isin| configured(isin).is_none())
        .count();
    let default_share = if unspecified > 0 {
        (100.0 - specified).max(0.0) / unspecified as f64
    } else {
        0.0
    };

    active
        .iter()
        .map(|&isin| configured(isin).unwrap_or(default_share))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn holding(isin: &str, maturity: &str) -> Holding {
        Holding {
            isin: isin.to_string(),
            issuer: String::new(),
            currency: "EUR".to_string(),
            quantity: 10.0,
            price: 100.0,
            price_eur: 100.0,
            coupon_pct: 3.0,
            tax_rate_pct: 12.5,
            maturity: maturity.to_string(),
            nominal: 100.0,
            cost_basis: None,
        }
    }

    fn config(amount: f64, allocation: &[(&str, f64)]) -> InjectionConfig {
        InjectionConfig {
            enabled: true,
            annual_amount_eur: amount,
            allocation: allocation
                .iter()
                .map(|(isin, pct)| (isin.to_string(), *pct))
                .collect(),
            years: None,
        }
    }

    #[test]
    fn disabled_injection_yields_empty_schedule() {
        let mut cfg = config(1_000.0, &[]);
        cfg.enabled = false;
        let schedule = build_injection_schedule(&[holding("A", "2030-01-01")], &cfg, &[2026]);
        assert!(schedule.is_empty());
    }

    #[test]
    fn unspecified_holdings_split_evenly() {
        let holdings = [holding("A", "2030-01-01"), holding("B", "2030-01-01")];
        let schedule = build_injection_schedule(&holdings, &config(1_000.0, &[]), &[2026]);
        assert_approx(schedule[&2026]["A"], 500.0);
        assert_approx(schedule[&2026]["B"], 500.0);
    }

    #[test]
    fn unspecified_holdings_share_the_remainder() {
        let holdings = [
            holding("A", "2035-01-01"),
            holding("B", "2035-01-01"),
            holding("C", "2035-01-01"),
        ];
        let schedule =
            build_injection_schedule(&holdings, &config(1_000.0, &[("A", 60.0)]), &[2026]);
        assert_approx(schedule[&2026]["A"], 600.0);
        assert_approx(schedule[&2026]["B"], 200.0);
        assert_approx(schedule[&2026]["C"], 200.0);
    }

    #[test]
    fn matured_shares_are_redistributed() {
        let holdings = [holding("A", "2027-06-01"), holding("B", "2035-01-01")];
        let schedule = build_injection_schedule(
            &holdings,
            &config(1_000.0, &[("A", 75.0), ("B", 25.0)]),
            &[2026, 2027, 2028],
        );
        assert_approx(schedule[&2026]["A"], 750.0);
        assert_approx(schedule[&2027]["A"], 750.0);
        assert!(!schedule[&2028].contains_key("A"));
        assert_approx(schedule[&2028]["B"], 1_000.0);
        for per_year in schedule.values() {
            assert_approx(per_year.values().sum::<f64>(), 1_000.0);
        }
    }

    #[test]
    fn zero_percentages_fall_back_to_equal_split() {
        let holdings = [holding("A", "2035-01-01"), holding("B", "2035-01-01")];
        let schedule = build_injection_schedule(
            &holdings,
            &config(400.0, &[("A", 0.0), ("B", 0.0)]),
            &[2026],
        );
        assert_approx(schedule[&2026]["A"], 200.0);
        assert_approx(schedule[&2026]["B"], 200.0);
    }

    #[test]
    fn injection_period_limits_years() {
        let mut cfg = config(500.0, &[]);
        cfg.years = Some(2);
        let schedule = build_injection_schedule(
            &[holding("A", "2040-01-01")],
            &cfg,
            &[2026, 2027, 2028, 2029],
        );
        assert_eq!(schedule.keys().copied().collect::<Vec<_>>(), vec![2026, 2027]);
    }

    #[test]
    fn malformed_maturity_is_left_out() {
        let holdings = [holding("A", "not-a-date"), holding("B", "2035-01-01")];
        let schedule = build_injection_schedule(&holdings, &config(300.0, &[]), &[2026]);
        assert!(!schedule[&2026].contains_key("A"));
        assert_approx(schedule[&2026]["B"], 300.0);
    }
}
