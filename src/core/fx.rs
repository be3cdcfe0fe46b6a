//! Currency-conversion multipliers consumed by the slot builder.
//!
//! The provider is only ever called while prefetching a [`FxTable`]; the
//! projection itself performs plain map lookups and falls back to neutral
//! multipliers when an entry is missing.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::FxError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FxPhase {
    Buy,
    Coupon,
    Maturity,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FxMultipliers {
    pub fx_buy: f64,
    pub fx_coupon: f64,
    pub fx_future: f64,
}

impl FxMultipliers {
    pub const NEUTRAL: FxMultipliers = FxMultipliers {
        fx_buy: 1.0,
        fx_coupon: 1.0,
        fx_future: 1.0,
    };

    pub fn for_phase(&self, phase: FxPhase) -> f64 {
        match phase {
            FxPhase::Buy => self.fx_buy,
            FxPhase::Coupon => self.fx_coupon,
            FxPhase::Maturity => self.fx_future,
        }
    }

    fn is_valid(&self) -> bool {
        [self.fx_buy, self.fx_coupon, self.fx_future]
            .iter()
            .all(|m| m.is_finite() && *m > 0.0)
    }
}

/// Source of expected conversion multipliers for a currency over a horizon.
pub trait FxMultiplierProvider {
    fn multipliers(
        &self,
        currency: &str,
        report_currency: &str,
        horizon_years: u32,
    ) -> Result<FxMultipliers, FxError>;
}

/// Configured multipliers for one currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StaticFxEntry {
    #[serde(default = "one")]
    pub buy: f64,
    #[serde(default = "one")]
    pub coupon: f64,
    /// Expected annual drift of the conversion rate at redemption, in percent.
    #[serde(default)]
    pub future_drift_pct: f64,
}

fn one() -> f64 {
    1.0
}

/// Provider backed by a fixed per-currency table, typically from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticFxProvider {
    report_currency: String,
    entries: BTreeMap<String, StaticFxEntry>,
}

impl StaticFxProvider {
    pub fn new(
        report_currency: impl Into<String>,
        entries: BTreeMap<String, StaticFxEntry>,
    ) -> Self {
        Self {
            report_currency: report_currency.into(),
            entries: entries
                .into_iter()
                .map(|(ccy, entry)| (ccy.to_ascii_uppercase(), entry))
                .collect(),
        }
    }
}

impl FxMultiplierProvider for StaticFxProvider {
    fn multipliers(
        &self,
        currency: &str,
        report_currency: &str,
        horizon_years: u32,
    ) -> Result<FxMultipliers, FxError> {
        if !report_currency.eq_ignore_ascii_case(&self.report_currency) {
            return Err(FxError::UnknownPair {
                currency: currency.to_string(),
                report_currency: report_currency.to_string(),
            });
        }
        let entry = self
            .entries
            .get(&currency.to_ascii_uppercase())
            .ok_or_else(|| FxError::UnknownPair {
                currency: currency.to_string(),
                report_currency: report_currency.to_string(),
            })?;
        let multipliers = FxMultipliers {
            fx_buy: entry.buy,
            fx_coupon: entry.coupon,
            fx_future: (1.0 + entry.future_drift_pct / 100.0).powi(horizon_years as i32),
        };
        if !multipliers.is_valid() {
            return Err(FxError::InvalidMultiplier {
                currency: currency.to_string(),
            });
        }
        Ok(multipliers)
    }
}

/// Read-only cache of multipliers keyed by `(currency, horizon)`.
#[derive(Debug, Clone)]
pub struct FxTable {
    report_currency: String,
    entries: HashMap<(String, u32), FxMultipliers>,
}

impl FxTable {
    /// A table with no entries: every lookup is neutral.
    pub fn neutral(report_currency: impl Into<String>) -> Self {
        Self {
            report_currency: report_currency.into(),
            entries: HashMap::new(),
        }
    }

    /// Resolves every `(currency, horizon)` pair up front.
    ///
    /// Same-currency pairs are never sent to the provider. Provider failures
    /// are logged and cached as neutral multipliers.
    pub fn prefetch<P, I>(provider: &P, report_currency: &str, needs: I) -> Self
    where
        P: FxMultiplierProvider + ?Sized,
        I: IntoIterator<Item = (String, u32)>,
    {
        let mut table = Self::neutral(report_currency);
        for (currency, horizon) in needs {
            let key = (currency.to_ascii_uppercase(), horizon);
            if key.0.eq_ignore_ascii_case(report_currency) || table.entries.contains_key(&key) {
                continue;
            }
            let multipliers = match provider.multipliers(&key.0, report_currency, horizon) {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(
                        currency = %key.0,
                        horizon,
                        error = %err,
                        "FX lookup failed, using neutral multipliers"
                    );
                    FxMultipliers::NEUTRAL
                }
            };
            table.entries.insert(key, multipliers);
        }
        table
    }

    pub fn is_report_currency(&self, currency: &str) -> bool {
        currency.eq_ignore_ascii_case(&self.report_currency)
    }

    pub fn lookup(&self, currency: &str, horizon_years: u32) -> FxMultipliers {
        if self.is_report_currency(currency) {
            return FxMultipliers::NEUTRAL;
        }
        self.entries
            .get(&(currency.to_ascii_uppercase(), horizon_years))
            .copied()
            .unwrap_or(FxMultipliers::NEUTRAL)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
