use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const REPORT_CURRENCY: &str = "EUR";

/// Years a synthetic reinvestment lot outlives the projection horizon.
pub const LONG_TAIL_YEARS: i32 = 30;

/// Lower bound for every price-shift factor `1 + shift/100`.
pub const MIN_PRICE_FACTOR: f64 = 0.01;

fn default_nominal() -> f64 {
    100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBasis {
    pub purchase_price: f64,
    #[serde(default)]
    pub purchase_date: Option<String>,
}

/// A bond position as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub isin: String,
    #[serde(default)]
    pub issuer: String,
    pub currency: String,
    pub quantity: f64,
    pub price: f64,
    pub price_eur: f64,
    #[serde(alias = "coupon")]
    pub coupon_pct: f64,
    #[serde(default, alias = "taxRate")]
    pub tax_rate_pct: f64,
    /// ISO date, `YYYY-MM-DD`.
    pub maturity: String,
    #[serde(default = "default_nominal")]
    pub nominal: f64,
    #[serde(default)]
    pub cost_basis: Option<CostBasis>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotKind {
    Real,
    #[serde(alias = "sameInstrument", alias = "same_instrument")]
    SameInstrumentReinvestment,
    #[serde(alias = "marketAverage", alias = "market_average")]
    MarketAverageReinvestment,
    Replacement,
}

impl SlotKind {
    /// Income on these slots stays inside the slot instead of being paid out.
    pub fn accrues_internally(self) -> bool {
        matches!(self, SlotKind::MarketAverageReinvestment)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReinvestMode {
    #[serde(alias = "no-reinvest", alias = "noReinvest", alias = "no_reinvest")]
    None,
    #[serde(alias = "sameInstrument", alias = "same_instrument")]
    SameInstrument,
    #[serde(alias = "marketAverage", alias = "market_average")]
    MarketAverage,
}

/// Stable index of a slot inside a run's arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct SlotId(pub usize);

/// Simulation state for one lot of a holding.
///
/// Prices and faces are expressed in the report currency.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub isin: String,
    pub kind: SlotKind,
    pub units_held: f64,
    pub face_per_unit: f64,
    /// Net of withholding tax.
    pub coupon_per_unit: f64,
    pub price_per_unit: f64,
    pub accrued_per_unit: f64,
    pub start_year: i32,
    pub maturity_year: i32,
    /// Multiplier on the cost of buying more units (currency conversion).
    pub fx_buy: f64,
    pub take_coupon_as_cash: bool,
}

impl Slot {
    pub fn is_replacement(&self) -> bool {
        self.kind == SlotKind::Replacement
    }

    /// Per-unit price in `year`, pulled linearly from the purchase price to face.
    pub fn price_at(&self, year: i32) -> f64 {
        if year >= self.maturity_year || self.maturity_year <= self.start_year {
            return self.face_per_unit;
        }
        if year <= self.start_year {
            return self.price_per_unit;
        }
        let elapsed = (year - self.start_year) as f64;
        let span = (self.maturity_year - self.start_year) as f64;
        self.price_per_unit + (self.face_per_unit - self.price_per_unit) * elapsed / span
    }

    pub fn market_value(&self, year: i32) -> f64 {
        (self.units_held * (self.price_at(year) + self.accrued_per_unit)).max(0.0)
    }

    pub fn face_value(&self) -> f64 {
        (self.units_held * self.face_per_unit).max(0.0)
    }

    pub fn redemption_value(&self) -> f64 {
        (self.units_held * (self.face_per_unit + self.accrued_per_unit)).max(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HoldingOverride {
    pub reinvest_mode: Option<ReinvestMode>,
    pub price_shift_pct: Option<f64>,
    pub reinvest_yield_pct: Option<f64>,
}

/// Terms of the synthetic instrument bought with a matured source holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementTerms {
    pub source_isin: String,
    pub net_coupon_pct: f64,
    #[serde(default)]
    pub price_shift_pct: f64,
    pub maturity_year: i32,
    #[serde(default)]
    pub reinvest_coupons: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ScenarioConfig {
    #[serde(rename_all = "camelCase", alias = "coupon_reinvest")]
    CouponReinvestment {
        id: String,
        reinvest_mode: ReinvestMode,
        #[serde(default)]
        price_shift_pct: f64,
        #[serde(default)]
        reinvest_yield_pct: Option<f64>,
        #[serde(default)]
        overrides: BTreeMap<String, HoldingOverride>,
    },
    #[serde(rename_all = "camelCase", alias = "maturity_replacement")]
    MaturityReplacement {
        id: String,
        replacements: Vec<ReplacementTerms>,
    },
}

impl ScenarioConfig {
    pub fn id(&self) -> &str {
        match self {
            ScenarioConfig::CouponReinvestment { id, .. } => id,
            ScenarioConfig::MaturityReplacement { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InjectionConfig {
    pub enabled: bool,
    pub annual_amount_eur: f64,
    /// Sparse percentage per ISIN; missing holdings share the remainder.
    pub allocation: BTreeMap<String, f64>,
    /// Number of loop years receiving an injection; `None` means all of them.
    pub years: Option<u32>,
}

/// Everything one projection needs, passed by value into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    #[serde(default)]
    pub start_year: Option<i32>,
    pub simulation_years: u32,
    #[serde(default)]
    pub start_capital: Option<f64>,
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
    #[serde(default)]
    pub injection: InjectionConfig,
    #[serde(default)]
    pub default_reinvest_yield_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotFlow {
    pub slot: SlotId,
    pub isin: String,
    pub kind: SlotKind,
    pub is_replacement: bool,
    pub coupon: f64,
    pub replacement_coupon: f64,
    pub redemption: f64,
    pub injected: f64,
    pub market_value: f64,
    pub reinvested: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearEvent {
    pub year: i32,
    pub coupons: f64,
    pub accrued_income: f64,
    pub redemptions: f64,
    pub injected: f64,
    pub cash_in: f64,
    pub reinvested: f64,
    pub idle_cash: f64,
    pub replacement_activated: bool,
    pub activated_sources: Vec<String>,
    pub portfolio_value: f64,
    pub delta: f64,
    pub slots: Vec<SlotFlow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearValue {
    pub year: i32,
    pub portfolio_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub id: String,
    pub values: Vec<YearValue>,
    pub events: Vec<YearEvent>,
}

impl ScenarioResult {
    pub fn value_in(&self, year: i32) -> Option<f64> {
        self.values
            .iter()
            .find(|v| v.year == year)
            .map(|v| v.portfolio_value)
    }

    pub fn event_in(&self, year: i32) -> Option<&YearEvent> {
        self.events.iter().find(|e| e.year == year)
    }

    /// Multiplies every monetary figure by `factor`.
    pub fn rescaled(mut self, factor: f64) -> Self {
        for value in &mut self.values {
            value.portfolio_value *= factor;
        }
        for event in &mut self.events {
            event.coupons *= factor;
            event.accrued_income *= factor;
            event.redemptions *= factor;
            event.injected *= factor;
            event.cash_in *= factor;
            event.reinvested *= factor;
            event.idle_cash *= factor;
            event.portfolio_value *= factor;
            event.delta *= factor;
            for flow in &mut event.slots {
                flow.coupon *= factor;
                flow.replacement_coupon *= factor;
                flow.redemption *= factor;
                flow.injected *= factor;
                flow.market_value *= factor;
                flow.reinvested *= factor;
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub start_year: i32,
    pub end_year: i32,
    pub model_basis: f64,
    pub scale: f64,
    pub skipped_holdings: Vec<String>,
    pub baseline: ScenarioResult,
    pub scenarios: Vec<ScenarioResult>,
}
