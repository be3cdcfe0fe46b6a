use chrono::{Datelike, NaiveDate};

use super::fx::{FxPhase, FxTable};
use super::types::{Holding, REPORT_CURRENCY, Slot, SlotKind};

/// Slots built from a holdings list, plus the ISINs that had to be left out.
#[derive(Debug, Clone, Default)]
pub struct BuiltSlots {
    pub slots: Vec<Slot>,
    pub skipped: Vec<String>,
}

pub fn parse_maturity_year(maturity: &str) -> Option<i32> {
    NaiveDate::parse_from_str(maturity.trim(), "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

/// Converts holdings into the slots a projection starts from.
pub struct SlotBuilder<'a> {
    start_year: i32,
    fx: &'a FxTable,
}

impl<'a> SlotBuilder<'a> {
    pub fn new(start_year: i32, fx: &'a FxTable) -> Self {
        Self { start_year, fx }
    }

    pub fn build(&self, holdings: &[Holding]) -> BuiltSlots {
        let mut built = BuiltSlots::default();
        for holding in holdings {
            match self.build_one(holding) {
                Some(slot) => built.slots.push(slot),
                None => built.skipped.push(holding.isin.clone()),
            }
        }
        built
    }

    /// `None` when the maturity date cannot be parsed; the holding then
    /// contributes nothing to the run.
    pub fn build_one(&self, holding: &Holding) -> Option<Slot> {
        let Some(maturity_year) = parse_maturity_year(&holding.maturity) else {
            tracing::warn!(
                isin = %holding.isin,
                maturity = %holding.maturity,
                "malformed maturity date, holding excluded from projection"
            );
            return None;
        };
        // Anything already due is redeemed in the first projected year.
        let maturity_year = maturity_year.max(self.start_year + 1);

        let native = holding.currency.eq_ignore_ascii_case(REPORT_CURRENCY);
        let conversion = if native || holding.price <= 0.0 {
            1.0
        } else {
            (holding.price_eur / holding.price).max(0.0)
        };

        let nominal = finite_non_negative(holding.nominal);
        let coupon_rate = finite_non_negative(holding.coupon_pct) / 100.0;
        let tax_rate = finite_non_negative(holding.tax_rate_pct).min(100.0) / 100.0;

        let mut face_per_unit = nominal * conversion;
        let mut coupon_per_unit = coupon_rate * face_per_unit * (1.0 - tax_rate);
        let price_per_unit = if holding.price_eur > 0.0 && holding.price_eur.is_finite() {
            holding.price_eur
        } else {
            tracing::debug!(isin = %holding.isin, "non-positive EUR price, valuing at face");
            face_per_unit
        };

        let mut fx_buy = 1.0;
        if !self.fx.is_report_currency(&holding.currency) {
            let horizon = (maturity_year - self.start_year).max(0) as u32;
            let fx = self.fx.lookup(&holding.currency, horizon);
            coupon_per_unit *= fx.for_phase(FxPhase::Coupon);
            face_per_unit *= fx.for_phase(FxPhase::Maturity);
            fx_buy = fx.for_phase(FxPhase::Buy);
        }

        Some(Slot {
            isin: holding.isin.clone(),
            kind: SlotKind::Real,
            units_held: finite_non_negative(holding.quantity),
            face_per_unit,
            coupon_per_unit,
            price_per_unit,
            accrued_per_unit: 0.0,
            start_year: self.start_year,
            maturity_year,
            fx_buy,
            take_coupon_as_cash: true,
        })
    }
}

/// Builds slots with neutral FX multipliers.
pub fn build_slots(holdings: &[Holding], start_year: i32) -> BuiltSlots {
    let fx = FxTable::neutral(REPORT_CURRENCY);
    SlotBuilder::new(start_year, &fx).build(holdings)
}

/// Σ units × price at build time; the value every projection starts from.
pub fn model_basis(slots: &[Slot]) -> f64 {
    slots
        .iter()
        .map(|s| (s.units_held * s.price_per_unit).max(0.0))
        .sum()
}

/// Simple annual yield in percent: net coupon plus the pull-to-par gain spread
/// evenly over the remaining years, relative to the price paid.
pub fn simple_annual_yield(slot: &Slot, start_year: i32) -> Option<f64> {
    if slot.price_per_unit <= 0.0 {
        return None;
    }
    let years = (slot.maturity_year - start_year).max(1) as f64;
    let gain_per_year = (slot.face_per_unit - slot.price_per_unit) / years;
    Some((slot.coupon_per_unit + gain_per_year) / slot.price_per_unit * 100.0)
}

/// Face-weighted SAY across the portfolio, `0.0` when nothing carries weight.
pub fn portfolio_yield(slots: &[Slot], start_year: i32) -> f64 {
    let mut weighted = 0.0;
    let mut weight = 0.0;
    for slot in slots {
        if let Some(say) = simple_annual_yield(slot, start_year) {
            let face = slot.face_value();
            weighted += say * face;
            weight += face;
        }
    }
    if weight > 0.0 { weighted / weight } else { 0.0 }
}

fn finite_non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}
