//! Shared test portfolio: nine holdings, about €322,490 of face value.

use super::slots::build_slots;
use super::types::{Holding, Slot, SlotKind};

pub const FIXTURE_START_YEAR: i32 = 2025;
pub const SOURCE_ISIN: &str = "IT0001278511";

fn holding(
    isin: &str,
    currency: &str,
    quantity: f64,
    price: f64,
    price_eur: f64,
    coupon_pct: f64,
    tax_rate_pct: f64,
    maturity: &str,
) -> Holding {
    Holding {
        isin: isin.to_string(),
        issuer: format!("Issuer of {isin}"),
        currency: currency.to_string(),
        quantity,
        price,
        price_eur,
        coupon_pct,
        tax_rate_pct,
        maturity: maturity.to_string(),
        nominal: 100.0,
        cost_basis: None,
    }
}

pub fn fixture_holdings() -> Vec<Holding> {
    vec![
        holding(SOURCE_ISIN, "EUR", 50.0, 104.5, 104.5, 5.25, 12.5, "2029-11-01"),
        holding("IT0005240830", "EUR", 600.0, 98.6, 98.6, 2.2, 12.5, "2027-06-01"),
        holding("IT0005083057", "EUR", 500.0, 91.4, 91.4, 3.25, 12.5, "2046-09-01"),
        holding("XS1586146851", "EUR", 400.0, 97.2, 97.2, 3.5, 26.0, "2032-03-15"),
        holding("FR0013508470", "EUR", 350.0, 95.1, 95.1, 1.5, 26.0, "2030-05-25"),
        holding("DE0001102580", "EUR", 450.0, 98.8, 98.8, 2.1, 26.0, "2033-02-15"),
        holding("ES0000012K61", "EUR", 300.0, 96.0, 96.0, 3.45, 26.0, "2043-07-30"),
        holding("IT0005438004", "EUR", 524.9, 68.3, 68.3, 1.5, 12.5, "2045-04-30"),
        holding("US912810TM09", "USD", 54.35, 100.0, 92.0, 4.0, 26.0, "2034-08-15"),
    ]
}

pub fn fixture_slots() -> Vec<Slot> {
    build_slots(&fixture_holdings(), FIXTURE_START_YEAR).slots
}

/// A real slot priced at par (face 100) bought in the fixture start year.
pub fn par_slot(isin: &str, units: f64, coupon_per_unit: f64, maturity_year: i32) -> Slot {
    Slot {
        isin: isin.to_string(),
        kind: SlotKind::Real,
        units_held: units,
        face_per_unit: 100.0,
        coupon_per_unit,
        price_per_unit: 100.0,
        accrued_per_unit: 0.0,
        start_year: FIXTURE_START_YEAR,
        maturity_year,
        fx_buy: 1.0,
        take_coupon_as_cash: true,
    }
}
