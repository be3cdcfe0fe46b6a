mod engine;
#[cfg(test)]
mod fixtures;
mod fx;
mod injection;
mod projection;
mod replacement;
mod slots;
mod types;

pub use engine::{ReinvestParams, run_coupon_reinvestment};
pub use fx::{
    FxMultiplierProvider, FxMultipliers, FxPhase, FxTable, StaticFxEntry, StaticFxProvider,
};
pub use injection::{InjectionSchedule, build_injection_schedule};
pub use projection::{
    BASELINE_ID, MAX_SIMULATION_YEARS, MAX_START_YEAR, MIN_START_YEAR, current_year, fx_needs,
    project, project_with_table,
};
pub use replacement::{
    ReplacementParams, ReplacementState, replacement_end_year, run_maturity_replacement,
    run_maturity_replacement_traced,
};
pub use slots::{
    BuiltSlots, SlotBuilder, build_slots, model_basis, parse_maturity_year, portfolio_yield,
    simple_annual_yield,
};
pub use types::{
    CostBasis, Holding, HoldingOverride, InjectionConfig, LONG_TAIL_YEARS, MIN_PRICE_FACTOR,
    Projection, REPORT_CURRENCY, ReinvestMode, ReplacementTerms, ScenarioConfig, ScenarioResult,
    SimulationRequest, Slot, SlotFlow, SlotId, SlotKind, YearEvent, YearValue,
};
