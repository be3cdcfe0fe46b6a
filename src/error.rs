//! Error types for the request, configuration and FX boundaries.
//!
//! The projection engine itself never fails: every holding-level problem
//! resolves to a neutral numeric fallback. Errors only exist where external
//! input enters the crate.

use thiserror::Error;

/// Problems found while validating a [`SimulationRequest`](crate::core::SimulationRequest).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("simulationYears must be between 1 and {max}, got {got}")]
    InvalidHorizon { got: u32, max: u32 },

    #[error("startYear must be between {min} and {max}, got {got}")]
    InvalidStartYear { got: i32, min: i32, max: i32 },

    #[error("request contains no holdings")]
    NoHoldings,

    #[error("holding '{isin}': {reason}")]
    InvalidHolding { isin: String, reason: String },

    #[error("startCapital must be a finite value > 0")]
    InvalidStartCapital,

    #[error("injection: {reason}")]
    InvalidInjection { reason: String },

    #[error("scenario '{id}': {reason}")]
    InvalidScenario { id: String, reason: String },

    #[error("duplicate scenario id '{id}'")]
    DuplicateScenario { id: String },

    #[error("scenario '{id}' configures more than one replacement for source '{isin}'")]
    DuplicateReplacementSource { id: String, isin: String },
}

/// Failures reported by an FX multiplier provider.
///
/// These never reach the engine: the FX table swaps them for neutral multipliers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FxError {
    #[error("no FX data for {currency}/{report_currency}")]
    UnknownPair {
        currency: String,
        report_currency: String,
    },

    #[error("FX provider unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("FX multiplier for {currency} is not a positive finite number")]
    InvalidMultiplier { currency: String },
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
