//! Configuration structures for the tapesim engine.
//!
//! Every recognized option has a documented default; venue and engine
//! configuration is immutable once the corresponding component is created.

use crate::error::{Error, Result};
use crate::types::{Currency, Money};
use serde::{Deserialize, Serialize};

/// Order management mode at a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OmsType {
    /// Single net position per instrument.
    Netting,
    /// Multiple independent positions, each with its own id.
    Hedging,
}

/// Account type at a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    /// Full notional settles through the balance.
    Cash,
    /// Realized PnL and commissions settle; margin is locked per position.
    Margin,
}

/// Engine-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log level for the run ("error", "warn", "info", "debug", "trace").
    pub log_level: String,
    /// Skip pre-trade balance/margin checks when true.
    pub bypass_risk_checks: bool,
    /// Fill model configuration shared by all venues.
    pub fill_model: FillModelConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bypass_risk_checks: false,
            fill_model: FillModelConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate option ranges.
    pub fn validate(&self) -> Result<()> {
        self.fill_model.validate()
    }
}

/// Per-venue configuration, immutable after venue creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Venue name (becomes the `VenueId`).
    pub venue: String,
    /// Order management mode.
    pub oms_type: OmsType,
    /// Account type.
    pub account_type: AccountType,
    /// Primary account currency; None = multi-currency account holding
    /// independent balances per currency.
    pub base_currency: Option<Currency>,
    /// Starting balances per currency.
    pub starting_balances: Vec<Money>,
}

impl VenueConfig {
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            oms_type: OmsType::Netting,
            account_type: AccountType::Margin,
            base_currency: Some(Currency::usd()),
            starting_balances: vec![Money::new(1_000_000.0, Currency::usd())],
        }
    }

    pub fn with_oms_type(mut self, oms_type: OmsType) -> Self {
        self.oms_type = oms_type;
        self
    }

    pub fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.account_type = account_type;
        self
    }

    /// Multi-currency account: independent balances, no base currency.
    pub fn multi_currency(mut self, starting_balances: Vec<Money>) -> Self {
        self.base_currency = None;
        self.starting_balances = starting_balances;
        self
    }

    pub fn with_starting_balances(mut self, starting_balances: Vec<Money>) -> Self {
        self.starting_balances = starting_balances;
        self
    }
}

/// Fill model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillModelConfig {
    /// Probability a limit order fills when the market touches (but does not
    /// trade through) its price.
    pub prob_fill_on_limit: f64,
    /// Probability a stop order fills when the market touches its trigger.
    pub prob_fill_on_stop: f64,
    /// Probability a taker fill slips from the expected price.
    pub prob_slippage: f64,
    /// Magnitude of a slip when one occurs, in ticks against the order.
    pub slippage_ticks: u32,
    /// Seed for the deterministic random generator.
    pub seed: u64,
}

impl Default for FillModelConfig {
    fn default() -> Self {
        Self {
            prob_fill_on_limit: 1.0,
            prob_fill_on_stop: 1.0,
            prob_slippage: 0.0,
            slippage_ticks: 1,
            seed: 42,
        }
    }
}

impl FillModelConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, p) in [
            ("prob_fill_on_limit", self.prob_fill_on_limit),
            ("prob_fill_on_stop", self.prob_fill_on_stop),
            ("prob_slippage", self.prob_slippage),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::config(format!("{name} must be in [0, 1], got {p}")));
            }
        }
        Ok(())
    }
}

/// Configuration for the FX rollover interest module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloverInterestConfig {
    /// UTC hour of the daily rollover boundary.
    pub rollover_hour_utc: u32,
    /// Annual interest-rate differential per symbol (fraction, long side;
    /// shorts receive the negated rate).
    pub annual_rates: Vec<(String, f64)>,
    /// Day count convention divisor.
    pub day_count: u32,
}

impl Default for RolloverInterestConfig {
    fn default() -> Self {
        Self {
            rollover_hour_utc: 21,
            annual_rates: Vec::new(),
            day_count: 365,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.bypass_risk_checks);
        assert_eq!(config.fill_model.prob_fill_on_limit, 1.0);
        assert_eq!(config.fill_model.prob_slippage, 0.0);
        assert_eq!(config.fill_model.seed, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_probability_range_validated() {
        let mut config = EngineConfig::default();
        config.fill_model.prob_slippage = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_venue_config_builders() {
        let config = VenueConfig::new("SIM")
            .with_oms_type(OmsType::Hedging)
            .with_account_type(AccountType::Cash)
            .multi_currency(vec![
                Money::new(100_000.0, Currency::usd()),
                Money::new(100_000.0, Currency::eur()),
            ]);
        assert!(config.base_currency.is_none());
        assert_eq!(config.starting_balances.len(), 2);
        assert_eq!(config.oms_type, OmsType::Hedging);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.log_level, config.log_level);
        assert_eq!(back.fill_model.seed, config.fill_model.seed);
    }
}
