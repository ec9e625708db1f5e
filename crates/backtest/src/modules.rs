//! Pluggable simulation modules.
//!
//! A module registers a trigger schedule at setup; the clock invokes its
//! callback at each trigger with a read-only view of the venue's ledger and
//! reference data, and the module answers with adjustment requests. The
//! engine submits those through `Ledger::apply_adjustment`, keeping all
//! balance mutation centrally auditable. A failed module computation fails
//! that trigger's adjustments only; the run continues.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tapesim_core::error::{Error, Result};
use tapesim_core::identifiers::InstrumentId;
use tapesim_core::instrument::Instrument;
use tapesim_core::types::{bps_of, Money, TimestampMs};
use tapesim_core::config::RolloverInterestConfig;

use crate::clock::TriggerSchedule;
use crate::ledger::Ledger;

/// A balance adjustment requested by a module.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub amount: Money,
    pub reason: String,
}

/// Read-only view handed to a module at each trigger.
pub struct ModuleContext<'a> {
    pub ts: TimestampMs,
    pub ledger: &'a Ledger,
    pub instruments: &'a HashMap<InstrumentId, Instrument>,
}

/// A scheduled timeline participant (e.g. FX rollover interest).
///
/// Modules own no ledger state; they compute adjustments from the account
/// snapshot they are handed. The clock guarantees `on_trigger` runs at most
/// once per scheduled trigger instance.
pub trait SimulationModule {
    fn name(&self) -> &str;

    /// The trigger schedule to register with the clock.
    fn schedule(&self) -> Box<dyn TriggerSchedule>;

    /// Compute adjustments for one trigger instance.
    fn on_trigger(&mut self, ctx: ModuleContext<'_>) -> Result<Vec<Adjustment>>;
}

/// Daily trigger at a fixed UTC wall-clock time.
pub struct DailyUtcSchedule {
    time: NaiveTime,
}

impl DailyUtcSchedule {
    pub fn at_hour(hour: u32) -> Self {
        Self {
            time: NaiveTime::from_hms_opt(hour, 0, 0).expect("valid hour"),
        }
    }
}

impl TriggerSchedule for DailyUtcSchedule {
    fn next_after(&mut self, ts: TimestampMs) -> Option<TimestampMs> {
        let current = DateTime::<Utc>::from_timestamp_millis(ts)?;
        let mut boundary = current.date_naive().and_time(self.time).and_utc();
        if boundary.timestamp_millis() <= ts {
            boundary += Duration::days(1);
        }
        Some(boundary.timestamp_millis())
    }
}

/// FX rollover interest: a periodic balance adjustment simulating the
/// cost/credit of holding a position across the daily session boundary.
///
/// Rates are annual interest-rate differentials per symbol, accrued daily on
/// the open cost basis: longs receive the rate, shorts pay it.
pub struct RolloverInterestModule {
    config: RolloverInterestConfig,
    rates: HashMap<String, f64>,
}

impl RolloverInterestModule {
    pub fn new(config: RolloverInterestConfig) -> Self {
        let rates = config
            .annual_rates
            .iter()
            .cloned()
            .collect::<HashMap<String, f64>>();
        Self { config, rates }
    }
}

impl SimulationModule for RolloverInterestModule {
    fn name(&self) -> &str {
        "fx-rollover-interest"
    }

    fn schedule(&self) -> Box<dyn TriggerSchedule> {
        Box::new(DailyUtcSchedule::at_hour(self.config.rollover_hour_utc))
    }

    fn on_trigger(&mut self, ctx: ModuleContext<'_>) -> Result<Vec<Adjustment>> {
        let date = DateTime::<Utc>::from_timestamp_millis(ctx.ts)
            .map(|dt| dt.date_naive().to_string())
            .unwrap_or_else(|| ctx.ts.to_string());

        let mut adjustments = Vec::new();
        for position in ctx.ledger.open_positions() {
            let symbol = &position.instrument_id.symbol.0;
            let rate = *self.rates.get(symbol).ok_or_else(|| {
                Error::module_adjustment(format!(
                    "no rollover rate configured for {symbol}"
                ))
            })?;
            // Daily accrual on the open cost basis, signed by direction.
            let daily_bps = rate * 10_000.0 / self.config.day_count as f64;
            let accrual = bps_of(&position.cost_basis, daily_bps);
            let amount = if position.net_raw >= 0 {
                accrual
            } else {
                accrual.negated()
            };
            if amount.is_zero() {
                continue;
            }
            adjustments.push(Adjustment {
                amount,
                reason: format!("rollover interest {symbol} {date}"),
            });
        }
        Ok(adjustments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapesim_core::config::VenueConfig;
    use tapesim_core::instrument::InstrumentSpec;
    use tapesim_core::identifiers::OrderId;
    use tapesim_core::orders::{Fill, LiquiditySide, OrderSide};
    use tapesim_core::types::{Currency, Price, Quantity};

    fn make_instrument() -> Instrument {
        let mut instrument = InstrumentSpec::new(
            InstrumentId::new("EUR/USD", "SIM"),
            5,
            0,
            Currency::usd(),
        )
        .build();
        instrument.taker_fee_bps = 0.0;
        instrument
    }

    fn ledger_with_long(qty: f64, px: f64) -> Ledger {
        let mut ledger = Ledger::new(
            &VenueConfig::new("SIM")
                .with_starting_balances(vec![Money::new(100_000.0, Currency::usd())]),
        );
        let fill = Fill {
            order_id: OrderId(1),
            fill_seq: 1,
            ts: 0,
            instrument_id: InstrumentId::new("EUR/USD", "SIM"),
            side: OrderSide::Buy,
            price: Price::new(px, 5),
            quantity: Quantity::new(qty, 0),
            commission: Money::zero(Currency::usd()),
            liquidity: LiquiditySide::Taker,
        };
        ledger.apply_fill(&make_instrument(), &fill, None).unwrap();
        ledger
    }

    #[test]
    fn test_daily_schedule_rolls_to_next_day() {
        let mut schedule = DailyUtcSchedule::at_hour(21);
        // 2024-01-01 12:00:00 UTC -> same day 21:00.
        let noon = 1_704_110_400_000i64;
        let first = schedule.next_after(noon).unwrap();
        assert_eq!(first, 1_704_142_800_000); // 2024-01-01 21:00:00
        // Exactly at the boundary -> next day.
        let second = schedule.next_after(first).unwrap();
        assert_eq!(second, first + 86_400_000);
    }

    #[test]
    fn test_rollover_credits_long_position() {
        let ledger = ledger_with_long(100_000.0, 1.0); // Basis 100,000.00 USD
        let instruments = HashMap::new();
        let mut module = RolloverInterestModule::new(RolloverInterestConfig {
            annual_rates: vec![("EUR/USD".to_string(), 0.0365)],
            day_count: 365,
            ..Default::default()
        });

        let adjustments = module
            .on_trigger(ModuleContext {
                ts: 1_704_142_800_000,
                ledger: &ledger,
                instruments: &instruments,
            })
            .unwrap();

        assert_eq!(adjustments.len(), 1);
        // 3.65% / 365 = 1 bp per day on 100,000 = 10.00 USD credit.
        assert_eq!(adjustments[0].amount, Money::new(10.0, Currency::usd()));
        assert!(adjustments[0].reason.contains("EUR/USD"));
        assert!(adjustments[0].reason.contains("2024-01-01"));
    }

    #[test]
    fn test_rollover_missing_rate_fails_trigger() {
        let ledger = ledger_with_long(1_000.0, 1.0);
        let instruments = HashMap::new();
        let mut module = RolloverInterestModule::new(RolloverInterestConfig::default());

        let err = module
            .on_trigger(ModuleContext {
                ts: 0,
                ledger: &ledger,
                instruments: &instruments,
            })
            .unwrap_err();
        assert!(matches!(err, Error::ModuleAdjustment(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rollover_flat_account_yields_nothing() {
        let ledger = Ledger::new(
            &VenueConfig::new("SIM")
                .with_starting_balances(vec![Money::new(100_000.0, Currency::usd())]),
        );
        let instruments = HashMap::new();
        let mut module = RolloverInterestModule::new(RolloverInterestConfig::default());
        let adjustments = module
            .on_trigger(ModuleContext {
                ts: 0,
                ledger: &ledger,
                instruments: &instruments,
            })
            .unwrap();
        assert!(adjustments.is_empty());
    }
}
