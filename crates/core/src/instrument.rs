//! Instrument definitions.
//!
//! An [`Instrument`] is created at configuration time, never mutated, and
//! referenced by [`InstrumentId`] everywhere else.

use crate::identifiers::InstrumentId;
use crate::types::{bps_of, notional, Currency, Money, Price, Quantity};
use serde::{Deserialize, Serialize};

/// Static definition of a tradable instrument and its venue trading rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    /// Decimal precision for prices.
    pub price_precision: u8,
    /// Decimal precision for quantities.
    pub size_precision: u8,
    /// Minimum price increment.
    pub tick_size: Price,
    /// Contract multiplier applied to notional calculations.
    pub multiplier: u32,
    /// Currency positions and notionals settle in.
    pub settlement_currency: Currency,
    /// Initial margin rate (fraction of notional locked on open).
    pub margin_init: f64,
    /// Maintenance margin rate.
    pub margin_maint: f64,
    /// Taker commission in basis points of notional.
    pub taker_fee_bps: f64,
    /// Maker commission in basis points of notional (negative = rebate).
    pub maker_fee_bps: f64,
}

impl Instrument {
    /// A price at this instrument's precision.
    pub fn price(&self, value: f64) -> Price {
        Price::new(value, self.price_precision)
    }

    /// A quantity at this instrument's precision.
    pub fn qty(&self, value: f64) -> Quantity {
        Quantity::new(value, self.size_precision)
    }

    /// Exact notional value of a (price, quantity) pair in the settlement
    /// currency.
    pub fn notional(&self, price: Price, quantity: Quantity) -> Money {
        notional(
            price,
            quantity,
            self.multiplier,
            self.settlement_currency.clone(),
        )
    }

    /// Commission for a fill of the given notional.
    pub fn commission(&self, fill_notional: &Money, maker: bool) -> Money {
        let bps = if maker {
            self.maker_fee_bps
        } else {
            self.taker_fee_bps
        };
        bps_of(fill_notional, bps)
    }

    /// Initial margin required to open the given notional.
    pub fn init_margin(&self, fill_notional: &Money) -> Money {
        bps_of(fill_notional, self.margin_init * 10_000.0)
    }
}

/// Builder-style constructor with sensible defaults for tests and harnesses.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub id: InstrumentId,
    pub price_precision: u8,
    pub size_precision: u8,
    pub settlement_currency: Currency,
}

impl InstrumentSpec {
    pub fn new(id: InstrumentId, price_precision: u8, size_precision: u8, currency: Currency) -> Self {
        Self {
            id,
            price_precision,
            size_precision,
            settlement_currency: currency,
        }
    }

    pub fn build(self) -> Instrument {
        let tick_size = Price::from_raw(1, self.price_precision);
        Instrument {
            id: self.id,
            price_precision: self.price_precision,
            size_precision: self.size_precision,
            tick_size,
            multiplier: 1,
            settlement_currency: self.settlement_currency,
            margin_init: 0.03,
            margin_maint: 0.01,
            taker_fee_bps: 0.5,
            maker_fee_bps: 0.2,
        }
    }
}
