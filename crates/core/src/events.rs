//! Market events replayed through the engine timeline.

use crate::identifiers::InstrumentId;
use crate::types::{Price, Quantity, TimestampMs};
use serde::{Deserialize, Serialize};

/// A Level 1 quote (best bid/ask with displayed sizes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Price,
    pub ask: Price,
    pub bid_size: Quantity,
    pub ask_size: Quantity,
}

impl Quote {
    /// Mid price, at one extra decimal of precision to stay exact.
    pub fn mid(&self) -> Price {
        Price::from_raw(
            (self.bid.raw + self.ask.raw) * 5,
            self.bid.precision + 1,
        )
    }

    /// Spread in raw price units.
    pub fn spread_raw(&self) -> i64 {
        self.ask.raw - self.bid.raw
    }
}

/// A trade print (last price and size).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub price: Price,
    pub size: Quantity,
}

/// An OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
}

/// Payload of a market event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketData {
    Quote(Quote),
    Trade(Trade),
    Bar(Bar),
}

/// A timestamped market event, immutable once emitted.
///
/// The ordering key is `(ts, seq)`; `seq` is assigned by the clock at
/// emission so ties between streams break deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub ts: TimestampMs,
    /// Arrival sequence assigned by the clock; 0 until emitted.
    pub seq: u64,
    pub instrument_id: InstrumentId,
    pub data: MarketData,
}

impl MarketEvent {
    pub fn quote(ts: TimestampMs, instrument_id: InstrumentId, quote: Quote) -> Self {
        Self {
            ts,
            seq: 0,
            instrument_id,
            data: MarketData::Quote(quote),
        }
    }

    pub fn trade(ts: TimestampMs, instrument_id: InstrumentId, trade: Trade) -> Self {
        Self {
            ts,
            seq: 0,
            instrument_id,
            data: MarketData::Trade(trade),
        }
    }

    pub fn bar(ts: TimestampMs, instrument_id: InstrumentId, bar: Bar) -> Self {
        Self {
            ts,
            seq: 0,
            instrument_id,
            data: MarketData::Bar(bar),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_mid_is_exact() {
        let quote = Quote {
            bid: Price::new(1.10000, 5),
            ask: Price::new(1.10001, 5),
            bid_size: Quantity::new(1_000_000.0, 0),
            ask_size: Quantity::new(1_000_000.0, 0),
        };
        // Mid of 1.10000/1.10001 is 1.100005 at precision 6
        assert_eq!(quote.mid(), Price::new(1.100005, 6));
        assert_eq!(quote.spread_raw(), 1);
    }

    #[test]
    fn test_event_constructors_start_unsequenced() {
        let event = MarketEvent::trade(
            1_000,
            InstrumentId::new("EUR/USD", "SIM"),
            Trade {
                price: Price::new(1.1, 5),
                size: Quantity::new(1.0, 0),
            },
        );
        assert_eq!(event.seq, 0);
        assert_eq!(event.ts, 1_000);
    }
}
