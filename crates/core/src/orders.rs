//! Order and fill types.
//!
//! Orders are owned by the venue they are submitted to and mutated only by
//! that venue's matching engine. Fills are immutable, append-only records.

use crate::identifiers::{InstrumentId, OrderId, PositionId};
use crate::types::{Money, Price, Quantity, TimestampMs};
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buy, -1 for sell.
    #[inline]
    pub fn sign(self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    pub fn opposite(self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Initialized,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Whether the order can still trade.
    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Submitted | OrderStatus::PartiallyFilled)
    }

    /// Whether the order has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Initialized) && !self.is_open()
    }
}

/// Which side of the book a fill took liquidity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquiditySide {
    Maker,
    Taker,
}

/// An order as submitted to (and owned by) a simulated venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument_id: InstrumentId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Quantity,
    /// Limit price (required for Limit orders).
    pub price: Option<Price>,
    /// Trigger price (required for Stop orders).
    pub trigger: Option<Price>,
    /// Good-till-date expiry; None = good till canceled.
    pub expire_ts: Option<TimestampMs>,
    /// Target position for Hedging-mode venues; None opens a new position.
    pub position_id: Option<PositionId>,
    pub status: OrderStatus,
    pub filled_qty: Quantity,
    /// Weighted-average fill price over all fills so far.
    pub avg_fill_px: Option<f64>,
    /// Submission sequence within the venue; drives FIFO matching priority.
    pub submit_seq: u64,
    pub ts_last: TimestampMs,
    /// Populated when status is Rejected.
    pub rejection: Option<String>,
}

impl Order {
    /// Build a market order in the Initialized state.
    pub fn market(instrument_id: InstrumentId, side: OrderSide, quantity: Quantity) -> Self {
        Self::init(instrument_id, side, OrderType::Market, quantity, None, None)
    }

    /// Build a limit order in the Initialized state.
    pub fn limit(
        instrument_id: InstrumentId,
        side: OrderSide,
        quantity: Quantity,
        price: Price,
    ) -> Self {
        Self::init(
            instrument_id,
            side,
            OrderType::Limit,
            quantity,
            Some(price),
            None,
        )
    }

    /// Build a stop order in the Initialized state.
    pub fn stop(
        instrument_id: InstrumentId,
        side: OrderSide,
        quantity: Quantity,
        trigger: Price,
    ) -> Self {
        Self::init(
            instrument_id,
            side,
            OrderType::Stop,
            quantity,
            None,
            Some(trigger),
        )
    }

    fn init(
        instrument_id: InstrumentId,
        side: OrderSide,
        order_type: OrderType,
        quantity: Quantity,
        price: Option<Price>,
        trigger: Option<Price>,
    ) -> Self {
        Self {
            id: OrderId(0),
            instrument_id,
            side,
            order_type,
            quantity,
            price,
            trigger,
            expire_ts: None,
            position_id: None,
            status: OrderStatus::Initialized,
            filled_qty: Quantity::zero(quantity.precision),
            avg_fill_px: None,
            submit_seq: 0,
            ts_last: 0,
            rejection: None,
        }
    }

    /// Attach a good-till-date expiry.
    pub fn with_expiry(mut self, expire_ts: TimestampMs) -> Self {
        self.expire_ts = Some(expire_ts);
        self
    }

    /// Target an existing position (Hedging-mode venues).
    pub fn for_position(mut self, position_id: PositionId) -> Self {
        self.position_id = Some(position_id);
        self
    }

    /// Quantity still working.
    pub fn leaves_qty(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled_qty)
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    // -- Lifecycle transitions (matching engine only) ----------------------

    pub fn apply_submitted(&mut self, id: OrderId, submit_seq: u64, ts: TimestampMs) {
        debug_assert_eq!(self.status, OrderStatus::Initialized);
        self.id = id;
        self.submit_seq = submit_seq;
        self.status = OrderStatus::Submitted;
        self.ts_last = ts;
    }

    pub fn apply_rejected(&mut self, reason: impl Into<String>, ts: TimestampMs) {
        self.status = OrderStatus::Rejected;
        self.rejection = Some(reason.into());
        self.ts_last = ts;
    }

    pub fn apply_canceled(&mut self, ts: TimestampMs) {
        debug_assert!(self.status.is_open());
        self.status = OrderStatus::Canceled;
        self.ts_last = ts;
    }

    pub fn apply_expired(&mut self, ts: TimestampMs) {
        debug_assert!(self.status.is_open());
        self.status = OrderStatus::Expired;
        self.ts_last = ts;
    }

    pub fn apply_fill(&mut self, quantity: Quantity, price: Price, ts: TimestampMs) {
        debug_assert!(self.status.is_open());
        let prev_filled = self.filled_qty.as_f64();
        let fill = quantity.as_f64();
        let prev_avg = self.avg_fill_px.unwrap_or(0.0);
        self.avg_fill_px =
            Some((prev_avg * prev_filled + price.as_f64() * fill) / (prev_filled + fill));
        self.filled_qty = self.filled_qty + quantity;
        self.status = if self.leaves_qty().is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.ts_last = ts;
    }
}

/// Immutable record of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    /// Global fill sequence within the run; strictly increasing.
    pub fill_seq: u64,
    pub ts: TimestampMs,
    pub instrument_id: InstrumentId,
    pub side: OrderSide,
    pub price: Price,
    pub quantity: Quantity,
    pub commission: Money,
    pub liquidity: LiquiditySide,
}
