//! Simulated venue: per-venue order matching engine.
//!
//! Consumes market data events and pending orders, produces fills through
//! the fill model, and settles every fill atomically through the venue's
//! ledger. Resting orders are evaluated in submission order (FIFO) so fill
//! ordering is deterministic when several orders are eligible at once.

use std::collections::{BTreeMap, HashMap};

use tapesim_core::config::{EngineConfig, VenueConfig};
use tapesim_core::error::{Error, Result};
use tapesim_core::events::{Bar, MarketData, MarketEvent, Quote};
use tapesim_core::identifiers::{InstrumentId, OrderId, VenueId};
use tapesim_core::instrument::Instrument;
use tapesim_core::orders::{Fill, LiquiditySide, Order, OrderSide, OrderStatus, OrderType};
use tapesim_core::types::{Price, Quantity, TimestampMs};
use tracing::{debug, warn};

use crate::fill::FillModel;
use crate::ledger::{Ledger, Position};

/// Best bid/ask/last state for one instrument.
#[derive(Debug, Clone, Default)]
struct MarketState {
    bid: Option<Price>,
    ask: Option<Price>,
    bid_size: Option<Quantity>,
    ask_size: Option<Quantity>,
    last: Option<Price>,
}

impl MarketState {
    /// Price a buyer takes liquidity at.
    fn buy_price(&self) -> Option<Price> {
        self.ask.or(self.last)
    }

    /// Price a seller takes liquidity at.
    fn sell_price(&self) -> Option<Price> {
        self.bid.or(self.last)
    }

    fn take_price(&self, side: OrderSide) -> Option<Price> {
        match side {
            OrderSide::Buy => self.buy_price(),
            OrderSide::Sell => self.sell_price(),
        }
    }

    /// Displayed size on the side a taker consumes; None when the current
    /// state came from trades/bars (no depth).
    fn displayed(&self, side: OrderSide) -> Option<Quantity> {
        match side {
            OrderSide::Buy => self.ask_size,
            OrderSide::Sell => self.bid_size,
        }
    }
}

/// State changes produced by one venue operation, for dispatch to
/// subscribers.
#[derive(Debug, Default)]
pub struct VenueEvents {
    pub orders: Vec<Order>,
    pub fills: Vec<Fill>,
    pub positions: Vec<Position>,
}

impl VenueEvents {
    fn push_order(&mut self, order: &Order) {
        self.orders.push(order.clone());
    }
}

/// Order matching engine for a single venue.
pub struct SimulatedVenue {
    venue_id: VenueId,
    bypass_risk_checks: bool,
    instruments: HashMap<InstrumentId, Instrument>,
    market: HashMap<InstrumentId, MarketState>,
    orders: BTreeMap<OrderId, Order>,
    /// Open limit/stop orders in submission order.
    resting: Vec<OrderId>,
    ledger: Ledger,
    fill_model: FillModel,
    fills: Vec<Fill>,
    next_order_id: u64,
    next_fill_seq: u64,
}

impl SimulatedVenue {
    /// Create a venue from its config and the engine-level config. The fill
    /// model seed is offset by the venue's registration index so venues draw
    /// independent sequences.
    pub fn new(config: &VenueConfig, engine: &EngineConfig, seed_offset: u64) -> Self {
        Self {
            venue_id: VenueId::new(config.venue.clone()),
            bypass_risk_checks: engine.bypass_risk_checks,
            instruments: HashMap::new(),
            market: HashMap::new(),
            orders: BTreeMap::new(),
            resting: Vec::new(),
            ledger: Ledger::new(config),
            fill_model: FillModel::with_seed_offset(engine.fill_model.clone(), seed_offset),
            fills: Vec::new(),
            next_order_id: 0,
            next_fill_seq: 0,
        }
    }

    pub fn venue_id(&self) -> &VenueId {
        &self.venue_id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn instruments(&self) -> &HashMap<InstrumentId, Instrument> {
        &self.instruments
    }

    /// All fills produced so far, in execution order.
    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    /// Final order snapshots, in id order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Register an instrument. Single-currency accounts reject instruments
    /// settling outside the base currency.
    pub fn add_instrument(&mut self, instrument: Instrument) -> Result<()> {
        if instrument.id.venue != self.venue_id {
            return Err(Error::config(format!(
                "instrument {} does not belong to venue {}",
                instrument.id, self.venue_id
            )));
        }
        if self.ledger.balance(&instrument.settlement_currency).is_none()
            && self.ledger.balances().is_empty()
        {
            return Err(Error::config(format!(
                "venue {} has no starting balances",
                self.venue_id
            )));
        }
        self.market.entry(instrument.id.clone()).or_default();
        self.instruments.insert(instrument.id.clone(), instrument);
        Ok(())
    }

    // -- ORDER ENTRY -----------------------------------------------------

    /// Validate and accept an order. Invalid orders are rejected with an
    /// explicit status and reason; they never enter the book. Market orders
    /// execute immediately against current market state.
    pub fn submit_order(&mut self, mut order: Order, ts: TimestampMs) -> Result<VenueEvents> {
        if order.status != OrderStatus::Initialized {
            return Err(Error::invalid_state(format!(
                "order {} resubmitted in status {:?}",
                order.id, order.status
            )));
        }
        self.next_order_id += 1;
        order.apply_submitted(OrderId(self.next_order_id), self.next_order_id, ts);

        let mut events = VenueEvents::default();
        if let Err(err) = self.validate_order(&order) {
            order.apply_rejected(err.to_string(), ts);
            warn!(venue = %self.venue_id, order = %order.id, %err, "order rejected");
            events.push_order(&order);
            self.orders.insert(order.id, order);
            return Ok(events);
        }

        match order.order_type {
            OrderType::Market => {
                let state = self.market[&order.instrument_id].clone();
                let market_price = state
                    .take_price(order.side)
                    .expect("validated market order has a market price");
                let instrument = self.instruments[&order.instrument_id].clone();
                let decision = self.fill_model.decide_market(
                    order.side,
                    market_price,
                    instrument.tick_size,
                    order.leaves_qty(),
                );
                self.commit_fill(
                    &mut order,
                    &instrument,
                    decision.price,
                    decision.quantity,
                    LiquiditySide::Taker,
                    ts,
                    &mut events,
                );
                events.push_order(&order);
            }
            OrderType::Limit | OrderType::Stop => {
                // Rest the order, then evaluate once against the current
                // market so already-marketable orders fill at submission.
                self.resting.push(order.id);
                events.push_order(&order);
                let id = order.id;
                let instrument_id = order.instrument_id.clone();
                self.orders.insert(id, order);
                self.evaluate_order(id, &instrument_id, ts, &mut events);
                return Ok(events);
            }
        }
        self.orders.insert(order.id, order);
        Ok(events)
    }

    /// Cancel an open order. Explicit status transition, never a silent
    /// drop.
    pub fn cancel_order(&mut self, id: OrderId, ts: TimestampMs) -> Result<VenueEvents> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| Error::invalid_order(format!("unknown order {id}")))?;
        if !order.is_open() {
            return Err(Error::invalid_state(format!(
                "cannot cancel order {id} in status {:?}",
                order.status
            )));
        }
        order.apply_canceled(ts);
        let mut events = VenueEvents::default();
        events.push_order(order);
        self.resting.retain(|r| *r != id);
        Ok(events)
    }

    fn validate_order(&self, order: &Order) -> Result<()> {
        let instrument = self
            .instruments
            .get(&order.instrument_id)
            .ok_or_else(|| {
                Error::invalid_order(format!("unknown instrument {}", order.instrument_id))
            })?;
        if order.quantity.is_zero() {
            return Err(Error::invalid_order("quantity must be positive"));
        }
        if order.quantity.precision != instrument.size_precision {
            return Err(Error::invalid_order(format!(
                "quantity precision {} != instrument size precision {}",
                order.quantity.precision, instrument.size_precision
            )));
        }
        match order.order_type {
            OrderType::Market => {
                if order.price.is_some() || order.trigger.is_some() {
                    return Err(Error::invalid_order(
                        "market orders take no price or trigger",
                    ));
                }
                if self.market[&order.instrument_id]
                    .take_price(order.side)
                    .is_none()
                {
                    return Err(Error::invalid_order(format!(
                        "no market for {}",
                        order.instrument_id
                    )));
                }
            }
            OrderType::Limit => {
                let price = order
                    .price
                    .ok_or_else(|| Error::invalid_order("limit order requires a price"))?;
                if price.precision != instrument.price_precision {
                    return Err(Error::invalid_order(format!(
                        "price precision {} != instrument price precision {}",
                        price.precision, instrument.price_precision
                    )));
                }
            }
            OrderType::Stop => {
                let trigger = order
                    .trigger
                    .ok_or_else(|| Error::invalid_order("stop order requires a trigger"))?;
                if trigger.precision != instrument.price_precision {
                    return Err(Error::invalid_order(format!(
                        "trigger precision {} != instrument price precision {}",
                        trigger.precision, instrument.price_precision
                    )));
                }
            }
        }

        if !self.bypass_risk_checks {
            let est_price = match order.order_type {
                OrderType::Market => self.market[&order.instrument_id]
                    .take_price(order.side)
                    .expect("checked above"),
                OrderType::Limit => order.price.expect("checked above"),
                OrderType::Stop => order.trigger.expect("checked above"),
            };
            self.ledger
                .check_risk(instrument, order.side, order.quantity, est_price)?;
        }
        Ok(())
    }

    // -- DATA PROCESSING -------------------------------------------------

    /// Update market state for the event's instrument and evaluate resting
    /// orders against the new state.
    pub fn on_market_event(&mut self, event: &MarketEvent) -> Result<VenueEvents> {
        let mut events = VenueEvents::default();
        if !self.instruments.contains_key(&event.instrument_id) {
            warn!(venue = %self.venue_id, instrument = %event.instrument_id,
                "event for unregistered instrument ignored");
            return Ok(events);
        }
        self.validate_event(event)?;
        match &event.data {
            MarketData::Quote(quote) => {
                self.apply_quote(&event.instrument_id, quote);
                self.mark_positions(&event.instrument_id);
                self.iterate(&event.instrument_id, event.ts, &mut events);
            }
            MarketData::Trade(trade) => {
                self.set_last(&event.instrument_id, trade.price);
                self.mark_positions(&event.instrument_id);
                self.iterate(&event.instrument_id, event.ts, &mut events);
            }
            MarketData::Bar(bar) => {
                self.process_bar(&event.instrument_id, bar, event.ts, &mut events);
                self.mark_positions(&event.instrument_id);
            }
        }
        Ok(events)
    }

    /// Check event precision against the instrument. A mismatch is corrupt
    /// data and fatal to the run.
    fn validate_event(&self, event: &MarketEvent) -> Result<()> {
        let instrument = &self.instruments[&event.instrument_id];
        let (prices, sizes): (Vec<Price>, Vec<Quantity>) = match &event.data {
            MarketData::Quote(q) => (vec![q.bid, q.ask], vec![q.bid_size, q.ask_size]),
            MarketData::Trade(t) => (vec![t.price], vec![t.size]),
            MarketData::Bar(b) => (vec![b.open, b.high, b.low, b.close], vec![b.volume]),
        };
        for price in prices {
            if price.precision != instrument.price_precision {
                return Err(Error::data(format!(
                    "event at {} for {}: price precision {}, expected {}",
                    event.ts, event.instrument_id, price.precision, instrument.price_precision
                )));
            }
        }
        for size in sizes {
            if size.precision != instrument.size_precision {
                return Err(Error::data(format!(
                    "event at {} for {}: size precision {}, expected {}",
                    event.ts, event.instrument_id, size.precision, instrument.size_precision
                )));
            }
        }
        Ok(())
    }

    fn apply_quote(&mut self, instrument_id: &InstrumentId, quote: &Quote) {
        let state = self.market.get_mut(instrument_id).expect("registered");
        state.bid = Some(quote.bid);
        state.ask = Some(quote.ask);
        state.bid_size = Some(quote.bid_size);
        state.ask_size = Some(quote.ask_size);
    }

    fn set_last(&mut self, instrument_id: &InstrumentId, price: Price) {
        let state = self.market.get_mut(instrument_id).expect("registered");
        state.last = Some(price);
        // A traded price supersedes stale displayed depth.
        state.bid_size = None;
        state.ask_size = None;
    }

    /// Decompose a bar into synthetic last-price updates at open, high, low,
    /// and close, evaluating resting orders after each step so triggers
    /// observe the full bar range.
    fn process_bar(
        &mut self,
        instrument_id: &InstrumentId,
        bar: &Bar,
        ts: TimestampMs,
        events: &mut VenueEvents,
    ) {
        let last = self.market[instrument_id].last;
        if last != Some(bar.open) {
            self.set_last(instrument_id, bar.open);
            self.iterate(instrument_id, ts, events);
        }
        if bar.high > bar.open {
            self.set_last(instrument_id, bar.high);
            self.iterate(instrument_id, ts, events);
        }
        if bar.low < bar.high {
            self.set_last(instrument_id, bar.low);
            self.iterate(instrument_id, ts, events);
        }
        if bar.close != bar.low {
            self.set_last(instrument_id, bar.close);
            self.iterate(instrument_id, ts, events);
        }
    }

    /// Mark open positions at the last trade, falling back to quote mid.
    fn mark_positions(&mut self, instrument_id: &InstrumentId) {
        let state = &self.market[instrument_id];
        let mark = state.last.or(match (state.bid, state.ask) {
            (Some(bid), Some(ask)) => {
                Some(Price::from_raw((bid.raw + ask.raw) * 5, bid.precision + 1))
            }
            _ => None,
        });
        if let Some(price) = mark {
            let instrument = self.instruments[instrument_id].clone();
            self.ledger.mark(&instrument, price);
        }
    }

    /// Evaluate all resting orders for an instrument in submission (FIFO)
    /// order.
    fn iterate(
        &mut self,
        instrument_id: &InstrumentId,
        ts: TimestampMs,
        events: &mut VenueEvents,
    ) {
        let candidates: Vec<OrderId> = self
            .resting
            .iter()
            .copied()
            .filter(|id| {
                self.orders
                    .get(id)
                    .map(|o| &o.instrument_id == instrument_id)
                    .unwrap_or(false)
            })
            .collect();

        for id in candidates {
            self.evaluate_order(id, instrument_id, ts, events);
        }
    }

    /// Evaluate one resting order against the current market state: expiry
    /// first, then fill eligibility.
    fn evaluate_order(
        &mut self,
        id: OrderId,
        instrument_id: &InstrumentId,
        ts: TimestampMs,
        events: &mut VenueEvents,
    ) {
        let mut order = match self.orders.get(&id) {
            Some(order) if order.is_open() => order.clone(),
            _ => return,
        };
        let instrument = self.instruments[instrument_id].clone();
        let state = self.market[instrument_id].clone();

        if let Some(expire_ts) = order.expire_ts {
            if ts >= expire_ts {
                order.apply_expired(ts);
                events.push_order(&order);
                self.orders.insert(id, order);
                self.resting.retain(|r| *r != id);
                return;
            }
        }

        let changed = match order.order_type {
            OrderType::Limit => self.try_fill_limit(&mut order, &instrument, &state, ts, events),
            OrderType::Stop => self.try_fill_stop(&mut order, &instrument, &state, ts, events),
            OrderType::Market => unreachable!("market orders never rest"),
        };

        if changed {
            if !order.is_open() {
                self.resting.retain(|r| *r != id);
            }
            self.orders.insert(id, order);
        }
    }

    /// Limit orders fill once the market reaches their price: with certainty
    /// when traded through, per `prob_fill_on_limit` on a touch. Fills
    /// execute at the limit price and are capped by displayed size when the
    /// current state carries depth.
    fn try_fill_limit(
        &mut self,
        order: &mut Order,
        instrument: &Instrument,
        state: &MarketState,
        ts: TimestampMs,
        events: &mut VenueEvents,
    ) -> bool {
        let limit = order.price.expect("limit order has a price");
        let market = match state.take_price(order.side) {
            Some(price) => price,
            None => return false,
        };
        let reached = match order.side {
            OrderSide::Buy => market <= limit,
            OrderSide::Sell => market >= limit,
        };
        if !reached {
            return false;
        }
        let traded_through = market != limit;
        let mut qty = order.leaves_qty();
        if let Some(displayed) = state.displayed(order.side) {
            if !displayed.is_zero() {
                qty = qty.min(displayed);
            }
        }
        let decision = self.fill_model.decide_limit(limit, traded_through, qty);
        if !decision.fill || decision.quantity.is_zero() {
            return false;
        }
        self.commit_fill(
            order,
            instrument,
            decision.price,
            decision.quantity,
            LiquiditySide::Maker,
            ts,
            events,
        );
        events.push_order(order);
        true
    }

    /// Stop orders trigger once the market reaches the trigger price and
    /// then execute like market orders: the fill price is the worse of the
    /// trigger and the current market (gaps fill at market), plus any
    /// slippage drawn by the model.
    fn try_fill_stop(
        &mut self,
        order: &mut Order,
        instrument: &Instrument,
        state: &MarketState,
        ts: TimestampMs,
        events: &mut VenueEvents,
    ) -> bool {
        let trigger = order.trigger.expect("stop order has a trigger");
        let market = match state.take_price(order.side) {
            Some(price) => price,
            None => return false,
        };
        let (reached, traded_through) = match order.side {
            OrderSide::Buy => (market >= trigger, market > trigger),
            OrderSide::Sell => (market <= trigger, market < trigger),
        };
        if !reached {
            return false;
        }
        let base = match order.side {
            OrderSide::Buy => trigger.max(market),
            OrderSide::Sell => trigger.min(market),
        };
        let decision = self.fill_model.decide_stop(
            order.side,
            base,
            traded_through,
            instrument.tick_size,
            order.leaves_qty(),
        );
        if !decision.fill {
            return false;
        }
        self.commit_fill(
            order,
            instrument,
            decision.price,
            decision.quantity,
            LiquiditySide::Taker,
            ts,
            events,
        );
        events.push_order(order);
        true
    }

    /// Commit one fill atomically: ledger first (validating), then order
    /// state and the fill record. A ledger failure rejects the whole event
    /// and leaves order, position, and account untouched.
    #[allow(clippy::too_many_arguments)]
    fn commit_fill(
        &mut self,
        order: &mut Order,
        instrument: &Instrument,
        price: Price,
        quantity: Quantity,
        liquidity: LiquiditySide,
        ts: TimestampMs,
        events: &mut VenueEvents,
    ) {
        let fill_notional = instrument.notional(price, quantity);
        let commission = instrument.commission(&fill_notional, liquidity == LiquiditySide::Maker);
        let fill = Fill {
            order_id: order.id,
            fill_seq: self.next_fill_seq + 1,
            ts,
            instrument_id: instrument.id.clone(),
            side: order.side,
            price,
            quantity,
            commission,
            liquidity,
        };
        match self.ledger.apply_fill(instrument, &fill, order.position_id) {
            Ok(position) => {
                self.next_fill_seq += 1;
                order.apply_fill(quantity, price, ts);
                debug!(venue = %self.venue_id, order = %order.id, %price, %quantity, "filled");
                self.fills.push(fill.clone());
                events.fills.push(fill);
                events.positions.push(position);
            }
            Err(err) => {
                order.apply_rejected(err.to_string(), ts);
                warn!(venue = %self.venue_id, order = %order.id, %err,
                    "fill rejected by ledger");
                self.resting.retain(|r| *r != order.id);
            }
        }
    }
}
