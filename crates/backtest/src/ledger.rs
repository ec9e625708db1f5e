//! Account ledger: balances, positions, and the adjustment audit trail.
//!
//! One ledger per venue, owned exclusively by that venue. Every balance
//! mutation is recorded with its causal event (fill, commission, starting
//! balance, or module adjustment) in an append-only activity history.

use std::collections::{BTreeMap, HashMap};

use tapesim_core::config::{AccountType, OmsType, VenueConfig};
use tapesim_core::error::{Error, Result};
use tapesim_core::identifiers::{InstrumentId, OrderId, PositionId, VenueId};
use tapesim_core::instrument::Instrument;
use tapesim_core::orders::{Fill, OrderSide};
use tapesim_core::types::{Currency, Money, Price, Quantity, TimestampMs};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pro-rate an amount by `part / whole`, rounding half away from zero.
fn pro_rata(amount: &Money, part: i64, whole: i64) -> Money {
    debug_assert!(whole > 0 && part >= 0 && part <= whole);
    let numerator = amount.raw as i128 * part as i128;
    let quotient = numerator / whole as i128;
    let remainder = numerator % whole as i128;
    let raw = if remainder.abs() * 2 >= whole as i128 {
        quotient + numerator.signum()
    } else {
        quotient
    };
    Money::from_raw(raw as i64, amount.currency.clone())
}

/// Why a balance changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActivityReason {
    StartingBalance,
    Fill(OrderId),
    Commission(OrderId),
    Adjustment(String),
}

/// One balance mutation, with the balance line after application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountActivity {
    pub ts: TimestampMs,
    pub reason: ActivityReason,
    pub delta: Money,
    pub balance_after: Money,
}

/// Per-instrument aggregate of net quantity, entry cost, and PnL.
///
/// Mutated exclusively by the ledger upon fill application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub instrument_id: InstrumentId,
    /// Signed net quantity mantissa (positive = long).
    pub net_raw: i64,
    pub size_precision: u8,
    /// Entry notional of the currently open quantity, settlement currency.
    pub cost_basis: Money,
    /// Weighted-average entry price (reporting only; PnL uses `cost_basis`).
    pub avg_entry_px: f64,
    pub realized_pnl: Money,
    pub unrealized_pnl: Money,
    /// Margin locked against this position (margin accounts only).
    pub locked_margin: Money,
    pub commissions: Money,
    pub ts_opened: TimestampMs,
    pub ts_last: TimestampMs,
    pub fill_count: u32,
}

impl Position {
    fn new(
        id: PositionId,
        instrument: &Instrument,
        ts: TimestampMs,
    ) -> Self {
        let currency = instrument.settlement_currency.clone();
        Self {
            id,
            instrument_id: instrument.id.clone(),
            net_raw: 0,
            size_precision: instrument.size_precision,
            cost_basis: Money::zero(currency.clone()),
            avg_entry_px: 0.0,
            realized_pnl: Money::zero(currency.clone()),
            unrealized_pnl: Money::zero(currency.clone()),
            locked_margin: Money::zero(currency.clone()),
            commissions: Money::zero(currency),
            ts_opened: ts,
            ts_last: ts,
            fill_count: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.net_raw == 0
    }

    /// Direction of the open quantity; None when flat.
    pub fn side(&self) -> Option<OrderSide> {
        match self.net_raw.cmp(&0) {
            std::cmp::Ordering::Greater => Some(OrderSide::Buy),
            std::cmp::Ordering::Less => Some(OrderSide::Sell),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Absolute open quantity.
    pub fn net_qty(&self) -> Quantity {
        Quantity::from_raw(self.net_raw.abs(), self.size_precision)
    }

    /// Signed open quantity as f64 (reporting).
    pub fn signed_qty(&self) -> f64 {
        Quantity::from_raw(self.net_raw.abs(), self.size_precision).as_f64()
            * self.net_raw.signum() as f64
    }

    /// Recompute unrealized PnL against a mark price.
    fn mark(&mut self, instrument: &Instrument, price: Price) {
        if self.is_flat() {
            self.unrealized_pnl = Money::zero(self.unrealized_pnl.currency.clone());
            return;
        }
        let mark_notional = instrument.notional(price, self.net_qty());
        self.unrealized_pnl = if self.net_raw > 0 {
            mark_notional - self.cost_basis.clone()
        } else {
            self.cost_basis.clone() - mark_notional
        };
    }

    /// Apply a fill to this position. Returns the realized PnL of any
    /// reduced quantity (zero when purely increasing).
    fn apply(&mut self, instrument: &Instrument, fill: &Fill) -> Money {
        let currency = instrument.settlement_currency.clone();
        let fill_sign = fill.side.sign();
        let mut realized = Money::zero(currency);
        let mut fill_raw = fill.quantity.raw;

        // Reduce the opposing quantity first.
        if self.net_raw != 0 && self.net_raw.signum() != fill_sign {
            let open_abs = self.net_raw.abs();
            let close_raw = fill_raw.min(open_abs);
            let basis_released = pro_rata(&self.cost_basis, close_raw, open_abs);
            let exit_notional = instrument.notional(
                fill.price,
                Quantity::from_raw(close_raw, self.size_precision),
            );
            realized = if self.net_raw > 0 {
                exit_notional - basis_released.clone()
            } else {
                basis_released.clone() - exit_notional
            };
            self.cost_basis = self.cost_basis.clone() - basis_released;
            self.net_raw -= self.net_raw.signum() * close_raw;
            fill_raw -= close_raw;
            self.realized_pnl = self.realized_pnl.clone() + realized.clone();
        }

        // Any remainder opens or extends in the fill's direction.
        if fill_raw > 0 {
            let add_qty = Quantity::from_raw(fill_raw, self.size_precision);
            let add_notional = instrument.notional(fill.price, add_qty);
            if self.net_raw == 0 {
                self.cost_basis = add_notional;
            } else {
                self.cost_basis = self.cost_basis.clone() + add_notional;
            }
            self.net_raw += fill_sign * fill_raw;
        }

        self.avg_entry_px = if self.net_raw == 0 {
            0.0
        } else {
            self.cost_basis.as_f64()
                / (self.net_qty().as_f64() * instrument.multiplier as f64)
        };
        self.commissions = self.commissions.clone() + fill.commission.clone();
        self.fill_count += 1;
        self.ts_last = fill.ts;
        if self.is_flat() {
            self.unrealized_pnl = Money::zero(self.unrealized_pnl.currency.clone());
        }
        realized
    }
}

/// Per-venue account ledger.
pub struct Ledger {
    venue: VenueId,
    account_type: AccountType,
    oms_type: OmsType,
    base_currency: Option<Currency>,
    balances: BTreeMap<String, Money>,
    locked: BTreeMap<String, Money>,
    activity: Vec<AccountActivity>,
    positions: BTreeMap<PositionId, Position>,
    open_by_instrument: HashMap<InstrumentId, Vec<PositionId>>,
    closed: Vec<Position>,
    next_position_id: u64,
}

impl Ledger {
    pub fn new(config: &VenueConfig) -> Self {
        let mut ledger = Self {
            venue: VenueId::new(config.venue.clone()),
            account_type: config.account_type,
            oms_type: config.oms_type,
            base_currency: config.base_currency.clone(),
            balances: BTreeMap::new(),
            locked: BTreeMap::new(),
            activity: Vec::new(),
            positions: BTreeMap::new(),
            open_by_instrument: HashMap::new(),
            closed: Vec::new(),
            next_position_id: 0,
        };
        for balance in &config.starting_balances {
            ledger.credit(0, balance.clone(), ActivityReason::StartingBalance);
        }
        ledger
    }

    pub fn venue(&self) -> &VenueId {
        &self.venue
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn oms_type(&self) -> OmsType {
        self.oms_type
    }

    /// Current balance line for a currency, if open.
    pub fn balance(&self, currency: &Currency) -> Option<&Money> {
        self.balances.get(&currency.code)
    }

    /// Balance minus locked margin for a currency.
    pub fn free_balance(&self, currency: &Currency) -> Money {
        let balance = self
            .balances
            .get(&currency.code)
            .cloned()
            .unwrap_or_else(|| Money::zero(currency.clone()));
        match self.locked.get(&currency.code) {
            Some(locked) => balance - locked.clone(),
            None => balance,
        }
    }

    /// All balance lines, keyed by currency code.
    pub fn balances(&self) -> &BTreeMap<String, Money> {
        &self.balances
    }

    /// Append-only balance mutation history.
    pub fn activity(&self) -> &[AccountActivity] {
        &self.activity
    }

    /// Open positions, in id order.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Open positions for one instrument, in id order.
    pub fn open_positions_for(&self, instrument_id: &InstrumentId) -> Vec<&Position> {
        self.open_by_instrument
            .get(instrument_id)
            .map(|ids| ids.iter().filter_map(|id| self.positions.get(id)).collect())
            .unwrap_or_default()
    }

    /// Closed position records, in close order.
    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    fn credit(&mut self, ts: TimestampMs, delta: Money, reason: ActivityReason) {
        let code = delta.currency.code.clone();
        let line = self
            .balances
            .entry(code)
            .or_insert_with(|| Money::zero(delta.currency.clone()));
        *line = line.clone() + delta.clone();
        self.activity.push(AccountActivity {
            ts,
            reason,
            delta,
            balance_after: line.clone(),
        });
    }

    fn set_locked(&mut self, currency: &Currency, delta: Money) {
        let line = self
            .locked
            .entry(currency.code.clone())
            .or_insert_with(|| Money::zero(currency.clone()));
        *line = line.clone() + delta;
    }

    /// Pre-trade check: can the account support this order?
    ///
    /// Cash accounts require free balance covering the full notional plus
    /// commission on buys, and a covering long position on sells. Margin
    /// accounts require free balance covering initial margin plus commission.
    pub fn check_risk(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        quantity: Quantity,
        price: Price,
    ) -> Result<()> {
        let currency = &instrument.settlement_currency;
        let notional = instrument.notional(price, quantity);
        let commission = instrument.commission(&notional, false);
        let free = self.free_balance(currency);
        match self.account_type {
            AccountType::Cash => match side {
                OrderSide::Buy => {
                    let required = notional + commission;
                    if free < required {
                        return Err(Error::insufficient_balance(format!(
                            "order requires {required}, free balance {free}"
                        )));
                    }
                    Ok(())
                }
                OrderSide::Sell => {
                    let held: i64 = self
                        .open_positions_for(&instrument.id)
                        .iter()
                        .map(|p| p.net_raw.max(0))
                        .sum();
                    if held < quantity.raw {
                        return Err(Error::insufficient_balance(format!(
                            "cash account cannot sell {quantity} with holdings {}",
                            Quantity::from_raw(held, quantity.precision)
                        )));
                    }
                    Ok(())
                }
            },
            AccountType::Margin => {
                let required = instrument.init_margin(&notional) + commission;
                if free < required {
                    return Err(Error::insufficient_balance(format!(
                        "order requires margin {required}, free balance {free}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Resolve the position a fill should apply to, creating one if needed.
    fn target_position(
        &mut self,
        instrument: &Instrument,
        hint: Option<PositionId>,
        ts: TimestampMs,
    ) -> Result<PositionId> {
        match self.oms_type {
            OmsType::Netting => {
                if let Some(ids) = self.open_by_instrument.get(&instrument.id) {
                    if let Some(&id) = ids.first() {
                        return Ok(id);
                    }
                }
                Ok(self.open_position(instrument, ts))
            }
            OmsType::Hedging => match hint {
                Some(id) => {
                    if self.positions.contains_key(&id) {
                        Ok(id)
                    } else {
                        Err(Error::invalid_order(format!(
                            "position {id} not found for hedging fill"
                        )))
                    }
                }
                None => Ok(self.open_position(instrument, ts)),
            },
        }
    }

    fn open_position(&mut self, instrument: &Instrument, ts: TimestampMs) -> PositionId {
        self.next_position_id += 1;
        let id = PositionId(self.next_position_id);
        self.positions.insert(id, Position::new(id, instrument, ts));
        self.open_by_instrument
            .entry(instrument.id.clone())
            .or_default()
            .push(id);
        id
    }

    /// Apply a fill atomically: position, balances, margin, activity.
    ///
    /// Validation happens before any mutation; once committed, every balance
    /// change is recorded against the fill's order id. Returns a snapshot of
    /// the affected position.
    pub fn apply_fill(
        &mut self,
        instrument: &Instrument,
        fill: &Fill,
        position_hint: Option<PositionId>,
    ) -> Result<Position> {
        let currency = instrument.settlement_currency.clone();
        // A fill in a currency with no balance line: multi-currency accounts
        // open the line; single-currency accounts reject the instrument.
        if !self.balances.contains_key(&currency.code) {
            if let Some(base) = &self.base_currency {
                return Err(Error::currency_mismatch(format!(
                    "fill settles in {currency} but account is {base}-denominated"
                )));
            }
            self.balances
                .insert(currency.code.clone(), Money::zero(currency.clone()));
        }

        let position_id = self.target_position(instrument, position_hint, fill.ts)?;
        let mut position = self
            .positions
            .get(&position_id)
            .cloned()
            .expect("target position exists");
        let old_locked = position.locked_margin.clone();
        let realized = position.apply(instrument, fill);

        // Commit: balances first, then position state.
        match self.account_type {
            AccountType::Cash => {
                let notional = instrument.notional(fill.price, fill.quantity);
                let delta = if fill.side == OrderSide::Buy {
                    notional.negated()
                } else {
                    notional
                };
                self.credit(fill.ts, delta, ActivityReason::Fill(fill.order_id));
            }
            AccountType::Margin => {
                if !realized.is_zero() {
                    self.credit(fill.ts, realized, ActivityReason::Fill(fill.order_id));
                }
                let new_locked = if position.is_flat() {
                    Money::zero(currency.clone())
                } else {
                    instrument.init_margin(&position.cost_basis)
                };
                let lock_delta = new_locked.clone() - old_locked;
                position.locked_margin = new_locked;
                self.set_locked(&currency, lock_delta);
            }
        }
        if !fill.commission.is_zero() {
            self.credit(
                fill.ts,
                fill.commission.negated(),
                ActivityReason::Commission(fill.order_id),
            );
        }

        let snapshot = position.clone();
        if position.is_flat() {
            self.positions.remove(&position_id);
            if let Some(ids) = self.open_by_instrument.get_mut(&instrument.id) {
                ids.retain(|id| *id != position_id);
            }
            self.closed.push(position);
        } else {
            self.positions.insert(position_id, position);
        }
        debug!(venue = %self.venue, fill = fill.fill_seq, "fill applied");
        Ok(snapshot)
    }

    /// Sole entry point for simulation-module balance adjustments.
    ///
    /// The adjustment currency must already have a balance line; adjustment
    /// lines are never auto-opened.
    pub fn apply_adjustment(
        &mut self,
        ts: TimestampMs,
        amount: Money,
        reason: impl Into<String>,
    ) -> Result<()> {
        if !self.balances.contains_key(&amount.currency.code) {
            return Err(Error::currency_mismatch(format!(
                "adjustment in {} but account holds no {} balance line",
                amount.currency, amount.currency
            )));
        }
        self.credit(ts, amount, ActivityReason::Adjustment(reason.into()));
        Ok(())
    }

    /// Recompute unrealized PnL for open positions in an instrument.
    pub fn mark(&mut self, instrument: &Instrument, price: Price) {
        if let Some(ids) = self.open_by_instrument.get(&instrument.id) {
            for id in ids {
                if let Some(position) = self.positions.get_mut(id) {
                    position.mark(instrument, price);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapesim_core::config::VenueConfig;
    use tapesim_core::instrument::InstrumentSpec;
    use tapesim_core::orders::LiquiditySide;

    fn make_instrument() -> Instrument {
        let mut instrument = InstrumentSpec::new(
            InstrumentId::new("EUR/USD", "SIM"),
            5,
            0,
            Currency::usd(),
        )
        .build();
        instrument.taker_fee_bps = 0.0;
        instrument.maker_fee_bps = 0.0;
        instrument
    }

    fn make_fill(seq: u64, side: OrderSide, qty: f64, px: f64) -> Fill {
        Fill {
            order_id: OrderId(seq),
            fill_seq: seq,
            ts: seq as i64 * 1_000,
            instrument_id: InstrumentId::new("EUR/USD", "SIM"),
            side,
            price: Price::new(px, 5),
            quantity: Quantity::new(qty, 0),
            commission: Money::zero(Currency::usd()),
            liquidity: LiquiditySide::Taker,
        }
    }

    fn make_margin_ledger() -> Ledger {
        Ledger::new(
            &VenueConfig::new("SIM")
                .with_starting_balances(vec![Money::new(100_000.0, Currency::usd())]),
        )
    }

    #[test]
    fn test_open_and_close_round_trip_pnl() {
        let mut ledger = make_margin_ledger();
        let instrument = make_instrument();

        // Buy 10,000 @ 1.10000, sell 10,000 @ 1.10100 -> +10.00 USD
        ledger
            .apply_fill(&instrument, &make_fill(1, OrderSide::Buy, 10_000.0, 1.10000), None)
            .unwrap();
        let closed = ledger
            .apply_fill(&instrument, &make_fill(2, OrderSide::Sell, 10_000.0, 1.10100), None)
            .unwrap();

        assert!(closed.is_flat());
        assert_eq!(closed.realized_pnl, Money::new(10.0, Currency::usd()));
        assert_eq!(ledger.closed_positions().len(), 1);
        assert_eq!(
            ledger.balance(&Currency::usd()).unwrap(),
            &Money::new(100_010.0, Currency::usd())
        );
        // Margin released on close.
        assert!(ledger.free_balance(&Currency::usd()) == Money::new(100_010.0, Currency::usd()));
    }

    #[test]
    fn test_partial_reduce_weighted_average_cost() {
        let mut ledger = make_margin_ledger();
        let instrument = make_instrument();

        // Build 20,000 at mixed prices: 10k @ 1.0, 10k @ 1.2 -> basis 22,000.
        ledger
            .apply_fill(&instrument, &make_fill(1, OrderSide::Buy, 10_000.0, 1.0), None)
            .unwrap();
        let position = ledger
            .apply_fill(&instrument, &make_fill(2, OrderSide::Buy, 10_000.0, 1.2), None)
            .unwrap();
        assert!((position.avg_entry_px - 1.1).abs() < 1e-9);

        // Sell half at 1.3: realized = (1.3 - 1.1) * 10,000 = 2,000.
        let position = ledger
            .apply_fill(&instrument, &make_fill(3, OrderSide::Sell, 10_000.0, 1.3), None)
            .unwrap();
        assert_eq!(position.realized_pnl, Money::new(2_000.0, Currency::usd()));
        assert_eq!(position.net_qty(), Quantity::new(10_000.0, 0));
        assert_eq!(position.cost_basis, Money::new(11_000.0, Currency::usd()));
    }

    #[test]
    fn test_fill_through_flat_flips_position() {
        let mut ledger = make_margin_ledger();
        let instrument = make_instrument();

        ledger
            .apply_fill(&instrument, &make_fill(1, OrderSide::Buy, 5_000.0, 1.0), None)
            .unwrap();
        // Sell 8,000: closes 5,000 and opens a 3,000 short.
        let position = ledger
            .apply_fill(&instrument, &make_fill(2, OrderSide::Sell, 8_000.0, 1.1), None)
            .unwrap();
        assert_eq!(position.side(), Some(OrderSide::Sell));
        assert_eq!(position.net_qty(), Quantity::new(3_000.0, 0));
        assert_eq!(position.cost_basis, Money::new(3_300.0, Currency::usd()));
        assert_eq!(position.realized_pnl, Money::new(500.0, Currency::usd()));
    }

    #[test]
    fn test_fill_causality_no_unexplained_changes() {
        let mut ledger = make_margin_ledger();
        let instrument = make_instrument();
        let before = ledger.activity().len();

        let mut fill = make_fill(1, OrderSide::Buy, 10_000.0, 1.0);
        fill.commission = Money::new(5.0, Currency::usd());
        ledger.apply_fill(&instrument, &fill, None).unwrap();

        // Exactly one commission entry; opening a margin position realizes
        // nothing, so no fill-PnL entry.
        let entries = &ledger.activity()[before..];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, ActivityReason::Commission(OrderId(1)));
        assert_eq!(entries[0].delta, Money::new(-5.0, Currency::usd()));
        // Every activity entry explains its balance line.
        let mut replayed = Money::zero(Currency::usd());
        for entry in ledger.activity() {
            replayed = replayed + entry.delta.clone();
            assert_eq!(&replayed, &entry.balance_after);
        }
    }

    #[test]
    fn test_cash_account_settles_notional() {
        let mut ledger = Ledger::new(
            &VenueConfig::new("SIM")
                .with_account_type(AccountType::Cash)
                .with_starting_balances(vec![Money::new(50_000.0, Currency::usd())]),
        );
        let instrument = make_instrument();
        ledger
            .apply_fill(&instrument, &make_fill(1, OrderSide::Buy, 10_000.0, 1.0), None)
            .unwrap();
        assert_eq!(
            ledger.balance(&Currency::usd()).unwrap(),
            &Money::new(40_000.0, Currency::usd())
        );
        ledger
            .apply_fill(&instrument, &make_fill(2, OrderSide::Sell, 10_000.0, 1.2), None)
            .unwrap();
        assert_eq!(
            ledger.balance(&Currency::usd()).unwrap(),
            &Money::new(52_000.0, Currency::usd())
        );
    }

    #[test]
    fn test_margin_locked_and_released() {
        let mut ledger = make_margin_ledger();
        let mut instrument = make_instrument();
        instrument.margin_init = 0.10;

        ledger
            .apply_fill(&instrument, &make_fill(1, OrderSide::Buy, 10_000.0, 1.0), None)
            .unwrap();
        // 10% of 10,000 notional locked.
        assert_eq!(
            ledger.free_balance(&Currency::usd()),
            Money::new(99_000.0, Currency::usd())
        );
        ledger
            .apply_fill(&instrument, &make_fill(2, OrderSide::Sell, 10_000.0, 1.0), None)
            .unwrap();
        assert_eq!(
            ledger.free_balance(&Currency::usd()),
            Money::new(100_000.0, Currency::usd())
        );
    }

    #[test]
    fn test_adjustment_requires_open_currency_line() {
        let mut ledger = make_margin_ledger();
        let err = ledger
            .apply_adjustment(1_000, Money::new(10.0, Currency::eur()), "rollover")
            .unwrap_err();
        assert!(matches!(err, Error::CurrencyMismatch(_)));

        ledger
            .apply_adjustment(1_000, Money::new(-12.5, Currency::usd()), "rollover")
            .unwrap();
        assert_eq!(
            ledger.balance(&Currency::usd()).unwrap(),
            &Money::new(99_987.5, Currency::usd())
        );
        let last = ledger.activity().last().unwrap();
        assert_eq!(
            last.reason,
            ActivityReason::Adjustment("rollover".to_string())
        );
    }

    #[test]
    fn test_multi_currency_account_opens_lines_on_fills_only() {
        // No base currency: independent balances per currency, no
        // automatic conversion.
        let mut ledger = Ledger::new(&VenueConfig::new("SIM").multi_currency(vec![
            Money::new(100_000.0, Currency::usd()),
        ]));
        let mut instrument = InstrumentSpec::new(
            InstrumentId::new("EUR/JPY", "SIM"),
            3,
            0,
            Currency::jpy(),
        )
        .build();
        instrument.taker_fee_bps = 0.0;

        // A fill settling in JPY opens the JPY line.
        let fill = Fill {
            order_id: OrderId(1),
            fill_seq: 1,
            ts: 0,
            instrument_id: InstrumentId::new("EUR/JPY", "SIM"),
            side: OrderSide::Sell,
            price: Price::new(160.0, 3),
            quantity: Quantity::new(1_000.0, 0),
            commission: Money::zero(Currency::jpy()),
            liquidity: LiquiditySide::Taker,
        };
        ledger.apply_fill(&instrument, &fill, None).unwrap();
        assert!(ledger.balance(&Currency::jpy()).is_some());
        assert_eq!(
            ledger.balance(&Currency::usd()).unwrap(),
            &Money::new(100_000.0, Currency::usd())
        );

        // Adjustments never open a new line.
        let err = ledger
            .apply_adjustment(1_000, Money::new(1.0, Currency::eur()), "rollover")
            .unwrap_err();
        assert!(matches!(err, Error::CurrencyMismatch(_)));
    }

    #[test]
    fn test_single_currency_account_rejects_foreign_settlement() {
        let mut ledger = make_margin_ledger(); // USD base
        let instrument = InstrumentSpec::new(
            InstrumentId::new("EUR/JPY", "SIM"),
            3,
            0,
            Currency::jpy(),
        )
        .build();
        let fill = Fill {
            order_id: OrderId(1),
            fill_seq: 1,
            ts: 0,
            instrument_id: InstrumentId::new("EUR/JPY", "SIM"),
            side: OrderSide::Buy,
            price: Price::new(160.0, 3),
            quantity: Quantity::new(1_000.0, 0),
            commission: Money::zero(Currency::jpy()),
            liquidity: LiquiditySide::Taker,
        };
        let err = ledger.apply_fill(&instrument, &fill, None).unwrap_err();
        assert!(matches!(err, Error::CurrencyMismatch(_)));
        // Nothing was applied.
        assert!(ledger.open_positions().next().is_none());
        assert_eq!(ledger.activity().len(), 1);
    }

    #[test]
    fn test_hedging_mode_keeps_positions_independent() {
        let mut ledger = Ledger::new(
            &VenueConfig::new("SIM")
                .with_oms_type(OmsType::Hedging)
                .with_starting_balances(vec![Money::new(100_000.0, Currency::usd())]),
        );
        let instrument = make_instrument();

        let first = ledger
            .apply_fill(&instrument, &make_fill(1, OrderSide::Buy, 1_000.0, 1.0), None)
            .unwrap();
        let second = ledger
            .apply_fill(&instrument, &make_fill(2, OrderSide::Buy, 2_000.0, 1.1), None)
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(ledger.open_positions_for(&instrument.id).len(), 2);

        // Close only the first by id.
        let closed = ledger
            .apply_fill(
                &instrument,
                &make_fill(3, OrderSide::Sell, 1_000.0, 1.2),
                Some(first.id),
            )
            .unwrap();
        assert!(closed.is_flat());
        assert_eq!(closed.realized_pnl, Money::new(200.0, Currency::usd()));
        assert_eq!(ledger.open_positions_for(&instrument.id).len(), 1);
    }

    #[test]
    fn test_netting_mode_single_position() {
        let mut ledger = make_margin_ledger();
        let instrument = make_instrument();
        ledger
            .apply_fill(&instrument, &make_fill(1, OrderSide::Buy, 1_000.0, 1.0), None)
            .unwrap();
        ledger
            .apply_fill(&instrument, &make_fill(2, OrderSide::Buy, 2_000.0, 1.0), None)
            .unwrap();
        let open: Vec<_> = ledger.open_positions_for(&instrument.id);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].net_qty(), Quantity::new(3_000.0, 0));
    }

    #[test]
    fn test_risk_check_cash_and_margin() {
        let instrument = make_instrument();
        let cash = Ledger::new(
            &VenueConfig::new("SIM")
                .with_account_type(AccountType::Cash)
                .with_starting_balances(vec![Money::new(5_000.0, Currency::usd())]),
        );
        // 10,000 notional > 5,000 free.
        assert!(cash
            .check_risk(
                &instrument,
                OrderSide::Buy,
                Quantity::new(10_000.0, 0),
                Price::new(1.0, 5)
            )
            .is_err());
        // Cash sells need a covering position.
        assert!(cash
            .check_risk(
                &instrument,
                OrderSide::Sell,
                Quantity::new(1.0, 0),
                Price::new(1.0, 5)
            )
            .is_err());

        let margin = make_margin_ledger();
        // 3% margin on 10,000 notional = 300, well under 100,000.
        assert!(margin
            .check_risk(
                &instrument,
                OrderSide::Buy,
                Quantity::new(10_000.0, 0),
                Price::new(1.0, 5)
            )
            .is_ok());
    }

    #[test]
    fn test_mark_updates_unrealized() {
        let mut ledger = make_margin_ledger();
        let instrument = make_instrument();
        ledger
            .apply_fill(&instrument, &make_fill(1, OrderSide::Buy, 10_000.0, 1.0), None)
            .unwrap();
        ledger.mark(&instrument, Price::new(1.05, 5));
        let position = ledger.open_positions_for(&instrument.id)[0];
        assert_eq!(position.unrealized_pnl, Money::new(500.0, Currency::usd()));
    }
}
