//! Backtest engine: run orchestration and the strategy harness.
//!
//! An engine instance is explicitly constructed with no global state;
//! multiple engines may coexist in one process for parallel backtest
//! sweeps, each single-threaded internally. The run loop is cooperative:
//! one timeline event is dispatched at a time, and cancellation takes
//! effect only between dispatch steps, never mid-fill.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tapesim_core::config::{EngineConfig, VenueConfig};
use tapesim_core::error::{Error, Result};
use tapesim_core::events::{Bar, MarketData, MarketEvent, Quote};
use tapesim_core::identifiers::{OrderId, VenueId};
use tapesim_core::instrument::Instrument;
use tapesim_core::orders::Order;
use tapesim_core::types::TimestampMs;
use tracing::{debug, info, warn};

use crate::clock::{EventClock, MarketStream, ScheduleId, TimelineEvent, VecStream};
use crate::ledger::Position;
use crate::modules::{ModuleContext, SimulationModule};
use crate::report::{RejectedAdjustment, RunReport, VenueReport};
use crate::venue::{SimulatedVenue, VenueEvents};

/// Order intents a strategy can emit during a callback. Commands are
/// collected and drained deterministically after the callback returns.
enum Command {
    Submit(Order),
    Cancel { venue: VenueId, id: OrderId },
}

/// Handle passed to strategy callbacks for order submission and run
/// control.
pub struct StrategyContext {
    now: TimestampMs,
    commands: Vec<Command>,
    stop: bool,
}

impl StrategyContext {
    fn new(now: TimestampMs) -> Self {
        Self {
            now,
            commands: Vec::new(),
            stop: false,
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> TimestampMs {
        self.now
    }

    /// Queue an order for submission to its instrument's venue.
    pub fn submit_order(&mut self, order: Order) {
        self.commands.push(Command::Submit(order));
    }

    /// Queue a cancel for an open order.
    pub fn cancel_order(&mut self, order: &Order) {
        self.commands.push(Command::Cancel {
            venue: order.instrument_id.venue.clone(),
            id: order.id,
        });
    }

    /// Request the run to stop after the current dispatch step.
    pub fn stop(&mut self) {
        self.stop = true;
    }
}

/// A trading strategy attached to the engine.
///
/// The capability set is fixed: market-data hooks plus order and position
/// update hooks. All callbacks run synchronously within the event-dispatch
/// step that caused them.
#[allow(unused_variables)]
pub trait Strategy {
    /// Called once before the first timeline event.
    fn on_start(&mut self, ctx: &mut StrategyContext) {}

    fn on_quote(&mut self, ctx: &mut StrategyContext, event: &MarketEvent, quote: &Quote) {}

    fn on_bar(&mut self, ctx: &mut StrategyContext, event: &MarketEvent, bar: &Bar) {}

    fn on_order_update(&mut self, ctx: &mut StrategyContext, order: &Order) {}

    fn on_position_update(&mut self, ctx: &mut StrategyContext, position: &Position) {}
}

struct ModuleEntry {
    venue: VenueId,
    module: Box<dyn SimulationModule>,
    schedule: ScheduleId,
}

/// Event-driven backtest engine.
pub struct BacktestEngine {
    config: EngineConfig,
    clock: EventClock,
    venues: BTreeMap<VenueId, SimulatedVenue>,
    modules: Vec<ModuleEntry>,
    strategies: Vec<Box<dyn Strategy>>,
    cancel: Arc<AtomicBool>,
    rejected_adjustments: Vec<RejectedAdjustment>,
    events_processed: u64,
    ts_first: Option<TimestampMs>,
    ts_last: Option<TimestampMs>,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        crate::logging::init_logging(&config.log_level);
        Ok(Self {
            config,
            clock: EventClock::new(),
            venues: BTreeMap::new(),
            modules: Vec::new(),
            strategies: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            rejected_adjustments: Vec::new(),
            events_processed: 0,
            ts_first: None,
            ts_last: None,
        })
    }

    /// Handle for requesting cancellation from outside the run loop. The
    /// run stops between event-dispatch steps, leaving the ledgers at the
    /// last fully-applied event.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Add a simulated venue.
    pub fn add_venue(&mut self, config: VenueConfig) -> Result<()> {
        let venue_id = VenueId::new(config.venue.clone());
        if self.venues.contains_key(&venue_id) {
            return Err(Error::config(format!("venue {venue_id} already exists")));
        }
        let seed_offset = self.venues.len() as u64;
        self.venues.insert(
            venue_id,
            SimulatedVenue::new(&config, &self.config, seed_offset),
        );
        Ok(())
    }

    /// Register an instrument with its venue.
    pub fn add_instrument(&mut self, instrument: Instrument) -> Result<()> {
        let venue = self
            .venues
            .get_mut(&instrument.id.venue)
            .ok_or_else(|| Error::config(format!("unknown venue {}", instrument.id.venue)))?;
        venue.add_instrument(instrument)
    }

    /// Register a market data stream. Fails once the run has started.
    pub fn add_stream(&mut self, stream: Box<dyn MarketStream>) -> Result<()> {
        self.clock.register_stream(stream)
    }

    /// Register an in-memory event vector as a stream.
    pub fn add_events(&mut self, events: Vec<MarketEvent>) -> Result<()> {
        self.add_stream(Box::new(VecStream::new(events)))
    }

    /// Attach a simulation module to a venue's ledger. Its schedule is
    /// registered with the clock; the clock guarantees at-most-once
    /// delivery per trigger instance.
    pub fn add_module(
        &mut self,
        venue: impl Into<String>,
        module: Box<dyn SimulationModule>,
    ) -> Result<()> {
        let venue = VenueId::new(venue);
        if !self.venues.contains_key(&venue) {
            return Err(Error::config(format!("unknown venue {venue}")));
        }
        let schedule = self.clock.register_schedule(module.schedule())?;
        self.modules.push(ModuleEntry {
            venue,
            module,
            schedule,
        });
        Ok(())
    }

    /// Attach a strategy.
    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    pub fn venue(&self, name: &str) -> Option<&SimulatedVenue> {
        self.venues.get(&VenueId::new(name))
    }

    /// Submit an order directly (outside a strategy callback). Returns the
    /// order snapshot after submission; rejections carry their reason.
    pub fn submit_order(&mut self, order: Order) -> Result<Order> {
        let ts = self.clock.now().unwrap_or(0);
        let venue = self
            .venues
            .get_mut(&order.instrument_id.venue)
            .ok_or_else(|| Error::config(format!("unknown venue {}", order.instrument_id.venue)))?;
        let events = venue.submit_order(order, ts)?;
        Ok(events.orders.into_iter().last().expect("order snapshot"))
    }

    /// Cancel an open order directly.
    pub fn cancel_order(&mut self, venue: &str, id: OrderId) -> Result<Order> {
        let ts = self.clock.now().unwrap_or(0);
        let venue = self
            .venues
            .get_mut(&VenueId::new(venue))
            .ok_or_else(|| Error::config(format!("unknown venue {venue:?}")))?;
        let events = venue.cancel_order(id, ts)?;
        Ok(events.orders.into_iter().next().expect("order snapshot"))
    }

    /// Replay the timeline to exhaustion and build the final report.
    ///
    /// Fatal data-integrity errors halt the run; the returned report is
    /// then marked incomplete and covers only the fully-applied events.
    pub fn run(&mut self) -> RunReport {
        info!(venues = self.venues.len(), strategies = self.strategies.len(), "run starting");
        let mut strategies = std::mem::take(&mut self.strategies);
        let mut fatal: Option<Error> = None;

        // Startup callbacks may queue initial orders.
        let mut ctx = StrategyContext::new(self.clock.now().unwrap_or(0));
        for strategy in strategies.iter_mut() {
            strategy.on_start(&mut ctx);
        }
        self.drain_commands(&mut strategies, &mut ctx);

        let canceled = loop {
            if self.cancel.load(Ordering::Relaxed) {
                info!("cancellation requested, stopping between dispatch steps");
                break true;
            }
            let event = match self.clock.advance() {
                Ok(Some(event)) => event,
                Ok(None) => break false,
                Err(err) => {
                    fatal = Some(err);
                    break false;
                }
            };
            if let Err(err) = self.dispatch(event, &mut strategies) {
                if err.is_fatal() {
                    fatal = Some(err);
                    break false;
                }
                warn!(%err, "non-fatal dispatch error");
            }
        };

        self.strategies = strategies;
        if let Some(err) = &fatal {
            warn!(%err, "run halted by fatal error");
        } else {
            info!(events = self.events_processed, "run finished");
        }
        self.build_report(fatal, canceled)
    }

    fn dispatch(&mut self, event: TimelineEvent, strategies: &mut [Box<dyn Strategy>]) -> Result<()> {
        match event {
            TimelineEvent::Market(event) => self.dispatch_market(event, strategies),
            TimelineEvent::Trigger { schedule, ts } => {
                self.ts_last = Some(ts);
                self.dispatch_trigger(schedule, ts)
            }
        }
    }

    fn dispatch_market(
        &mut self,
        event: MarketEvent,
        strategies: &mut [Box<dyn Strategy>],
    ) -> Result<()> {
        self.events_processed += 1;
        self.ts_first.get_or_insert(event.ts);
        self.ts_last = Some(event.ts);

        // Venue first: strategies observe post-match state.
        let venue_events = match self.venues.get_mut(&event.instrument_id.venue) {
            Some(venue) => venue.on_market_event(&event)?,
            None => {
                warn!(instrument = %event.instrument_id, "event for unknown venue ignored");
                return Ok(());
            }
        };

        let mut ctx = StrategyContext::new(event.ts);
        for strategy in strategies.iter_mut() {
            match &event.data {
                MarketData::Quote(quote) => strategy.on_quote(&mut ctx, &event, quote),
                MarketData::Bar(bar) => strategy.on_bar(&mut ctx, &event, bar),
                MarketData::Trade(_) => {}
            }
        }
        Self::dispatch_updates(&venue_events, strategies, &mut ctx);
        self.drain_commands(strategies, &mut ctx);
        Ok(())
    }

    fn dispatch_trigger(&mut self, schedule: ScheduleId, ts: TimestampMs) -> Result<()> {
        let entry = self
            .modules
            .iter_mut()
            .find(|entry| entry.schedule == schedule)
            .expect("trigger for registered schedule");
        let venue = self
            .venues
            .get_mut(&entry.venue)
            .expect("module venue exists");

        let adjustments = {
            let ctx = ModuleContext {
                ts,
                ledger: venue.ledger(),
                instruments: venue.instruments(),
            };
            entry.module.on_trigger(ctx)
        };
        match adjustments {
            Ok(adjustments) => {
                for adjustment in adjustments {
                    if let Err(err) = venue.ledger_mut().apply_adjustment(
                        ts,
                        adjustment.amount,
                        adjustment.reason.clone(),
                    ) {
                        warn!(module = entry.module.name(), %err, "adjustment rejected");
                        self.rejected_adjustments.push(RejectedAdjustment {
                            ts,
                            module: entry.module.name().to_string(),
                            reason: err.to_string(),
                        });
                    } else {
                        debug!(module = entry.module.name(), reason = %adjustment.reason,
                            "adjustment applied");
                    }
                }
            }
            Err(err) => {
                // Module failures are logged and surfaced, never fatal.
                warn!(module = entry.module.name(), %err, "module trigger failed");
                self.rejected_adjustments.push(RejectedAdjustment {
                    ts,
                    module: entry.module.name().to_string(),
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    fn dispatch_updates(
        events: &VenueEvents,
        strategies: &mut [Box<dyn Strategy>],
        ctx: &mut StrategyContext,
    ) {
        for order in &events.orders {
            for strategy in strategies.iter_mut() {
                strategy.on_order_update(ctx, order);
            }
        }
        for position in &events.positions {
            for strategy in strategies.iter_mut() {
                strategy.on_position_update(ctx, position);
            }
        }
    }

    /// Apply queued strategy commands; updates they produce are dispatched
    /// back, and any further commands drain in the same step.
    fn drain_commands(&mut self, strategies: &mut [Box<dyn Strategy>], ctx: &mut StrategyContext) {
        loop {
            if ctx.stop {
                self.cancel.store(true, Ordering::Relaxed);
            }
            let commands = std::mem::take(&mut ctx.commands);
            if commands.is_empty() {
                break;
            }
            for command in commands {
                let result = match command {
                    Command::Submit(order) => {
                        match self.venues.get_mut(&order.instrument_id.venue) {
                            Some(venue) => venue.submit_order(order, ctx.now),
                            None => {
                                warn!(instrument = %order.instrument_id,
                                    "order for unknown venue dropped");
                                continue;
                            }
                        }
                    }
                    Command::Cancel { venue, id } => {
                        match self.venues.get_mut(&venue) {
                            Some(venue) => venue.cancel_order(id, ctx.now),
                            None => continue,
                        }
                    }
                };
                match result {
                    Ok(events) => Self::dispatch_updates(&events, strategies, ctx),
                    Err(err) => warn!(%err, "strategy command failed"),
                }
            }
        }
    }

    fn build_report(&self, fatal: Option<Error>, canceled: bool) -> RunReport {
        RunReport {
            complete: fatal.is_none() && !canceled,
            canceled,
            error: fatal.map(|e| e.to_string()),
            events_processed: self.events_processed,
            ts_first: self.ts_first,
            ts_last: self.ts_last,
            venues: self.venues.values().map(VenueReport::from_venue).collect(),
            rejected_adjustments: self.rejected_adjustments.clone(),
        }
    }
}
