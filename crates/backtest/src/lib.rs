//! Event-driven backtest simulation core.
//!
//! This crate provides:
//! - A deterministic event clock merging market data streams and scheduled
//!   module triggers
//! - Per-venue order matching with a seeded probabilistic fill model
//! - Multi-currency account ledgers with an auditable adjustment trail
//! - Pluggable simulation modules (e.g. FX rollover interest)
//! - A strategy harness and post-run reporting

pub mod clock;
pub mod engine;
pub mod fill;
pub mod ledger;
pub mod logging;
pub mod modules;
pub mod report;
pub mod venue;

pub use clock::{EventClock, MarketStream, TimelineEvent, VecStream};
pub use engine::{BacktestEngine, Strategy, StrategyContext};
pub use fill::{FillDecision, FillModel};
pub use ledger::{AccountActivity, ActivityReason, Ledger, Position};
pub use logging::init_logging;
pub use modules::{Adjustment, ModuleContext, RolloverInterestModule, SimulationModule};
pub use report::{PerformanceMetrics, RunReport, VenueReport};
pub use venue::{SimulatedVenue, VenueEvents};
