//! Core types and configuration for the tapesim engine.
//!
//! This crate provides shared types used across the workspace:
//! - Fixed-point value types (prices, quantities, money)
//! - Identifiers and instrument definitions
//! - Market events, orders, and fills
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod identifiers;
pub mod instrument;
pub mod orders;
pub mod types;

pub use config::{AccountType, EngineConfig, FillModelConfig, OmsType, VenueConfig};
pub use error::{Error, Result};
pub use events::{Bar, MarketData, MarketEvent, Quote, Trade};
pub use identifiers::{InstrumentId, OrderId, PositionId, Symbol, VenueId};
pub use instrument::{Instrument, InstrumentSpec};
pub use orders::{Fill, LiquiditySide, Order, OrderSide, OrderStatus, OrderType};
pub use types::{Currency, Money, Price, Quantity, TimestampMs};
