//! Probabilistic fill model.
//!
//! Decides whether a triggered order fills and with how much slippage. All
//! randomness comes from a generator seeded from the run configuration, so
//! the same seed reproduces identical fill sequences across runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tapesim_core::config::FillModelConfig;
use tapesim_core::orders::OrderSide;
use tapesim_core::types::{Price, Quantity};

/// Outcome of a fill-model decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillDecision {
    /// Whether the order fills at all.
    pub fill: bool,
    /// Execution price, slippage included.
    pub price: Price,
    /// Quantity to execute.
    pub quantity: Quantity,
    /// Ticks of slippage applied against the order.
    pub slippage_ticks: u32,
}

impl FillDecision {
    fn no_fill(price: Price, precision: u8) -> Self {
        Self {
            fill: false,
            price,
            quantity: Quantity::zero(precision),
            slippage_ticks: 0,
        }
    }
}

/// Fill model with seeded deterministic randomness.
pub struct FillModel {
    config: FillModelConfig,
    rng: StdRng,
}

impl FillModel {
    /// Create a fill model seeded from its configuration.
    pub fn new(config: FillModelConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    /// Create a fill model with the configured seed offset by `offset`, so
    /// sibling components (one per venue) draw independent sequences.
    pub fn with_seed_offset(config: FillModelConfig, offset: u64) -> Self {
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(offset));
        Self { config, rng }
    }

    fn draw(&mut self, probability: f64) -> bool {
        if probability >= 1.0 {
            return true;
        }
        if probability <= 0.0 {
            return false;
        }
        self.rng.gen::<f64>() < probability
    }

    fn slip_ticks(&mut self) -> u32 {
        if self.draw(self.config.prob_slippage) {
            self.config.slippage_ticks
        } else {
            0
        }
    }

    /// Decide a market-order execution. Market orders always fill but may
    /// slip against the order by the configured tick count.
    pub fn decide_market(
        &mut self,
        side: OrderSide,
        market_price: Price,
        tick: Price,
        quantity: Quantity,
    ) -> FillDecision {
        let ticks = self.slip_ticks();
        let price = market_price.offset_ticks(side.sign() * ticks as i64, tick);
        FillDecision {
            fill: true,
            price,
            quantity,
            slippage_ticks: ticks,
        }
    }

    /// Decide a limit-order execution once the market has reached its price.
    ///
    /// `traded_through` means the market moved past the limit price, which
    /// fills with certainty; a touch fills per `prob_fill_on_limit`. Limit
    /// fills execute at the limit price with no slippage.
    pub fn decide_limit(
        &mut self,
        limit_price: Price,
        traded_through: bool,
        quantity: Quantity,
    ) -> FillDecision {
        if traded_through || self.draw(self.config.prob_fill_on_limit) {
            FillDecision {
                fill: true,
                price: limit_price,
                quantity,
                slippage_ticks: 0,
            }
        } else {
            FillDecision::no_fill(limit_price, quantity.precision)
        }
    }

    /// Decide a stop-order execution once the market has reached its
    /// trigger. A touch fills per `prob_fill_on_stop`; trading through fills
    /// with certainty. The stop executes like a market order from the
    /// trigger price and may slip further against the order.
    pub fn decide_stop(
        &mut self,
        side: OrderSide,
        trigger_price: Price,
        traded_through: bool,
        tick: Price,
        quantity: Quantity,
    ) -> FillDecision {
        if traded_through || self.draw(self.config.prob_fill_on_stop) {
            let ticks = self.slip_ticks();
            let price = trigger_price.offset_ticks(side.sign() * ticks as i64, tick);
            FillDecision {
                fill: true,
                price,
                quantity,
                slippage_ticks: ticks,
            }
        } else {
            FillDecision::no_fill(trigger_price, quantity.precision)
        }
    }
}
