//! Post-run reporting.
//!
//! Read-only snapshots of fills, orders, positions, balance history, and
//! derived performance statistics. Report contents are never mutated after
//! generation; they feed the external report-rendering collaborator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tapesim_core::identifiers::VenueId;
use tapesim_core::orders::{Fill, Order};
use tapesim_core::types::{Money, TimestampMs};

use crate::ledger::{AccountActivity, Position};
use crate::venue::SimulatedVenue;

/// A module adjustment that failed, surfaced for the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedAdjustment {
    pub ts: TimestampMs,
    pub module: String,
    pub reason: String,
}

/// One point on a per-currency equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: TimestampMs,
    pub balance: f64,
    pub drawdown: f64,
}

/// Performance statistics over closed positions, per settlement currency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Number of closed positions.
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Win rate (0-1).
    pub win_rate: f64,
    /// Realized PnL before commissions.
    pub gross_pnl: f64,
    /// Realized PnL after commissions.
    pub net_pnl: f64,
    pub total_commissions: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Gross wins / gross losses.
    pub profit_factor: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    /// Maximum peak-to-trough balance drawdown.
    pub max_drawdown: f64,
}

impl PerformanceMetrics {
    /// Compute metrics from closed positions settling in one currency.
    fn from_closed(closed: &[&Position]) -> Self {
        let mut metrics = Self::default();
        if closed.is_empty() {
            return metrics;
        }
        metrics.total_trades = closed.len() as u32;

        let mut gross_wins = 0.0;
        let mut gross_losses = 0.0;
        let mut total_win = 0.0;
        let mut total_loss = 0.0;
        let mut run_wins = 0u32;
        let mut run_losses = 0u32;

        for position in closed {
            let gross = position.realized_pnl.as_f64();
            let commissions = position.commissions.as_f64();
            let net = gross - commissions;
            metrics.gross_pnl += gross;
            metrics.net_pnl += net;
            metrics.total_commissions += commissions;

            if net > 0.0 {
                metrics.winning_trades += 1;
                total_win += net;
                gross_wins += net;
                metrics.largest_win = metrics.largest_win.max(net);
                run_wins += 1;
                run_losses = 0;
                metrics.max_consecutive_wins = metrics.max_consecutive_wins.max(run_wins);
            } else {
                metrics.losing_trades += 1;
                total_loss += net;
                gross_losses += net.abs();
                metrics.largest_loss = metrics.largest_loss.min(net);
                run_losses += 1;
                run_wins = 0;
                metrics.max_consecutive_losses = metrics.max_consecutive_losses.max(run_losses);
            }
        }

        metrics.win_rate = metrics.winning_trades as f64 / metrics.total_trades as f64;
        metrics.avg_win = if metrics.winning_trades > 0 {
            total_win / metrics.winning_trades as f64
        } else {
            0.0
        };
        metrics.avg_loss = if metrics.losing_trades > 0 {
            total_loss / metrics.losing_trades as f64
        } else {
            0.0
        };
        metrics.profit_factor = if gross_losses > 0.0 {
            gross_wins / gross_losses
        } else if gross_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        metrics
    }
}

/// Build a per-currency equity curve from the balance activity history.
pub fn equity_curve(activity: &[AccountActivity], currency_code: &str) -> Vec<EquityPoint> {
    let mut curve = Vec::new();
    let mut peak = f64::NEG_INFINITY;
    for entry in activity {
        if entry.delta.currency.code != currency_code {
            continue;
        }
        let balance = entry.balance_after.as_f64();
        peak = peak.max(balance);
        curve.push(EquityPoint {
            ts: entry.ts,
            balance,
            drawdown: peak - balance,
        });
    }
    curve
}

/// Per-venue section of the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueReport {
    pub venue: VenueId,
    /// All fills in execution order.
    pub fills: Vec<Fill>,
    /// Final order snapshots (rejections carry their reason), in id order.
    pub orders: Vec<Order>,
    pub open_positions: Vec<Position>,
    pub closed_positions: Vec<Position>,
    /// Final balance per currency code.
    pub balances: BTreeMap<String, Money>,
    /// Full balance mutation history.
    pub activity: Vec<AccountActivity>,
    /// Performance statistics keyed by settlement currency code.
    pub metrics: BTreeMap<String, PerformanceMetrics>,
}

impl VenueReport {
    pub(crate) fn from_venue(venue: &SimulatedVenue) -> Self {
        let ledger = venue.ledger();
        let closed = ledger.closed_positions();

        let mut by_currency: BTreeMap<String, Vec<&Position>> = BTreeMap::new();
        for position in closed {
            by_currency
                .entry(position.realized_pnl.currency.code.clone())
                .or_default()
                .push(position);
        }
        let activity = ledger.activity().to_vec();
        let mut metrics: BTreeMap<String, PerformanceMetrics> = by_currency
            .into_iter()
            .map(|(code, positions)| (code, PerformanceMetrics::from_closed(&positions)))
            .collect();
        for (code, entry) in metrics.iter_mut() {
            entry.max_drawdown = equity_curve(&activity, code)
                .iter()
                .map(|p| p.drawdown)
                .fold(0.0, f64::max);
        }

        Self {
            venue: venue.venue_id().clone(),
            fills: venue.fills().to_vec(),
            orders: venue.orders().cloned().collect(),
            open_positions: ledger.open_positions().cloned().collect(),
            closed_positions: closed.to_vec(),
            balances: ledger.balances().clone(),
            activity,
            metrics,
        }
    }

    /// Maximum drawdown of one currency's balance over the run.
    pub fn max_drawdown(&self, currency_code: &str) -> f64 {
        equity_curve(&self.activity, currency_code)
            .iter()
            .map(|p| p.drawdown)
            .fold(0.0, f64::max)
    }
}

/// Final report for one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// False when the run was halted by a fatal error; the report then
    /// covers only the events applied before the halt.
    pub complete: bool,
    /// True when the run was stopped by a cancellation request.
    pub canceled: bool,
    /// Fatal error context when incomplete.
    pub error: Option<String>,
    pub events_processed: u64,
    pub ts_first: Option<TimestampMs>,
    pub ts_last: Option<TimestampMs>,
    pub venues: Vec<VenueReport>,
    /// Module adjustments that failed (logged, skipped, non-fatal).
    pub rejected_adjustments: Vec<RejectedAdjustment>,
}

impl RunReport {
    /// The report section for one venue.
    pub fn venue(&self, name: &str) -> Option<&VenueReport> {
        self.venues.iter().find(|v| v.venue.0 == name)
    }

    /// All fills across venues, by venue then execution order.
    pub fn fills(&self) -> impl Iterator<Item = &Fill> {
        self.venues.iter().flat_map(|v| v.fills.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapesim_core::identifiers::{InstrumentId, PositionId};
    use tapesim_core::types::Currency;
    use crate::ledger::ActivityReason;

    fn make_closed(net_gross: f64, commissions: f64) -> Position {
        let currency = Currency::usd();
        Position {
            id: PositionId(1),
            instrument_id: InstrumentId::new("EUR/USD", "SIM"),
            net_raw: 0,
            size_precision: 0,
            cost_basis: Money::zero(currency.clone()),
            avg_entry_px: 0.0,
            realized_pnl: Money::new(net_gross, currency.clone()),
            unrealized_pnl: Money::zero(currency.clone()),
            locked_margin: Money::zero(currency.clone()),
            commissions: Money::new(commissions, currency),
            ts_opened: 0,
            ts_last: 0,
            fill_count: 2,
        }
    }

    #[test]
    fn test_metrics_basic_counts() {
        use approx::assert_relative_eq;

        let trades = vec![
            make_closed(100.0, 5.0),
            make_closed(-50.0, 5.0),
            make_closed(75.0, 5.0),
        ];
        let refs: Vec<&Position> = trades.iter().collect();
        let metrics = PerformanceMetrics::from_closed(&refs);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert_relative_eq!(metrics.win_rate, 2.0 / 3.0);
        assert_relative_eq!(metrics.gross_pnl, 125.0);
        assert_relative_eq!(metrics.net_pnl, 110.0);
        assert_relative_eq!(metrics.total_commissions, 15.0);
        assert_relative_eq!(metrics.largest_win, 95.0);
        assert_relative_eq!(metrics.largest_loss, -55.0);
    }

    #[test]
    fn test_report_serializes_for_external_renderers() {
        let report = RunReport {
            complete: true,
            canceled: false,
            error: None,
            events_processed: 2,
            ts_first: Some(1_000),
            ts_last: Some(2_000),
            venues: Vec::new(),
            rejected_adjustments: vec![RejectedAdjustment {
                ts: 1_500,
                module: "fx-rollover-interest".to_string(),
                reason: "no rollover rate configured for EUR/USD".to_string(),
            }],
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert!(back.complete);
        assert_eq!(back.rejected_adjustments.len(), 1);
    }

    #[test]
    fn test_metrics_empty() {
        let metrics = PerformanceMetrics::from_closed(&[]);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.net_pnl, 0.0);
    }

    #[test]
    fn test_consecutive_runs() {
        let trades = vec![
            make_closed(10.0, 0.0),
            make_closed(10.0, 0.0),
            make_closed(10.0, 0.0),
            make_closed(-5.0, 0.0),
            make_closed(-5.0, 0.0),
        ];
        let refs: Vec<&Position> = trades.iter().collect();
        let metrics = PerformanceMetrics::from_closed(&refs);
        assert_eq!(metrics.max_consecutive_wins, 3);
        assert_eq!(metrics.max_consecutive_losses, 2);
    }

    #[test]
    fn test_equity_curve_tracks_drawdown() {
        let currency = Currency::usd();
        let mut activity = Vec::new();
        let mut balance = Money::new(10_000.0, currency.clone());
        for (ts, delta) in [(1, 100.0), (2, -150.0), (3, 200.0)] {
            let delta = Money::new(delta, currency.clone());
            balance = balance + delta.clone();
            activity.push(AccountActivity {
                ts,
                reason: ActivityReason::Adjustment("test".to_string()),
                delta,
                balance_after: balance.clone(),
            });
        }

        let curve = equity_curve(&activity, "USD");
        assert_eq!(curve.len(), 3);
        assert!((curve[0].balance - 10_100.0).abs() < 1e-9);
        assert!((curve[1].drawdown - 150.0).abs() < 1e-9);
        assert!((curve[2].drawdown - 0.0).abs() < 1e-9);
    }
}
