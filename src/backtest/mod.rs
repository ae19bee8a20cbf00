// =============================================================================
// Backtest Engine (C7) — replays a signal stream through the live risk rules
// =============================================================================
//
// Reuses `PositionTracker` (C6) verbatim: the only difference between a live
// run and a backtest is where the `open`/`mark`/`close` calls come from — a
// real-time tick loop versus a sorted replay of `SignalEvent`s against a
// historical `Series`. There is exactly one implementation of "what closes
// a position" in this crate; the risk rules (stop/target/timeout/tiers) are
// whatever `RiskConfig` says, unmodified by the replay.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::EngineError;
use crate::market_data::Candle;
use crate::position::PositionTracker;
use crate::runtime_config::RiskConfig;
use crate::types::{Asset, Side, TradeAction, TradeCause, TradeRecord};

/// Convert a replay timestamp (Unix seconds, as carried by `SignalEvent` and
/// `Candle`) into the `DateTime<Utc>` the shared `PositionTracker` expects.
/// This is what lets a backtest that runs in milliseconds of wall-clock time
/// still accumulate simulated hold time and produce `timeout` exits exactly
/// as a live run would (§4.7).
fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

const TRADE_LOG_CAP: usize = 10_000;

/// A single timestamped trading instruction fed into the replay. Entry
/// price is whatever the recorded signal declared; the resulting stop,
/// target, and timeout come from the replay's `RiskConfig`, not the
/// signal, since the tracker computes them from entry at open time.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub at_secs: i64,
    pub asset: Asset,
    pub action: SignalAction,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Open(Side),
    Close,
}

/// Inputs to a single backtest run.
pub struct BacktestRequest {
    pub initial_capital: f64,
    /// Historical bars per asset, sorted ascending by `close_time`.
    pub series: HashMap<Asset, Vec<Candle>>,
    pub signals: Vec<SignalEvent>,
    pub fee_rate_pct: f64,
    pub slippage_pct: f64,
    pub max_position_share: f64,
}

impl Default for BacktestRequest {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            series: HashMap::new(),
            signals: Vec::new(),
            fee_rate_pct: 0.1,
            slippage_pct: 0.1,
            max_position_share: 0.15,
        }
    }
}

/// Counts of exit cause across the run, for the performance report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExitCauseCounts {
    pub stop_loss: u32,
    pub take_profit: u32,
    pub timeout: u32,
    pub signal_close: u32,
    pub backtest_end: u32,
}

/// Performance metrics and a capped trade log produced by a backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub win_rate: f64,
    pub avg_hold_hours: f64,
    pub median_hold_hours: f64,
    pub exit_causes: ExitCauseCounts,
    pub sharpe: f64,
    pub max_drawdown_pct: f64,
    pub trade_log: Vec<TradeRecord>,
    pub dropped_trade_log_entries: u64,
}

/// One point on the merged replay timeline: either a bar closing (drives
/// `mark()`, so stop/target/timeout can fire) or a signal firing (drives
/// `open`/`close`). Ordered by timestamp so the whole series — not just the
/// bars sandwiched between two signals — passes through the tracker exactly
/// once, in the order it actually happened.
enum TimelineEvent<'a> {
    Bar { asset: &'a Asset, price: f64, at_secs: i64 },
    Signal(&'a SignalEvent),
}

impl TimelineEvent<'_> {
    fn at_secs(&self) -> i64 {
        match self {
            TimelineEvent::Bar { at_secs, .. } => *at_secs,
            TimelineEvent::Signal(s) => s.at_secs,
        }
    }

    /// Bars sort before signals at the same timestamp: a risk rule evaluated
    /// against that bar's close takes effect before any action scheduled for
    /// the same instant, mirroring the live pipeline marking a position on
    /// every tick ahead of anything else that tick does (§4.6).
    fn rank(&self) -> u8 {
        match self {
            TimelineEvent::Bar { .. } => 0,
            TimelineEvent::Signal(_) => 1,
        }
    }
}

/// Run a backtest: replay `request.series` and `request.signals` merged into
/// a single time-ordered timeline against the shared `PositionTracker` risk
/// rules, so every bar — not only the ones between two signals — marks open
/// positions and can trigger a stop/target/timeout exit exactly as it would
/// live (§4.7).
pub fn run(request: &BacktestRequest) -> Result<BacktestReport, EngineError> {
    let risk = RiskConfig {
        fee_rate_pct: request.fee_rate_pct,
        slippage_pct: request.slippage_pct,
        max_position_pct: request.max_position_share * 100.0,
        min_gap_between_opens_secs: 0,
        ..RiskConfig::default()
    };
    let tracker = PositionTracker::new(risk);

    let mut timeline: Vec<TimelineEvent> = Vec::new();
    for (asset, bars) in &request.series {
        for bar in bars {
            timeline.push(TimelineEvent::Bar { asset, price: bar.close, at_secs: bar.close_time });
        }
    }
    for signal in &request.signals {
        timeline.push(TimelineEvent::Signal(signal));
    }
    timeline.sort_by_key(|e| (e.at_secs(), e.rank()));

    let mut equity_curve: Vec<f64> = vec![request.initial_capital];
    let mut exit_causes = ExitCauseCounts::default();

    for event in &timeline {
        match event {
            TimelineEvent::Bar { asset, price, at_secs } => {
                let outcome = tracker.mark(*asset, *price, at(*at_secs));
                for close in &outcome.closes {
                    tally_cause(&mut exit_causes, close.cause);
                }
            }
            TimelineEvent::Signal(signal) => {
                let signal_at = at(signal.at_secs);
                match signal.action {
                    SignalAction::Open(side) => {
                        let quantity = position_size(request, signal.price);
                        if quantity <= 0.0 {
                            continue;
                        }
                        let entry_with_slippage = apply_slippage(signal.price, side, request.slippage_pct);
                        let _ = tracker.open(&signal.asset, quantity, entry_with_slippage, side, None, signal_at);
                    }
                    SignalAction::Close => {
                        for view in tracker.query(Some(&signal.asset)) {
                            if view.position.closed {
                                continue;
                            }
                            let exit_price =
                                apply_slippage_exit(signal.price, view.position.side, request.slippage_pct);
                            if tracker
                                .close(
                                    &signal.asset,
                                    view.position.side,
                                    view.position.quantity_remaining,
                                    exit_price,
                                    TradeCause::StrategySignal,
                                    signal_at,
                                )
                                .is_ok()
                            {
                                exit_causes.signal_close += 1;
                            }
                        }
                    }
                }
            }
        }
        equity_curve.push(request.initial_capital + tracker.portfolio().total_realized_pnl);
    }

    // Force-close anything still open at the end of the replay window.
    for (asset, bars) in &request.series {
        let Some(last) = bars.last() else { continue };
        let last_at = at(last.close_time);
        for view in tracker.query(Some(asset)) {
            if view.position.closed {
                continue;
            }
            if tracker
                .close(asset, view.position.side, view.position.quantity_remaining, last.close, TradeCause::BacktestEnd, last_at)
                .is_ok()
            {
                exit_causes.backtest_end += 1;
            }
        }
    }

    let trades = tracker.recent_trades(TRADE_LOG_CAP);
    let closed = tracker.closed_positions(usize::MAX);

    let total_trades = closed.len();
    let wins = closed.iter().filter(|p| p.realized_pnl > 0.0).count();
    let win_rate = if total_trades > 0 { wins as f64 / total_trades as f64 } else { 0.0 };

    let hold_hours = hold_durations_hours(&trades);
    let avg_hold_hours = if hold_hours.is_empty() { 0.0 } else { hold_hours.iter().sum::<f64>() / hold_hours.len() as f64 };
    let median_hold_hours = median(&hold_hours);

    let returns: Vec<f64> = closed.iter().map(|p| p.realized_pnl).collect();
    let sharpe = sharpe_ratio(&returns);
    let max_drawdown_pct = max_drawdown(&equity_curve);

    let portfolio = tracker.portfolio();
    let final_equity = request.initial_capital + portfolio.total_realized_pnl;
    let total_return_pct = if request.initial_capital.abs() > f64::EPSILON {
        (final_equity - request.initial_capital) / request.initial_capital * 100.0
    } else {
        0.0
    };

    let dropped = tracker.dropped_trade_log_entries();
    let trade_log: Vec<TradeRecord> = trades;

    Ok(BacktestReport {
        final_equity,
        total_return_pct,
        win_rate,
        avg_hold_hours,
        median_hold_hours,
        exit_causes,
        sharpe,
        max_drawdown_pct,
        trade_log,
        dropped_trade_log_entries: dropped,
    })
}

fn tally_cause(counts: &mut ExitCauseCounts, cause: TradeCause) {
    match cause {
        TradeCause::StopLoss => counts.stop_loss += 1,
        TradeCause::TakeProfit => counts.take_profit += 1,
        TradeCause::Timeout => counts.timeout += 1,
        TradeCause::StrategySignal => counts.signal_close += 1,
        TradeCause::BacktestEnd => counts.backtest_end += 1,
        TradeCause::User => {}
    }
}

fn position_size(request: &BacktestRequest, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    let capital_share = request.initial_capital * request.max_position_share.clamp(0.0, 1.0);
    capital_share / price
}

fn apply_slippage(price: f64, side: Side, slippage_pct: f64) -> f64 {
    match side {
        Side::Long => price * (1.0 + slippage_pct / 100.0),
        Side::Short => price * (1.0 - slippage_pct / 100.0),
    }
}

fn apply_slippage_exit(price: f64, side: Side, slippage_pct: f64) -> f64 {
    match side {
        Side::Long => price * (1.0 - slippage_pct / 100.0),
        Side::Short => price * (1.0 + slippage_pct / 100.0),
    }
}

/// Pair each position's `open` trade record with its final `close` record
/// (newest-first log, so the first close seen per position is the final
/// one) to compute a holding duration in hours.
fn hold_durations_hours(trades: &[TradeRecord]) -> Vec<f64> {
    let mut opens: HashMap<String, String> = HashMap::new();
    let mut closes: HashMap<String, String> = HashMap::new();
    for record in trades {
        match record.action {
            TradeAction::Open => {
                opens.insert(record.position_id.clone(), record.timestamp.clone());
            }
            TradeAction::Close => {
                closes.entry(record.position_id.clone()).or_insert_with(|| record.timestamp.clone());
            }
            TradeAction::PartialClose => {}
        }
    }

    opens
        .iter()
        .filter_map(|(id, open_ts)| {
            let close_ts = closes.get(id)?;
            let open_t = chrono::DateTime::parse_from_rfc3339(open_ts).ok()?;
            let close_t = chrono::DateTime::parse_from_rfc3339(close_ts).ok()?;
            Some((close_t - open_t).num_seconds() as f64 / 3600.0)
        })
        .collect()
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stdev = variance.sqrt();
    if stdev <= f64::EPSILON {
        return 0.0;
    }
    mean / stdev
}

fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close_time: i64, close: f64) -> Candle {
        Candle {
            open_time: close_time - 60,
            close_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
            quote_volume: 0.0,
            trades_count: 1,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }

    #[test]
    fn drop_matching_scenario_closes_with_stop_loss() {
        let asset = Asset::crypto("BTCUSDT");
        let mut bars = vec![candle(0, 100.0)];
        for (i, price) in [99.0, 95.0, 92.0, 88.0].iter().enumerate() {
            bars.push(candle((i as i64 + 1) * 60, *price));
        }
        let mut series = HashMap::new();
        series.insert(asset.clone(), bars);

        let request = BacktestRequest {
            initial_capital: 10_000.0,
            series,
            signals: vec![SignalEvent {
                at_secs: -1,
                asset: asset.clone(),
                action: SignalAction::Open(Side::Long),
                price: 100.0,
            }],
            fee_rate_pct: 0.0,
            slippage_pct: 0.0,
            ..Default::default()
        };

        let report = run(&request).unwrap();
        assert_eq!(report.exit_causes.stop_loss, 1);
        assert!(report.total_return_pct < 0.0);
    }

    // Scenario 6 (§8): backtest/live risk-rule equivalence for the timeout
    // cause specifically. A whole replay runs in milliseconds of wall-clock
    // time, so `ExitCauseCounts::timeout` can only ever be nonzero if the
    // hold-time check is driven by the replayed bar timestamps rather than
    // `Utc::now()`.
    #[test]
    fn flat_price_beyond_max_hold_hours_times_out() {
        let asset = Asset::crypto("BTCUSDT");
        let mut bars = Vec::new();
        for hour in 0..12 {
            bars.push(candle(hour * 3600, 100.5));
        }
        let mut series = HashMap::new();
        series.insert(asset.clone(), bars);

        let request = BacktestRequest {
            initial_capital: 10_000.0,
            series,
            signals: vec![SignalEvent {
                at_secs: -1,
                asset: asset.clone(),
                action: SignalAction::Open(Side::Long),
                price: 100.0,
            }],
            fee_rate_pct: 0.0,
            slippage_pct: 0.0,
            ..Default::default()
        };

        let report = run(&request).unwrap();
        assert_eq!(report.exit_causes.timeout, 1);
        assert_eq!(report.exit_causes.stop_loss, 0);
        assert_eq!(report.exit_causes.take_profit, 0);
    }

    #[test]
    fn trade_log_is_capped() {
        let report = run(&BacktestRequest::default()).unwrap();
        assert!(report.trade_log.len() <= TRADE_LOG_CAP);
    }

    #[test]
    fn empty_backtest_is_a_noop() {
        let report = run(&BacktestRequest::default()).unwrap();
        assert_eq!(report.final_equity, 10_000.0);
        assert_eq!(report.total_return_pct, 0.0);
    }
}
