// =============================================================================
// Dispatch — turn a classified Intent into a call against C5/C6/C7 and render
// a human-readable reply
// =============================================================================
//
// Every branch renders the same layout (§4.8 "symbol header, metrics block,
// risk-note footer"): a one-line header naming the asset or subject, a block
// of the relevant numbers, and — for anything that touches live risk — a
// closing note about what rule produced the number.
// =============================================================================

use std::sync::Arc;

use tracing::warn;

use crate::app_state::AppState;
use crate::errors::EngineError;
use crate::llm::prompt::PromptBuilder;
use crate::llm::TaskClass;
use crate::types::{Intent, IntentKind, Side, TradeCause};

pub async fn dispatch(state: &Arc<AppState>, intent: &Intent, raw_text: &str) -> Result<String, EngineError> {
    match intent.kind {
        IntentKind::Buy => trade(state, intent, Side::Long).await,
        IntentKind::Sell => trade(state, intent, Side::Short).await,
        IntentKind::AskAdvice => ask_advice(state, intent).await,
        IntentKind::CheckPosition => check_position(state, intent),
        IntentKind::PortfolioAdjust => portfolio_adjust(state),
        IntentKind::MarketAnalysis => market_analysis(state),
        IntentKind::RunBacktest => run_backtest(state, intent).await,
        IntentKind::Chat => chat(state, raw_text).await,
    }
}

async fn trade(state: &Arc<AppState>, intent: &Intent, side: Side) -> Result<String, EngineError> {
    let Some(asset) = intent.slots.asset.clone() else {
        return Ok(clarify("which asset would you like to trade?"));
    };
    let Some(quantity) = intent.slots.quantity else {
        return Ok(clarify(&format!("how much {asset} would you like to trade?")));
    };

    let price = match intent.slots.price {
        Some(p) => p,
        None => state.market_data.quote(&asset).await?.price,
    };

    let now = chrono::Utc::now();
    match side {
        Side::Long => match state.positions.open(&asset, quantity, price, side, None, now) {
            Ok(pos) => Ok(format!(
                "{asset}\nopened long {quantity} @ {price:.4}\nstop={:.4} target={:.4}\nrisk: position sized and bracketed per the configured stop/target — not an exchange order",
                pos.stop_loss_price, pos.take_profit_price
            )),
            Err(e) => Ok(clarify(&e.user_message())),
        },
        Side::Short => {
            let open_positions = state.positions.query(Some(&asset));
            if let Some(view) = open_positions.into_iter().find(|v| v.position.side == Side::Long) {
                match state.positions.close(&asset, Side::Long, view.position.quantity_remaining, price, TradeCause::User, now) {
                    Ok(pnl) => Ok(format!(
                        "{asset}\nclosed long {} @ {price:.4}\nrealized pnl={pnl:.4}",
                        view.position.quantity_remaining
                    )),
                    Err(e) => Ok(clarify(&e.user_message())),
                }
            } else {
                match state.positions.open(&asset, quantity, price, side, None, now) {
                    Ok(pos) => Ok(format!(
                        "{asset}\nopened short {quantity} @ {price:.4}\nstop={:.4} target={:.4}\nrisk: position sized and bracketed per the configured stop/target — not an exchange order",
                        pos.stop_loss_price, pos.take_profit_price
                    )),
                    Err(e) => Ok(clarify(&e.user_message())),
                }
            }
        }
    }
}

async fn ask_advice(state: &Arc<AppState>, intent: &Intent) -> Result<String, EngineError> {
    let Some(asset) = intent.slots.asset.clone() else {
        return Ok(clarify("which asset would you like advice on?"));
    };

    let recent = state.advice_history.recent(&asset, 1);
    match recent.into_iter().next() {
        Some(advice) => Ok(format!(
            "{asset}\naction={} confidence={:.2} entry={:.4} stop={:.4}\n{}\nsource={:?}",
            advice.action, advice.confidence, advice.entry, advice.stop_loss, advice.reasoning_text, advice.source
        )),
        None => Ok(format!("{asset}\nno advice generated yet — this asset is still being monitored")),
    }
}

fn check_position(state: &Arc<AppState>, intent: &Intent) -> Result<String, EngineError> {
    let views = state.positions.query(intent.slots.asset.as_ref());
    if views.is_empty() {
        return Ok(match &intent.slots.asset {
            Some(asset) => format!("{asset}\nno open position"),
            None => "no open positions".to_string(),
        });
    }

    let mut lines = Vec::new();
    for view in views {
        lines.push(format!(
            "{}\nside={} qty={} entry={:.4} mark={:.4}\nunrealized pnl={:.4} ({:.2}%)\nstop={:.4} target={:.4}",
            view.position.asset,
            view.position.side,
            view.position.quantity_remaining,
            view.position.entry_price,
            view.position.last_mark_price,
            view.unrealized_pnl,
            view.unrealized_pnl_pct,
            view.position.stop_loss_price,
            view.position.take_profit_price,
        ));
    }
    Ok(lines.join("\n---\n"))
}

fn portfolio_adjust(state: &Arc<AppState>) -> Result<String, EngineError> {
    let snapshot = state.positions.portfolio();
    let mut lines = vec![format!(
        "portfolio\nopen={} closed={} win_rate={:.2}\nunrealized={:.4} realized={:.4}",
        snapshot.open_position_count, snapshot.closed_trade_count, snapshot.win_rate,
        snapshot.total_unrealized_pnl, snapshot.total_realized_pnl,
    )];
    for class in &snapshot.by_class {
        lines.push(format!(
            "{}: open={} unrealized={:.4} realized={:.4}",
            class.class, class.open_position_count, class.unrealized_pnl, class.realized_pnl
        ));
    }
    lines.push("rebalancing is manual — this engine reports, it does not optimize allocations".to_string());
    Ok(lines.join("\n"))
}

fn market_analysis(state: &Arc<AppState>) -> Result<String, EngineError> {
    let snapshots = state.asset_snapshots.read();
    if snapshots.is_empty() {
        return Ok("no assets are being monitored yet".to_string());
    }

    let mut lines = vec!["market overview".to_string()];
    for snap in snapshots.values() {
        let anomaly = snap
            .last_anomaly
            .as_ref()
            .map(|a| format!("{} ({})", a.kind, a.severity))
            .unwrap_or_else(|| "none".to_string());
        lines.push(format!(
            "{} price={:.4} rsi14={:?} anomaly={}",
            snap.asset, snap.price, snap.indicators.rsi_standard_14, anomaly
        ));
    }
    Ok(lines.join("\n"))
}

/// Approximate 15-minute bars per calendar day (24h / 15m), used to turn a
/// "last N days" date-range slot into an actual bar count for the window
/// fetched from C1. Capped well under the series-horizon cap any adapter
/// enforces (§3 "the engine never assumes unbounded memory").
const BARS_PER_DAY_M15: usize = 96;
const MAX_BACKTEST_BARS: usize = 5_000;

async fn run_backtest(state: &Arc<AppState>, intent: &Intent) -> Result<String, EngineError> {
    let Some(asset) = intent.slots.asset.clone() else {
        return Ok(clarify("which asset should the backtest run against?"));
    };
    let Some(date_range) = intent.slots.date_range.clone() else {
        return Ok(clarify("what date range should the backtest cover (e.g. \"last 30 days\")?"));
    };
    let Some(strategy_name) = intent.slots.strategy_name.clone() else {
        return Ok(clarify("which strategy should the backtest run (e.g. momentum_reversal)?"));
    };
    let Some(initial_capital) = intent.slots.initial_capital else {
        return Ok(clarify("what initial capital should the backtest start with?"));
    };
    let Some(days) = parse_days_from_range(&date_range) else {
        return Ok(clarify("I can't parse that date range — try something like \"last 30 days\""));
    };

    let strategies = crate::strategies::default_strategies();
    if !strategies.iter().any(|s| s.name == strategy_name) {
        return Ok(clarify(&format!(
            "unknown strategy \"{strategy_name}\" — try one of: intraday_breakout, ma_cross_rsi_filter, momentum_reversal, order_flow_anomaly, news_driven_momentum"
        )));
    }

    let bar_count = (days * BARS_PER_DAY_M15).clamp(30, MAX_BACKTEST_BARS);
    let bars = state
        .market_data
        .series(&asset, crate::types::BarWidth::M15, bar_count)
        .await?;
    if bars.len() < 30 {
        return Ok(format!("{asset}\nnot enough history to backtest yet"));
    }

    let risk = state.runtime_config.read().strategy_params.clone();
    let enabled: std::collections::HashMap<&str, bool> = strategies
        .iter()
        .map(|s| (s.name, s.name == strategy_name))
        .collect();
    let weights = std::collections::HashMap::new();

    let mut signals = Vec::new();
    let mut in_position = false;
    for window_end in 30..bars.len() {
        let window = &bars[..=window_end];
        let snapshot = crate::indicators::snapshot::IndicatorSnapshot::compute(window, None, None, None);
        let decision = crate::strategies::aggregate(&strategies, &enabled, &weights, &snapshot, None, risk.entry_threshold);
        let bar = &bars[window_end];

        match decision.action {
            crate::types::AdviceAction::Buy if !in_position => {
                signals.push(crate::backtest::SignalEvent {
                    at_secs: bar.close_time,
                    asset: asset.clone(),
                    action: crate::backtest::SignalAction::Open(Side::Long),
                    price: bar.close,
                });
                in_position = true;
            }
            crate::types::AdviceAction::Sell if in_position => {
                signals.push(crate::backtest::SignalEvent {
                    at_secs: bar.close_time,
                    asset: asset.clone(),
                    action: crate::backtest::SignalAction::Close,
                    price: bar.close,
                });
                in_position = false;
            }
            _ => {}
        }
    }

    let mut series = std::collections::HashMap::new();
    series.insert(asset.clone(), bars);

    let request = crate::backtest::BacktestRequest {
        initial_capital,
        series,
        signals,
        ..Default::default()
    };

    let report = crate::backtest::run(&request)?;
    Ok(format!(
        "{asset} backtest ({date_range}, {strategy_name}, capital={initial_capital:.2})\nfinal_equity={:.2} return={:.2}% win_rate={:.2}\navg_hold_h={:.1} median_hold_h={:.1} sharpe={:.2} max_drawdown={:.2}%\nexits: stop={} target={} timeout={} signal={} end={}",
        report.final_equity, report.total_return_pct, report.win_rate,
        report.avg_hold_hours, report.median_hold_hours, report.sharpe, report.max_drawdown_pct,
        report.exit_causes.stop_loss, report.exit_causes.take_profit, report.exit_causes.timeout,
        report.exit_causes.signal_close, report.exit_causes.backtest_end,
    ))
}

/// Parse a date-range slot of the "last N days" shape produced by the rule
/// pass (`conversation::rules::extract_date_range`) into a day count.
fn parse_days_from_range(date_range: &str) -> Option<usize> {
    let lower = date_range.to_lowercase();
    let digits: String = lower.chars().skip_while(|c| !c.is_ascii_digit()).take_while(|c| c.is_ascii_digit()).collect();
    if lower.contains("day") {
        digits.parse().ok()
    } else {
        None
    }
}

async fn chat(state: &Arc<AppState>, raw_text: &str) -> Result<String, EngineError> {
    let prompt = PromptBuilder::new("Reply conversationally and briefly to this trading-assistant user message.")
        .with_context("Message", raw_text)
        .build();

    match state.llm_router.route(TaskClass::Lightweight, &prompt).await {
        Ok(response) => Ok(response.text),
        Err(e) => {
            warn!(error = %e, "chat fallback LLM call failed");
            Ok("I can help with buy/sell, position checks, advice, market overview, and backtests.".to_string())
        }
    }
}

fn clarify(question: &str) -> String {
    format!("clarification needed: {question}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clarify_formats_question() {
        assert_eq!(clarify("which asset?"), "clarification needed: which asset?");
    }

    #[test]
    fn parses_last_n_days() {
        assert_eq!(parse_days_from_range("last 30 days"), Some(30));
        assert_eq!(parse_days_from_range("last 7 days"), Some(7));
    }

    #[test]
    fn rejects_non_day_ranges() {
        assert_eq!(parse_days_from_range("last quarter"), None);
    }
}
