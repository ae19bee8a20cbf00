// =============================================================================
// Analysis Pipeline (C5) — orchestrates C1 -> C2 -> C3, escalates to C4
// =============================================================================
//
// One long-lived task per monitored asset per enabled cadence mode, owned
// and restarted by the Supervisor (C9). Each task owns its own series tail
// exclusively (§5 "Series tails are per-asset ... no cross-asset sharing")
// and runs strictly serially: a tick that overruns delays, never overlaps,
// the next tick for that asset.
// =============================================================================

pub mod advice_history;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::errors::EngineError;
use crate::indicators::snapshot::IndicatorSnapshot;
use crate::llm::prompt::PromptBuilder;
use crate::llm::TaskClass;
use crate::strategies::{self, AggregateDecision};
use crate::types::{
    Advice, AdviceAction, AdviceSource, AnalysisMode, AnomalyEvent, Asset, BarWidth, Severity,
};

pub use advice_history::AdviceHistory;

/// Series length kept in memory per asset for indicator computation. The
/// engine never assumes unbounded history (§3 Series).
const SERIES_WINDOW: usize = 120;

/// A single tick's fully computed view of an asset, cached for the
/// operator-facing API. Written only by the owning pipeline task; reads are
/// lock-free snapshots (§5 Shared resources).
#[derive(Debug, Clone, serde::Serialize)]
pub struct AssetSnapshot {
    pub asset: Asset,
    pub price: f64,
    pub currency: String,
    pub source_adapter: String,
    pub stale: bool,
    pub indicators: IndicatorSnapshot,
    pub last_anomaly: Option<AnomalyEvent>,
    pub updated_at: String,
}

fn bar_width_for(mode: AnalysisMode) -> BarWidth {
    match mode {
        AnalysisMode::ShortTerm => BarWidth::M1,
        AnalysisMode::LongTerm => BarWidth::M15,
    }
}

/// Decide the task class for this tick per §4.4 selection rules: anomaly
/// severity >= critical, a >=5% move over the fetched window, or an
/// explicit market-overview request all auto-upgrade `Standard` to
/// `Complex`. Aggregated news-relevance count is part of the upstream
/// design but this engine carries no news/RSS ingestion (explicitly out of
/// scope, §1); the count is therefore always treated as below threshold.
pub fn task_class_for(anomaly: Option<&AnomalyEvent>, window_change_pct: f64, market_overview: bool) -> TaskClass {
    let mut class = TaskClass::Standard;
    if matches!(anomaly, Some(a) if a.severity >= Severity::Critical) {
        class = class.upgraded();
    }
    if window_change_pct.abs() >= 5.0 {
        class = class.upgraded();
    }
    if market_overview {
        class = class.upgraded();
    }
    class
}

/// Structured body an LLM provider is expected to return for an advice
/// request. A response that fails to parse into this shape is treated as a
/// malformed provider response and falls back to the rule-based decision
/// (§4.4 "Output parsing ... malformed responses count as provider
/// failure").
#[derive(Debug, serde::Deserialize)]
struct LlmAdviceBody {
    action: AdviceAction,
    confidence: f64,
    stop_loss_pct: f64,
    #[serde(default)]
    take_profit_tiers: Vec<crate::types::TakeProfitTier>,
    reasoning: String,
}

/// Run one tick for `asset` under `mode`. Fetches a quote, refreshes the
/// series tail, computes the indicator snapshot, feeds the anomaly
/// detector, marks any open position on this asset, and — only when an
/// anomaly at or above `warn` fired — builds a prompt and escalates to the
/// LLM Router, recording the resulting Advice.
pub async fn run_tick(
    state: &Arc<AppState>,
    asset: &Asset,
    mode: AnalysisMode,
    series_tail: &mut Vec<crate::market_data::Candle>,
) -> Result<(), EngineError> {
    let quote = state.market_data.quote(asset).await?;

    // Mark positions on every C1 tick independent of anomaly outcome (§4.6).
    // Driven by the quote's own timestamp rather than a fresh `Utc::now()`
    // read, so a mark and the quote it was computed from agree on "when".
    let mark_at = chrono::DateTime::parse_from_rfc3339(&quote.timestamp)
        .map(|d| d.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());
    let mark_outcome = state.positions.mark(asset, quote.price, mark_at);
    for alert in &mark_outcome.alerts {
        info!(asset = %asset, kind = ?alert.kind, pct = alert.unrealized_return_pct, "position alert");
    }
    for close in &mark_outcome.closes {
        info!(asset = %asset, cause = %close.cause, pnl = close.realized_pnl, "position force-closed by risk rule");
    }

    let bar = bar_width_for(mode);
    match state.market_data.series(asset, bar, SERIES_WINDOW).await {
        Ok(fresh) => *series_tail = fresh,
        Err(e) => {
            warn!(asset = %asset, error = %e, "series refresh failed this tick, reusing prior tail");
        }
    }

    if series_tail.len() < 2 {
        return Ok(());
    }

    let closes: Vec<f64> = series_tail.iter().map(|c| c.close).collect();
    let prior_high = series_tail.iter().rev().skip(1).take(60).map(|c| c.high).fold(None, |acc: Option<f64>, h| {
        Some(acc.map_or(h, |a| a.max(h)))
    });
    let prior_low = series_tail.iter().rev().skip(1).take(60).map(|c| c.low).fold(None, |acc: Option<f64>, l| {
        Some(acc.map_or(l, |a| a.min(l)))
    });

    let snapshot = IndicatorSnapshot::compute(series_tail, prior_high, prior_low, None);

    let mut anomaly: Option<AnomalyEvent> = state.anomaly_detector.observe_price(asset, quote.price);
    if anomaly.is_none() {
        if let Some(rsi) = snapshot.rsi_standard_14 {
            anomaly = state
                .anomaly_detector
                .observe_metric(asset, "rsi_standard_14", crate::types::AnomalyKind::IndicatorDivergence, rsi);
        }
    }
    if anomaly.is_none() {
        if let Some(vz) = snapshot.volume_zscore {
            anomaly = state
                .anomaly_detector
                .observe_metric(asset, "volume_zscore", crate::types::AnomalyKind::VolumeSpike, vz);
        }
    }

    let window_change_pct = if closes.len() >= 6 {
        let then = closes[closes.len() - 6];
        if then.abs() > f64::EPSILON { (closes[closes.len() - 1] - then) / then * 100.0 } else { 0.0 }
    } else {
        0.0
    };

    {
        let mut snapshots = state.asset_snapshots.write();
        snapshots.insert(
            asset.to_string(),
            AssetSnapshot {
                asset: asset.clone(),
                price: quote.price,
                currency: quote.currency.clone(),
                source_adapter: quote.source_adapter.clone(),
                stale: quote.stale,
                indicators: snapshot.clone(),
                last_anomaly: anomaly.clone(),
                updated_at: quote.timestamp.clone(),
            },
        );
    }
    state.increment_version();

    let Some(event) = &anomaly else { return Ok(()) };
    if event.severity < Severity::Warn {
        return Ok(());
    }

    let decision = build_rule_decision(state, &snapshot, Some(event));
    let advice = escalate_to_llm(state, asset, &quote, &snapshot, event, window_change_pct, &decision).await;

    state.advice_history.push(asset, advice);
    state.increment_version();

    Ok(())
}

fn build_rule_decision(
    state: &Arc<AppState>,
    snapshot: &IndicatorSnapshot,
    anomaly: Option<&AnomalyEvent>,
) -> AggregateDecision {
    let config = state.runtime_config.read();
    let params = &config.strategy_params;
    let enabled = std::collections::HashMap::from([
        ("intraday_breakout", params.enable_breakout),
        ("ma_cross_rsi_filter", params.enable_ma_cross_rsi),
        ("momentum_reversal", params.enable_momentum_reversal),
        ("order_flow_anomaly", params.enable_order_flow_anomaly),
        ("news_driven_momentum", params.enable_news_momentum),
    ]);
    let weights = std::collections::HashMap::new();
    strategies::aggregate(
        &state.strategies,
        &enabled,
        &weights,
        snapshot,
        anomaly,
        params.entry_threshold,
    )
}

/// Build a prompt from the rule decision's context and escalate to the LLM
/// Router. On any provider failure or malformed response, falls back to
/// the rule-based decision with `source = rules`, per §4.4 and scenario 4.
async fn escalate_to_llm(
    state: &Arc<AppState>,
    asset: &Asset,
    quote: &crate::types::Quote,
    snapshot: &IndicatorSnapshot,
    anomaly: &AnomalyEvent,
    window_change_pct: f64,
    rule_decision: &AggregateDecision,
) -> Advice {
    let task_class = task_class_for(Some(anomaly), window_change_pct, false);

    let prompt = PromptBuilder::new(format!("Assess {asset} after a {} anomaly", anomaly.kind))
        .with_context("Quote", format!("price={:.4} currency={} age_s={}", quote.price, quote.currency, quote.age_secs))
        .with_context(
            "Indicators",
            format!(
                "rsi14={:?} rsi5={:?} macd_std={:?} adx={:?} roc14={:?} vol_ratio={:?}",
                snapshot.rsi_standard_14,
                snapshot.rsi_fast_5,
                snapshot.macd_standard.map(|m| m.histogram),
                snapshot.adx_14,
                snapshot.roc_14,
                snapshot.volume_ratio,
            ),
        )
        .with_context("Anomaly", format!("{} severity={} score={:.2} — {}", anomaly.kind, anomaly.severity, anomaly.score, anomaly.context))
        .with_context(
            "Rule-based candidate",
            format!("action={} confidence={:.2}", rule_decision.action, rule_decision.confidence),
        )
        .build();

    match state.llm_router.route(task_class, &prompt).await {
        Ok(response) => match serde_json::from_str::<LlmAdviceBody>(&response.text) {
            Ok(body) => {
                return Advice {
                    asset: asset.clone(),
                    action: body.action,
                    confidence: body.confidence.clamp(0.0, 1.0),
                    entry: quote.price,
                    stop_loss: quote.price * (1.0 + body.stop_loss_pct / 100.0),
                    take_profit_tiers: body.take_profit_tiers,
                    reasoning_text: body.reasoning,
                    source: AdviceSource::Llm,
                    generated_at: chrono::Utc::now().to_rfc3339(),
                };
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "LLM response failed schema validation, falling back to rules");
            }
        },
        Err(e) => {
            warn!(asset = %asset, error = %e, "LLM router call failed, falling back to rules");
        }
    }

    rule_advice(asset, quote, rule_decision)
}

fn rule_advice(asset: &Asset, quote: &crate::types::Quote, decision: &AggregateDecision) -> Advice {
    Advice {
        asset: asset.clone(),
        action: decision.action,
        confidence: decision.confidence,
        entry: quote.price,
        stop_loss: quote.price * (1.0 + decision.stop_loss_pct / 100.0),
        take_profit_tiers: decision.take_profit_tiers.clone(),
        reasoning_text: if decision.contributing.is_empty() {
            "no strategy produced a directional vote".to_string()
        } else {
            decision.contributing.join("; ")
        },
        source: AdviceSource::Rules,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

/// Spawn the long-lived tick loop for `asset` under `mode`. Returns a
/// future that runs until cancelled; the Supervisor wraps this in a
/// restartable unit. A tick that overruns the cadence is logged as
/// `PipelineOverrun` and the overdue ticks are skipped, never queued
/// (`MissedTickBehavior::Skip`), so ticks for one asset never overlap.
pub async fn run_asset_loop(state: Arc<AppState>, asset: Asset, mode: AnalysisMode, cadence_secs: u64) {
    let mut series_tail: Vec<crate::market_data::Candle> = Vec::new();
    let cadence = Duration::from_secs(cadence_secs.max(1));
    let mut interval = tokio::time::interval(cadence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let started = Instant::now();
        if let Err(e) = run_tick(&state, &asset, mode, &mut series_tail).await {
            warn!(asset = %asset, mode = %mode, error = %e, "analysis tick failed");
        }
        let elapsed = started.elapsed();
        if elapsed > cadence {
            let err = EngineError::PipelineOverrun { asset: asset.to_string(), elapsed_ms: elapsed.as_millis() as u64 };
            warn!(asset = %asset, mode = %mode, elapsed_ms = elapsed.as_millis() as u64, "{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnomalyKind, Severity};

    fn anomaly(severity: Severity) -> AnomalyEvent {
        AnomalyEvent {
            asset: Asset::crypto("BTCUSDT"),
            timestamp: "2026-01-01T00:00:00Z".into(),
            kind: AnomalyKind::PriceJump,
            severity,
            score: 6.0,
            context: "test".into(),
        }
    }

    #[test]
    fn critical_anomaly_upgrades_to_complex() {
        let class = task_class_for(Some(&anomaly(Severity::Critical)), 0.0, false);
        assert_eq!(class, TaskClass::Complex);
    }

    #[test]
    fn large_window_move_upgrades_to_complex() {
        let class = task_class_for(Some(&anomaly(Severity::Warn)), 6.0, false);
        assert_eq!(class, TaskClass::Complex);
    }

    #[test]
    fn market_overview_upgrades_to_complex() {
        let class = task_class_for(None, 0.0, true);
        assert_eq!(class, TaskClass::Complex);
    }

    #[test]
    fn ordinary_tick_stays_standard() {
        let class = task_class_for(Some(&anomaly(Severity::Warn)), 1.0, false);
        assert_eq!(class, TaskClass::Standard);
    }
}
