// =============================================================================
// Signal generation strategies (§4.5) — a capability record per strategy
// =============================================================================
//
// Each strategy is a pure function over an `IndicatorSnapshot` (plus the most
// recent anomaly event, for the two strategies that key off one) returning an
// optional weighted vote. There is no inheritance hierarchy here: a strategy
// is data — `{name, signal_fn, stop_pct, tp_tiers, max_hold_hours}` — built
// once at startup and folded over by `aggregate`, replacing the
// class-per-strategy pattern this codebase's antecedent used (§9 Design
// Notes: "inheritance among strategy classes ... replaced by a capability
// record registered at startup").
// =============================================================================

use std::collections::HashMap;

use crate::indicators::snapshot::IndicatorSnapshot;
use crate::types::{AdviceAction, AnomalyEvent, AnomalyKind, TakeProfitTier};

/// One strategy's vote for the current tick.
#[derive(Debug, Clone)]
pub struct SignalVote {
    pub action: AdviceAction,
    /// This strategy's own confidence in its vote, in `[0,1]` — distinct
    /// from the configured weight applied to it by the aggregator.
    pub confidence: f64,
    pub stop_loss_pct: f64,
    pub take_profit_tiers: Vec<TakeProfitTier>,
    pub max_hold_hours: f64,
    pub rationale: String,
}

pub type SignalFn = fn(&IndicatorSnapshot, Option<&AnomalyEvent>) -> Option<SignalVote>;

/// A registered strategy: name, pure signal function, and the exit
/// parameters it declares for the position it would open.
#[derive(Clone)]
pub struct StrategyRecord {
    pub name: &'static str,
    pub signal_fn: SignalFn,
}

/// The aggregate outcome of folding every enabled strategy's vote, carrying
/// the winning direction's stop/target/hold-time parameters through.
#[derive(Debug, Clone)]
pub struct AggregateDecision {
    pub action: AdviceAction,
    pub confidence: f64,
    pub stop_loss_pct: f64,
    pub take_profit_tiers: Vec<TakeProfitTier>,
    pub max_hold_hours: f64,
    pub contributing: Vec<String>,
}

// -----------------------------------------------------------------------
// Strategies
// -----------------------------------------------------------------------

/// Intraday breakout: price broke the prior session's high/low by the
/// indicator engine's epsilon, confirmed by positive ADX trend strength.
fn intraday_breakout(snap: &IndicatorSnapshot, _anomaly: Option<&AnomalyEvent>) -> Option<SignalVote> {
    let direction = snap.breakout?;
    let adx = snap.adx_14.unwrap_or(0.0);
    let confidence = (adx / 40.0).clamp(0.2, 1.0);

    use crate::indicators::breakout::BreakoutDirection;
    let action = match direction {
        BreakoutDirection::Up => AdviceAction::Buy,
        BreakoutDirection::Down => AdviceAction::Sell,
    };

    Some(SignalVote {
        action,
        confidence,
        stop_loss_pct: -1.2,
        take_profit_tiers: vec![
            TakeProfitTier { trigger_pct: 1.5, fraction: 0.33 },
            TakeProfitTier { trigger_pct: 2.5, fraction: 0.33 },
        ],
        max_hold_hours: 6.0,
        rationale: format!("intraday breakout ({direction:?}), ADX {adx:.1}"),
    })
}

/// Fast MA cross with an RSI filter: MA-5 crossing above/below MA-15,
/// confirmed only when the fast RSI is not already in the opposite extreme
/// (avoids buying into an already-overbought cross).
fn ma_cross_rsi_filter(snap: &IndicatorSnapshot, _anomaly: Option<&AnomalyEvent>) -> Option<SignalVote> {
    let ma5 = snap.ma_5?;
    let ma15 = snap.ma_15?;
    let rsi = snap.rsi_fast_5?;

    let spread_pct = (ma5 - ma15) / ma15 * 100.0;
    if spread_pct.abs() < 0.05 {
        return None;
    }

    if spread_pct > 0.0 {
        if rsi >= 80.0 {
            return None; // already overbought, don't chase
        }
        Some(SignalVote {
            action: AdviceAction::Buy,
            confidence: (spread_pct.abs() / 1.0).clamp(0.2, 1.0),
            stop_loss_pct: -1.0,
            take_profit_tiers: vec![TakeProfitTier { trigger_pct: 2.0, fraction: 1.0 }],
            max_hold_hours: 8.0,
            rationale: format!("MA5>MA15 by {spread_pct:.2}%, RSI5 {rsi:.1} not overbought"),
        })
    } else {
        if rsi <= 20.0 {
            return None;
        }
        Some(SignalVote {
            action: AdviceAction::Sell,
            confidence: (spread_pct.abs() / 1.0).clamp(0.2, 1.0),
            stop_loss_pct: -1.0,
            take_profit_tiers: vec![TakeProfitTier { trigger_pct: 2.0, fraction: 1.0 }],
            max_hold_hours: 8.0,
            rationale: format!("MA5<MA15 by {spread_pct:.2}%, RSI5 {rsi:.1} not oversold"),
        })
    }
}

/// Momentum reversal: oversold/overbought RSI-14 bouncing on a volume
/// surge (above-average volume ratio).
fn momentum_reversal(snap: &IndicatorSnapshot, _anomaly: Option<&AnomalyEvent>) -> Option<SignalVote> {
    let rsi = snap.rsi_standard_14?;
    let vol_ratio = snap.volume_ratio?;
    if vol_ratio < 1.5 {
        return None; // no surge, no reversal conviction
    }

    if rsi <= 30.0 {
        Some(SignalVote {
            action: AdviceAction::Buy,
            confidence: ((30.0 - rsi) / 30.0 * (vol_ratio / 3.0)).clamp(0.2, 1.0),
            stop_loss_pct: -1.5,
            take_profit_tiers: vec![TakeProfitTier { trigger_pct: 3.0, fraction: 1.0 }],
            max_hold_hours: 10.0,
            rationale: format!("oversold bounce, RSI14 {rsi:.1}, volume ratio {vol_ratio:.2}x"),
        })
    } else if rsi >= 70.0 {
        Some(SignalVote {
            action: AdviceAction::Sell,
            confidence: ((rsi - 70.0) / 30.0 * (vol_ratio / 3.0)).clamp(0.2, 1.0),
            stop_loss_pct: -1.5,
            take_profit_tiers: vec![TakeProfitTier { trigger_pct: 3.0, fraction: 1.0 }],
            max_hold_hours: 10.0,
            rationale: format!("overbought reversal, RSI14 {rsi:.1}, volume ratio {vol_ratio:.2}x"),
        })
    } else {
        None
    }
}

/// Order-flow anomaly: order-book imbalance strongly favors one side,
/// reinforced by a recent volume-spike anomaly event.
fn order_flow_anomaly(snap: &IndicatorSnapshot, anomaly: Option<&AnomalyEvent>) -> Option<SignalVote> {
    let imbalance = snap.orderbook_imbalance?;
    let reinforced = matches!(anomaly, Some(a) if a.kind == AnomalyKind::VolumeSpike);
    if imbalance.abs() < 0.15 {
        return None;
    }

    let action = if imbalance > 0.0 { AdviceAction::Buy } else { AdviceAction::Sell };
    let mut confidence = imbalance.abs().clamp(0.2, 1.0);
    if reinforced {
        confidence = (confidence + 0.2).min(1.0);
    }

    Some(SignalVote {
        action,
        confidence,
        stop_loss_pct: -1.0,
        take_profit_tiers: vec![TakeProfitTier { trigger_pct: 1.5, fraction: 1.0 }],
        max_hold_hours: 4.0,
        rationale: format!(
            "order-book imbalance {imbalance:.2}{}",
            if reinforced { ", reinforced by volume-spike anomaly" } else { "" }
        ),
    })
}

/// News-driven momentum: a `sentiment_shift` anomaly combined with
/// confirming directional momentum (ROC).
fn news_driven_momentum(snap: &IndicatorSnapshot, anomaly: Option<&AnomalyEvent>) -> Option<SignalVote> {
    let anomaly = anomaly.filter(|a| a.kind == AnomalyKind::SentimentShift)?;
    let roc = snap.roc_14?;
    if roc.abs() < 0.5 {
        return None;
    }

    let action = if roc > 0.0 { AdviceAction::Buy } else { AdviceAction::Sell };
    Some(SignalVote {
        action,
        confidence: (anomaly.score.abs() / 5.0).clamp(0.2, 1.0),
        stop_loss_pct: -2.0,
        take_profit_tiers: vec![TakeProfitTier { trigger_pct: 4.0, fraction: 1.0 }],
        max_hold_hours: 12.0,
        rationale: format!("sentiment shift (score {:.2}) confirmed by ROC14 {roc:.2}", anomaly.score),
    })
}

/// The default registry of strategies. Enable flags live in
/// `StrategyParams`; a disabled strategy is simply filtered out of the
/// fold rather than removed from the registry.
pub fn default_strategies() -> Vec<StrategyRecord> {
    vec![
        StrategyRecord { name: "intraday_breakout", signal_fn: intraday_breakout },
        StrategyRecord { name: "ma_cross_rsi_filter", signal_fn: ma_cross_rsi_filter },
        StrategyRecord { name: "momentum_reversal", signal_fn: momentum_reversal },
        StrategyRecord { name: "order_flow_anomaly", signal_fn: order_flow_anomaly },
        StrategyRecord { name: "news_driven_momentum", signal_fn: news_driven_momentum },
    ]
}

/// Fold every enabled strategy's vote into a single weighted decision. An
/// aggregate confidence below `entry_threshold` yields `Hold` regardless of
/// direction, per §4.5.
pub fn aggregate(
    strategies: &[StrategyRecord],
    enabled: &HashMap<&str, bool>,
    weights: &HashMap<String, f64>,
    snapshot: &IndicatorSnapshot,
    anomaly: Option<&AnomalyEvent>,
    entry_threshold: f64,
) -> AggregateDecision {
    let mut buy_weight = 0.0;
    let mut sell_weight = 0.0;
    let mut contributing = Vec::new();
    let mut winner: Option<(AdviceAction, f64, &SignalVote)> = None;

    let votes: Vec<(&StrategyRecord, SignalVote)> = strategies
        .iter()
        .filter(|s| *enabled.get(s.name).unwrap_or(&true))
        .filter_map(|s| (s.signal_fn)(snapshot, anomaly).map(|v| (s, v)))
        .collect();

    for (strategy, vote) in &votes {
        let weight = weights.get(strategy.name).copied().unwrap_or(1.0);
        let contribution = weight * vote.confidence;
        match vote.action {
            AdviceAction::Buy => buy_weight += contribution,
            AdviceAction::Sell => sell_weight += contribution,
            AdviceAction::Hold => {}
        }
        contributing.push(format!("{}: {}", strategy.name, vote.rationale));

        let running = if vote.action == AdviceAction::Buy { buy_weight } else { sell_weight };
        if winner.as_ref().map(|(_, w, _)| running > *w).unwrap_or(true) && vote.action != AdviceAction::Hold {
            winner = Some((vote.action, running, vote));
        }
    }

    let total = buy_weight + sell_weight;
    let (action, confidence) = if total <= f64::EPSILON {
        (AdviceAction::Hold, 0.0)
    } else if buy_weight >= sell_weight {
        (AdviceAction::Buy, buy_weight / (buy_weight + sell_weight).max(f64::EPSILON))
    } else {
        (AdviceAction::Sell, sell_weight / (buy_weight + sell_weight).max(f64::EPSILON))
    };

    if confidence < entry_threshold {
        return AggregateDecision {
            action: AdviceAction::Hold,
            confidence,
            stop_loss_pct: -1.0,
            take_profit_tiers: Vec::new(),
            max_hold_hours: 10.0,
            contributing,
        };
    }

    let winning_vote = votes
        .iter()
        .filter(|(_, v)| v.action == action)
        .max_by(|(sa, va), (sb, vb)| {
            let wa = weights.get(sa.name).copied().unwrap_or(1.0) * va.confidence;
            let wb = weights.get(sb.name).copied().unwrap_or(1.0) * vb.confidence;
            wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(_, v)| v.clone());

    match winning_vote {
        Some(v) => AggregateDecision {
            action,
            confidence,
            stop_loss_pct: v.stop_loss_pct,
            take_profit_tiers: v.take_profit_tiers,
            max_hold_hours: v.max_hold_hours,
            contributing,
        },
        None => AggregateDecision {
            action: AdviceAction::Hold,
            confidence: 0.0,
            stop_loss_pct: -1.0,
            take_profit_tiers: Vec::new(),
            max_hold_hours: 10.0,
            contributing,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::breakout::BreakoutDirection;

    fn blank_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi_fast_5: None,
            rsi_standard_14: None,
            macd_fast: None,
            macd_standard: None,
            ma_5: None,
            ma_10: None,
            ma_15: None,
            ma_20: None,
            ma_30: None,
            ma_50: None,
            adx_14: None,
            atr_14: None,
            bollinger_width: None,
            roc_14: None,
            volume_ratio: None,
            volume_zscore: None,
            breakout: None,
            orderbook_imbalance: None,
        }
    }

    #[test]
    fn no_votes_below_threshold_yields_hold() {
        let strategies = default_strategies();
        let enabled: HashMap<&str, bool> = HashMap::new();
        let weights = HashMap::new();
        let decision = aggregate(&strategies, &enabled, &weights, &blank_snapshot(), None, 0.6);
        assert_eq!(decision.action, AdviceAction::Hold);
    }

    #[test]
    fn breakout_vote_drives_buy_decision() {
        let strategies = default_strategies();
        let enabled: HashMap<&str, bool> = HashMap::new();
        let weights = HashMap::new();
        let mut snap = blank_snapshot();
        snap.breakout = Some(BreakoutDirection::Up);
        snap.adx_14 = Some(40.0);
        let decision = aggregate(&strategies, &enabled, &weights, &snap, None, 0.3);
        assert_eq!(decision.action, AdviceAction::Buy);
        assert!(decision.confidence > 0.0);
        assert!(!decision.contributing.is_empty());
    }

    #[test]
    fn momentum_reversal_requires_volume_surge() {
        let mut snap = blank_snapshot();
        snap.rsi_standard_14 = Some(20.0);
        snap.volume_ratio = Some(1.0); // no surge
        assert!(momentum_reversal(&snap, None).is_none());
        snap.volume_ratio = Some(2.0);
        assert!(momentum_reversal(&snap, None).is_some());
    }

    #[test]
    fn news_driven_momentum_requires_sentiment_anomaly() {
        let mut snap = blank_snapshot();
        snap.roc_14 = Some(1.0);
        assert!(news_driven_momentum(&snap, None).is_none());

        let anomaly = AnomalyEvent {
            asset: crate::types::Asset::crypto("BTCUSDT"),
            timestamp: "2026-01-01T00:00:00Z".into(),
            kind: AnomalyKind::SentimentShift,
            severity: crate::types::Severity::High,
            score: 3.0,
            context: "test".into(),
        };
        assert!(news_driven_momentum(&snap, Some(&anomaly)).is_some());
    }
}
