// =============================================================================
// Anomaly Detector (C3)
// =============================================================================
//
// Scores recent observations against a rolling per-asset/per-metric baseline
// and emits severity-tagged events. Four independent rules feed into this:
//
//   1. Z-score against the rolling mean/stdev of a metric, tiered at
//      |z| >= 2.0 (warn), 3.0 (high), 4.5 (critical).
//   2. A single bar move of >= 5% in either direction (price jump),
//      regardless of the z-score baseline — a move that large is notable
//      even before enough history exists to baseline it.
//   3. Three or more consecutive same-direction bars each carrying
//      above-baseline volume (volume spike / accumulation run).
//
// Each asset/kind pair is debounced: once an event fires, the same kind for
// the same asset is suppressed until the debounce window elapses, even if
// the underlying score stays elevated.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;

use crate::types::{Asset, AnomalyEvent, AnomalyKind, Severity};

const PRICE_JUMP_PCT: f64 = 5.0;
const CONSECUTIVE_RUN_LEN: usize = 3;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at_secs: i64,
    value: f64,
}

#[derive(Debug, Clone, Copy)]
struct VolumeBar {
    at_secs: i64,
    direction: i8, // +1 up, -1 down, 0 flat
    volume: f64,
}

#[derive(Default)]
struct AssetState {
    metrics: HashMap<String, VecDeque<Sample>>,
    volume_bars: VecDeque<VolumeBar>,
    last_emitted: HashMap<AnomalyKind, (i64, Severity)>,
    last_price: Option<f64>,
}

pub struct AnomalyDetector {
    state: RwLock<HashMap<String, AssetState>>,
    baseline_window_secs: i64,
    debounce_secs: i64,
}

impl AnomalyDetector {
    pub fn new(baseline_window_secs: u64, debounce_secs: u64) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            baseline_window_secs: baseline_window_secs as i64,
            debounce_secs: debounce_secs as i64,
        }
    }

    /// Record a metric observation (e.g. "rsi", "roc") and return a severity
    /// event if its z-score against the rolling baseline crosses a tier and
    /// the kind is not currently debounced for this asset.
    pub fn observe_metric(
        &self,
        asset: &Asset,
        metric: &str,
        kind: AnomalyKind,
        value: f64,
    ) -> Option<AnomalyEvent> {
        let now = Utc::now().timestamp();
        let mut guard = self.state.write();
        let asset_state = guard.entry(asset.to_string()).or_default();
        let buf = asset_state.metrics.entry(metric.to_string()).or_default();

        buf.push_back(Sample { at_secs: now, value });
        while let Some(front) = buf.front() {
            if now - front.at_secs > self.baseline_window_secs {
                buf.pop_front();
            } else {
                break;
            }
        }

        if buf.len() < 5 {
            return None; // not enough history to baseline yet
        }

        let n = buf.len() as f64;
        let mean: f64 = buf.iter().map(|s| s.value).sum::<f64>() / n;
        let variance: f64 = buf.iter().map(|s| (s.value - mean).powi(2)).sum::<f64>() / n;
        let stdev = variance.sqrt();
        if stdev <= f64::EPSILON {
            return None;
        }

        let z = (value - mean) / stdev;
        let severity = severity_for_z(z.abs())?;

        if Self::debounced(asset_state, kind, now, severity, self.debounce_secs) {
            return None;
        }
        asset_state.last_emitted.insert(kind, (now, severity));

        Some(AnomalyEvent {
            asset: asset.clone(),
            timestamp: Utc::now().to_rfc3339(),
            kind,
            severity,
            score: z,
            context: format!("{metric}={value:.4} mean={mean:.4} stdev={stdev:.4} z={z:.2}"),
        })
    }

    /// Feed the latest close price. Detects single-bar moves >= 5% in
    /// either direction independent of the rolling baseline.
    pub fn observe_price(&self, asset: &Asset, price: f64) -> Option<AnomalyEvent> {
        let now = Utc::now().timestamp();
        let mut guard = self.state.write();
        let asset_state = guard.entry(asset.to_string()).or_default();

        let prev = asset_state.last_price.replace(price);
        let Some(prev) = prev else { return None };
        if prev <= 0.0 {
            return None;
        }

        let pct = (price - prev) / prev * 100.0;
        if pct.abs() < PRICE_JUMP_PCT {
            return None;
        }

        let severity = if pct.abs() >= 10.0 { Severity::Critical } else { Severity::High };

        if Self::debounced(asset_state, AnomalyKind::PriceJump, now, severity, self.debounce_secs) {
            return None;
        }
        asset_state.last_emitted.insert(AnomalyKind::PriceJump, (now, severity));

        Some(AnomalyEvent {
            asset: asset.clone(),
            timestamp: Utc::now().to_rfc3339(),
            kind: AnomalyKind::PriceJump,
            severity,
            score: pct,
            context: format!("single-bar move {pct:.2}% from {prev:.4} to {price:.4}"),
        })
    }

    /// Feed a closed bar's direction and volume. Detects 3+ consecutive
    /// same-direction bars each carrying above-baseline volume.
    pub fn observe_volume_bar(
        &self,
        asset: &Asset,
        direction: i8,
        volume: f64,
        baseline_volume: f64,
    ) -> Option<AnomalyEvent> {
        let now = Utc::now().timestamp();
        let mut guard = self.state.write();
        let asset_state = guard.entry(asset.to_string()).or_default();

        asset_state.volume_bars.push_back(VolumeBar { at_secs: now, direction, volume });
        while asset_state.volume_bars.len() > CONSECUTIVE_RUN_LEN {
            asset_state.volume_bars.pop_front();
        }

        if asset_state.volume_bars.len() < CONSECUTIVE_RUN_LEN {
            return None;
        }

        let above_baseline = baseline_volume > 0.0;
        let run_matches = asset_state.volume_bars.iter().all(|b| {
            b.direction == direction
                && b.direction != 0
                && (!above_baseline || b.volume >= baseline_volume * 1.5)
        });

        if !run_matches {
            return None;
        }

        let severity = Severity::High;
        if Self::debounced(asset_state, AnomalyKind::VolumeSpike, now, severity, self.debounce_secs) {
            return None;
        }
        asset_state.last_emitted.insert(AnomalyKind::VolumeSpike, (now, severity));

        Some(AnomalyEvent {
            asset: asset.clone(),
            timestamp: Utc::now().to_rfc3339(),
            kind: AnomalyKind::VolumeSpike,
            severity,
            score: volume,
            context: format!(
                "{CONSECUTIVE_RUN_LEN} consecutive {} bars above baseline volume",
                if direction > 0 { "up" } else { "down" }
            ),
        })
    }

    /// A (asset, kind) that fired within the debounce window is suppressed
    /// at the same or lower severity, but re-fires on strict escalation
    /// (§4.3: "re-fires on strict escalation").
    fn debounced(
        asset_state: &AssetState,
        kind: AnomalyKind,
        now: i64,
        severity: Severity,
        debounce_secs: i64,
    ) -> bool {
        match asset_state.last_emitted.get(&kind) {
            Some(&(last_at, last_severity)) => {
                now - last_at < debounce_secs && severity <= last_severity
            }
            None => false,
        }
    }
}

fn severity_for_z(abs_z: f64) -> Option<Severity> {
    if abs_z >= 4.5 {
        Some(Severity::Critical)
    } else if abs_z >= 3.0 {
        Some(Severity::High)
    } else if abs_z >= 2.0 {
        Some(Severity::Warn)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> Asset {
        Asset::crypto("BTCUSDT")
    }

    #[test]
    fn no_event_until_enough_history() {
        let d = AnomalyDetector::new(3600, 300);
        for i in 0..4 {
            let ev = d.observe_metric(&asset(), "rsi", AnomalyKind::IndicatorDivergence, 50.0 + i as f64);
            assert!(ev.is_none());
        }
    }

    #[test]
    fn z_score_spike_emits_event() {
        let d = AnomalyDetector::new(3600, 300);
        for v in [50.0, 51.0, 49.0, 50.5, 49.5, 50.2] {
            d.observe_metric(&asset(), "rsi", AnomalyKind::IndicatorDivergence, v);
        }
        let ev = d
            .observe_metric(&asset(), "rsi", AnomalyKind::IndicatorDivergence, 95.0)
            .expect("large deviation should trigger");
        assert!(ev.severity >= Severity::Warn);
    }

    #[test]
    fn debounce_suppresses_repeat_events() {
        let d = AnomalyDetector::new(3600, 300);
        for v in [50.0, 51.0, 49.0, 50.5, 49.5, 50.2] {
            d.observe_metric(&asset(), "rsi", AnomalyKind::IndicatorDivergence, v);
        }
        let first = d.observe_metric(&asset(), "rsi", AnomalyKind::IndicatorDivergence, 95.0);
        assert!(first.is_some());
        let second = d.observe_metric(&asset(), "rsi", AnomalyKind::IndicatorDivergence, 96.0);
        assert!(second.is_none(), "debounce window should suppress the repeat");
    }

    #[test]
    fn debounce_allows_strict_escalation_through() {
        let mut state = AssetState::default();
        let now = 1_000_i64;
        state.last_emitted.insert(AnomalyKind::PriceJump, (now, Severity::Warn));

        // Same or lower severity within the window stays suppressed.
        assert!(AnomalyDetector::debounced(&state, AnomalyKind::PriceJump, now + 1, Severity::Warn, 300));
        assert!(AnomalyDetector::debounced(&state, AnomalyKind::PriceJump, now + 1, Severity::Info, 300));

        // Strict escalation fires through even inside the debounce window.
        assert!(!AnomalyDetector::debounced(&state, AnomalyKind::PriceJump, now + 1, Severity::High, 300));
        assert!(!AnomalyDetector::debounced(&state, AnomalyKind::PriceJump, now + 1, Severity::Critical, 300));

        // Once the window elapses, even the same severity fires again.
        assert!(!AnomalyDetector::debounced(&state, AnomalyKind::PriceJump, now + 301, Severity::Warn, 300));
    }

    #[test]
    fn price_jump_detected_on_large_single_bar_move() {
        let d = AnomalyDetector::new(3600, 300);
        assert!(d.observe_price(&asset(), 100.0).is_none());
        let ev = d.observe_price(&asset(), 107.0).expect("7% jump should trigger");
        assert_eq!(ev.kind, AnomalyKind::PriceJump);
        assert!(ev.score > 0.0);
    }

    #[test]
    fn price_jump_below_threshold_is_silent() {
        let d = AnomalyDetector::new(3600, 300);
        d.observe_price(&asset(), 100.0);
        assert!(d.observe_price(&asset(), 102.0).is_none());
    }

    #[test]
    fn consecutive_large_volume_run_triggers_spike() {
        let d = AnomalyDetector::new(3600, 300);
        assert!(d.observe_volume_bar(&asset(), 1, 100.0, 50.0).is_none());
        assert!(d.observe_volume_bar(&asset(), 1, 110.0, 50.0).is_none());
        let ev = d.observe_volume_bar(&asset(), 1, 120.0, 50.0);
        assert!(ev.is_some());
        let ev = ev.unwrap();
        assert_eq!(ev.kind, AnomalyKind::VolumeSpike);
        assert_eq!(ev.severity, Severity::High);
    }
}
