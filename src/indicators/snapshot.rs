// =============================================================================
// Indicator Snapshot — the Indicator Engine's (C2) single entry point
// =============================================================================
//
// A value, not an object: carries no identity and may be recomputed freely
// from a Series tail. Every field is `Option` — absent means "inconclusive",
// never zero — so downstream consumers (strategies, the anomaly detector,
// prompt assembly) must handle missing data explicitly.
// =============================================================================

use serde::Serialize;

use crate::market_data::Candle;

use super::{adx, atr, bollinger, breakout, macd, moving_average, roc, rsi, volume};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MacdSnapshot {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl From<macd::MacdValue> for MacdSnapshot {
    fn from(v: macd::MacdValue) -> Self {
        Self { macd: v.macd, signal: v.signal, histogram: v.histogram }
    }
}

/// Deterministic function of a Series tail. `IndicatorSnapshot::compute`
/// with the same input always yields bit-identical output.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorSnapshot {
    pub rsi_fast_5: Option<f64>,
    pub rsi_standard_14: Option<f64>,
    pub macd_fast: Option<MacdSnapshot>,
    pub macd_standard: Option<MacdSnapshot>,
    pub ma_5: Option<f64>,
    pub ma_10: Option<f64>,
    pub ma_15: Option<f64>,
    pub ma_20: Option<f64>,
    pub ma_30: Option<f64>,
    pub ma_50: Option<f64>,
    pub adx_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub bollinger_width: Option<f64>,
    pub roc_14: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub volume_zscore: Option<f64>,
    pub breakout: Option<breakout::BreakoutDirection>,
    pub orderbook_imbalance: Option<f64>,
}

impl IndicatorSnapshot {
    /// Compute a snapshot from OHLCV arrays plus an optional prior-session
    /// high/low and an optional order-book imbalance reading. All inputs
    /// are the raw bar arrays; this function does not mutate or retain
    /// them — it is a pure transform.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        candles: &[Candle],
        prior_session_high: Option<f64>,
        prior_session_low: Option<f64>,
        orderbook_imbalance: Option<f64>,
    ) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let rsi_fast_5 = rsi::current_rsi(&closes, 5).map(|(v, _)| v);
        let rsi_standard_14 = rsi::current_rsi(&closes, 14).map(|(v, _)| v);

        let macd_fast = macd::fast_macd(&closes).map(MacdSnapshot::from);
        let macd_standard = macd::standard_macd(&closes).map(MacdSnapshot::from);

        let ma_5 = moving_average::sma(&closes, 5);
        let ma_10 = moving_average::sma(&closes, 10);
        let ma_15 = moving_average::sma(&closes, 15);
        let ma_20 = moving_average::sma(&closes, 20);
        let ma_30 = moving_average::sma(&closes, 30);
        let ma_50 = moving_average::sma(&closes, 50);

        let adx_14 = adx::calculate_adx(candles, 14);
        let atr_14 = atr::calculate_atr(candles, 14);
        let bollinger_width = bollinger::calculate_bollinger(&closes, 20, 2.0).map(|b| b.width);
        let roc_14 = roc::current_roc(&closes, 14);

        let (volume_ratio, volume_zscore) = if volumes.len() > 1 {
            let latest = volumes[volumes.len() - 1];
            let window = &volumes[..volumes.len() - 1];
            (volume::volume_ratio(window, latest), volume::volume_zscore(window, latest))
        } else {
            (None, None)
        };

        let breakout_flag = closes.last().and_then(|&price| {
            breakout::intraday_break(price, prior_session_high, prior_session_low, 0.1)
        });

        Self {
            rsi_fast_5,
            rsi_standard_14,
            macd_fast,
            macd_standard,
            ma_5,
            ma_10,
            ma_15,
            ma_20,
            ma_30,
            ma_50,
            adx_14,
            atr_14,
            bollinger_width,
            roc_14,
            volume_ratio,
            volume_zscore,
            breakout: breakout_flag,
            orderbook_imbalance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1;
                Candle {
                    open_time: i as i64 * 60_000,
                    close_time: i as i64 * 60_000 + 59_999,
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1000.0 + (i as f64 % 7.0) * 50.0,
                    quote_volume: 0.0,
                    trades_count: 0,
                    taker_buy_volume: 0.0,
                    taker_buy_quote_volume: 0.0,
                    is_closed: true,
                }
            })
            .collect()
    }

    #[test]
    fn short_series_yields_mostly_absent_fields() {
        let candles = series(3);
        let snap = IndicatorSnapshot::compute(&candles, None, None, None);
        assert!(snap.rsi_standard_14.is_none());
        assert!(snap.ma_50.is_none());
        assert!(snap.macd_standard.is_none());
    }

    #[test]
    fn long_series_populates_core_fields() {
        let candles = series(100);
        let snap = IndicatorSnapshot::compute(&candles, Some(150.0), Some(90.0), Some(0.55));
        assert!(snap.rsi_fast_5.is_some());
        assert!(snap.rsi_standard_14.is_some());
        assert!(snap.ma_50.is_some());
        assert!(snap.macd_standard.is_some());
        assert_eq!(snap.orderbook_imbalance, Some(0.55));
    }

    #[test]
    fn deterministic_for_same_input() {
        let candles = series(60);
        let a = IndicatorSnapshot::compute(&candles, None, None, None);
        let b = IndicatorSnapshot::compute(&candles, None, None, None);
        assert_eq!(a.rsi_standard_14, b.rsi_standard_14);
        assert_eq!(a.ma_20, b.ma_20);
    }
}
