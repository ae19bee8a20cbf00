// =============================================================================
// Candle types
// =============================================================================
//
// Plain OHLCV data shared by every market-data adapter and by the backtest
// replay. No buffering or streaming lives here anymore — `MarketDataFanIn`
// owns the only cache (last-known-good quotes), and `series()` always goes
// straight to the adapter.
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub is_closed: bool,
}

impl Candle {
    /// Build a closed candle from a REST kline response, where per-trade
    /// taker-buy breakdowns aren't needed by any caller.
    #[allow(clippy::too_many_arguments)]
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64, close_time: i64) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: 0.0,
            trades_count: 0,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_key_displays_as_symbol_at_interval() {
        let key = CandleKey { symbol: "BTCUSDT".to_string(), interval: "1m".to_string() };
        assert_eq!(key.to_string(), "BTCUSDT@1m");
    }

    #[test]
    fn new_candle_defaults_extra_fields_and_is_closed() {
        let c = Candle::new(0, 1.0, 2.0, 0.5, 1.5, 10.0, 59_999);
        assert!(c.is_closed);
        assert_eq!(c.trades_count, 0);
    }
}
