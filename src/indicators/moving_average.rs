// =============================================================================
// Simple Moving Averages
// =============================================================================
//
// Plain arithmetic-mean moving averages at the periods the indicator engine
// is required to support: 5/10/15/20/30/50. Kept separate from `ema` since
// MACD needs exponential smoothing but the "fast/slow MA" indicator-snapshot
// fields are simple averages in the source systems this engine imitates.
// =============================================================================

pub const PERIODS: [usize; 6] = [5, 10, 15, 20, 30, 50];

/// Simple moving average of the last `period` closes. `None` when there
/// isn't enough history — never silently zero-padded.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let sum: f64 = window.iter().sum();
    let value = sum / period as f64;
    value.is_finite().then_some(value)
}

/// Compute every configured period's SMA in one pass, keyed by period.
pub fn sma_stack(closes: &[f64]) -> Vec<(usize, Option<f64>)> {
    PERIODS.iter().map(|&p| (p, sma(closes, p))).collect()
}

/// Whether the fast/slow pair is in a bullish (fast above slow) or bearish
/// (fast below slow) alignment. `None` when either is unavailable.
pub fn fast_above_slow(fast: Option<f64>, slow: Option<f64>) -> Option<bool> {
    Some(fast? > slow?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_insufficient_history_is_absent() {
        assert!(sma(&[1.0, 2.0], 5).is_none());
    }

    #[test]
    fn sma_uses_trailing_window_only() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0, 100.0];
        // period 5 over the last five values: 2,3,4,5,100
        let v = sma(&closes, 5).unwrap();
        assert!((v - 22.8).abs() < 1e-9);
    }

    #[test]
    fn fast_above_slow_reports_alignment() {
        assert_eq!(fast_above_slow(Some(10.0), Some(5.0)), Some(true));
        assert_eq!(fast_above_slow(Some(5.0), Some(10.0)), Some(false));
        assert_eq!(fast_above_slow(None, Some(10.0)), None);
    }
}
