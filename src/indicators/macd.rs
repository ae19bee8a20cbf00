// =============================================================================
// MACD — Moving Average Convergence/Divergence
// =============================================================================
//
// macd_line   = EMA(fast) - EMA(slow)
// signal_line = EMA(macd_line, signal)
// histogram   = macd_line - signal_line
//
// Two configurations are used by the indicator engine: the standard triplet
// (12/26/9) and a fast triplet (5/10/5) for short-horizon monitoring. Both
// go through the same `calculate_macd` function with different periods.
// =============================================================================

use super::ema::calculate_ema;

/// One MACD reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the full MACD series for `closes` under the given periods.
///
/// Returns an empty vec when there isn't enough history to seed both EMAs
/// and the signal-line EMA on top of them. All three outputs are finite or
/// the series is truncated at the first non-finite value, matching the
/// truncate-on-non-finite convention used by the other indicators in this
/// module.
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<MacdValue> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return Vec::new();
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    if fast_ema.is_empty() || slow_ema.is_empty() {
        return Vec::new();
    }

    // fast_ema starts at index `fast-1` of `closes`, slow_ema at `slow-1`.
    // Align both series to the later starting point (slow_ema's start).
    let offset = slow - fast;
    if fast_ema.len() <= offset {
        return Vec::new();
    }
    let aligned_fast = &fast_ema[offset..];
    let n = aligned_fast.len().min(slow_ema.len());

    let macd_line: Vec<f64> = (0..n).map(|i| aligned_fast[i] - slow_ema[i]).collect();
    if macd_line.len() < signal {
        return Vec::new();
    }

    let signal_line = calculate_ema(&macd_line, signal);
    if signal_line.is_empty() {
        return Vec::new();
    }

    let macd_offset = macd_line.len() - signal_line.len();
    let mut out = Vec::with_capacity(signal_line.len());
    for (i, &sig) in signal_line.iter().enumerate() {
        let macd = macd_line[macd_offset + i];
        let histogram = macd - sig;
        if !macd.is_finite() || !sig.is_finite() || !histogram.is_finite() {
            break;
        }
        out.push(MacdValue { macd, signal: sig, histogram });
    }
    out
}

/// Most recent MACD triplet for the standard 12/26/9 configuration.
pub fn standard_macd(closes: &[f64]) -> Option<MacdValue> {
    calculate_macd(closes, 12, 26, 9).last().copied()
}

/// Most recent MACD triplet for the fast 5/10/5 configuration used by the
/// short-term monitor.
pub fn fast_macd(closes: &[f64]) -> Option<MacdValue> {
    calculate_macd(closes, 5, 10, 5).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_series() {
        assert!(calculate_macd(&[], 12, 26, 9).is_empty());
    }

    #[test]
    fn insufficient_history_yields_empty_series() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 12, 26, 9).is_empty());
    }

    #[test]
    fn trending_series_has_positive_macd() {
        let closes: Vec<f64> = (1..=80).map(|x| x as f64).collect();
        let v = standard_macd(&closes).expect("enough history for standard MACD");
        assert!(v.macd > 0.0, "rising series should have positive MACD, got {}", v.macd);
    }

    #[test]
    fn fast_macd_needs_less_history_than_standard() {
        let closes: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        assert!(fast_macd(&closes).is_some());
        assert!(standard_macd(&closes).is_none());
    }

    #[test]
    fn flat_series_has_near_zero_macd() {
        let closes = vec![50.0; 80];
        let v = standard_macd(&closes).unwrap();
        assert!(v.macd.abs() < 1e-9);
        assert!(v.histogram.abs() < 1e-9);
    }
}
