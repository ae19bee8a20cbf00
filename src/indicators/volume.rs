// =============================================================================
// Rolling Volume Mean & Z-Score
// =============================================================================
//
// Feeds both the Indicator Engine (volume ratio snapshot field) and the
// Anomaly Detector (volume_spike baseline). Division by zero — a rolling
// mean of zero, or fewer than two samples — returns `None` rather than an
// implicit zero, per the numeric-discipline rule in the component design.
// =============================================================================

/// Rolling mean and population standard deviation of `volumes`.
///
/// Returns `None` when `volumes` is empty.
pub fn rolling_mean_stdev(volumes: &[f64]) -> Option<(f64, f64)> {
    if volumes.is_empty() {
        return None;
    }
    let n = volumes.len() as f64;
    let mean = volumes.iter().sum::<f64>() / n;
    let variance = volumes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Ratio of the most recent volume to the rolling mean of the preceding
/// window. `None` when the window is empty or the mean is zero (can't form
/// a meaningful ratio), matching the "division by zero returns absent" rule.
pub fn volume_ratio(window: &[f64], latest: f64) -> Option<f64> {
    let (mean, _) = rolling_mean_stdev(window)?;
    if mean == 0.0 {
        return None;
    }
    Some(latest / mean)
}

/// Z-score of `latest` against the rolling baseline formed by `window`
/// (which should exclude `latest` itself). `None` when there are fewer
/// than two samples or the baseline has zero variance.
pub fn volume_zscore(window: &[f64], latest: f64) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let (mean, stdev) = rolling_mean_stdev(window)?;
    if stdev <= f64::EPSILON {
        return None;
    }
    Some((latest - mean) / stdev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_is_absent() {
        assert!(rolling_mean_stdev(&[]).is_none());
        assert!(volume_ratio(&[], 100.0).is_none());
        assert!(volume_zscore(&[], 100.0).is_none());
    }

    #[test]
    fn zero_mean_ratio_is_absent() {
        assert!(volume_ratio(&[0.0, 0.0, 0.0], 10.0).is_none());
    }

    #[test]
    fn ratio_above_one_when_spiking() {
        let r = volume_ratio(&[100.0, 100.0, 100.0], 300.0).unwrap();
        assert!((r - 3.0).abs() < 1e-9);
    }

    #[test]
    fn zscore_zero_variance_is_absent() {
        assert!(volume_zscore(&[100.0, 100.0, 100.0], 100.0).is_none());
    }

    #[test]
    fn zscore_large_spike_is_positive_and_large() {
        let z = volume_zscore(&[100.0, 102.0, 98.0, 101.0, 99.0], 500.0).unwrap();
        assert!(z > 2.0, "expected a clear spike, got z={z}");
    }
}
