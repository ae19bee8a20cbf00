// =============================================================================
// Currency Normalization — hourly-refreshed rate cache with static fallback
// =============================================================================
//
// Every Quote carries its native currency. Display conversion always goes
// through this cache; when the cache is empty or older than its configured
// staleness age, a hard-coded fallback table is used instead and the
// conversion result is tagged `approximate`.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Conversion result plus whether it came from the live cache or the
/// static fallback table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertedAmount {
    pub value: f64,
    pub approximate: bool,
}

/// Static fallback rates (to USD), used only when the live cache is empty
/// or stale. Deliberately coarse — this exists so the engine degrades
/// gracefully, not so it's ever treated as authoritative.
fn fallback_rate_to_usd(currency: &str) -> Option<f64> {
    match currency {
        "USD" => Some(1.0),
        "EUR" => Some(1.08),
        "GBP" => Some(1.27),
        "JPY" => Some(0.0068),
        "USDT" | "USDC" | "BUSD" => Some(1.0),
        _ => None,
    }
}

struct RateEntry {
    rate_to_usd: f64,
    fetched_at: Instant,
}

/// Hourly-refreshed currency rate cache. The refresh itself is driven by an
/// external periodic task calling `refresh`; this type only holds state and
/// answers conversion queries.
pub struct CurrencyCache {
    rates: RwLock<HashMap<String, RateEntry>>,
    max_age: Duration,
}

impl CurrencyCache {
    pub fn new(max_age: Duration) -> Self {
        Self { rates: RwLock::new(HashMap::new()), max_age }
    }

    /// Replace the cached rate-to-USD for `currency`. Called by the
    /// periodic refresh task with freshly fetched rates.
    pub fn update(&self, currency: &str, rate_to_usd: f64) {
        self.rates
            .write()
            .insert(currency.to_string(), RateEntry { rate_to_usd, fetched_at: Instant::now() });
        debug!(currency, rate_to_usd, "currency rate refreshed");
    }

    /// Convert `amount` denominated in `from_currency` to USD.
    pub fn to_usd(&self, amount: f64, from_currency: &str) -> ConvertedAmount {
        if from_currency.eq_ignore_ascii_case("USD") {
            return ConvertedAmount { value: amount, approximate: false };
        }

        if let Some(entry) = self.rates.read().get(from_currency) {
            if entry.fetched_at.elapsed() <= self.max_age {
                return ConvertedAmount { value: amount * entry.rate_to_usd, approximate: false };
            }
        }

        match fallback_rate_to_usd(from_currency) {
            Some(rate) => {
                warn!(currency = from_currency, "currency cache stale or empty, using fallback table");
                ConvertedAmount { value: amount * rate, approximate: true }
            }
            None => {
                warn!(currency = from_currency, "no fallback rate available, returning unconverted amount");
                ConvertedAmount { value: amount, approximate: true }
            }
        }
    }
}

impl Default for CurrencyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_is_always_identity() {
        let cache = CurrencyCache::default();
        let c = cache.to_usd(100.0, "USD");
        assert_eq!(c.value, 100.0);
        assert!(!c.approximate);
    }

    #[test]
    fn fresh_cache_entry_is_not_approximate() {
        let cache = CurrencyCache::new(Duration::from_secs(3600));
        cache.update("EUR", 1.10);
        let c = cache.to_usd(100.0, "EUR");
        assert!((c.value - 110.0).abs() < 1e-9);
        assert!(!c.approximate);
    }

    #[test]
    fn stale_entry_falls_back_to_static_table() {
        let cache = CurrencyCache::new(Duration::from_millis(1));
        cache.update("EUR", 1.50);
        std::thread::sleep(Duration::from_millis(5));
        let c = cache.to_usd(100.0, "EUR");
        assert!(c.approximate);
        assert!((c.value - 108.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_currency_with_no_cache_is_approximate_passthrough() {
        let cache = CurrencyCache::default();
        let c = cache.to_usd(50.0, "XYZ");
        assert!(c.approximate);
        assert_eq!(c.value, 50.0);
    }
}
