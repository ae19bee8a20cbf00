// =============================================================================
// Market Data Fan-In — ordered adapter failover per asset class
// =============================================================================
//
// Exposes a single interface (`quote`, `series`, `subscribe`) on top of a
// per-asset-class ordered adapter chain. A call tries adapters in order;
// a failure of any kind (network, rate-limit, stale, schema) is logged with
// the adapter tag and the next adapter is tried. Surviving failures fall
// back to the last-known-good quote if it is still within the staleness
// limit, otherwise the call fails with `SourceUnavailable`.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::market_data::Candle;
use crate::types::{Asset, AssetClass, BarWidth, Quote};

/// Hard ceiling past which a last-known-good quote is no longer servable
/// even as a stale fallback.
const HARD_STALENESS_LIMIT_SECS: u64 = 600;

// -----------------------------------------------------------------------
// Adapter trait
// -----------------------------------------------------------------------

/// One market-data source for a single asset class. Implementors own their
/// own transport, auth, and per-request timeout; the fan-in owns ordering,
/// rate limiting, and last-known-good fallback.
#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    /// Short tag recorded on every `Quote` this adapter serves, e.g. "binance",
    /// "synthetic-equity".
    fn tag(&self) -> &str;

    /// Currency this adapter's prices are natively denominated in.
    fn native_currency(&self) -> &str;

    /// Age beyond which this adapter's own data is considered stale.
    fn staleness_bound_secs(&self) -> u64;

    /// Requests-per-minute quota this adapter is allowed to spend, already
    /// reduced by a safety margin from the documented upstream quota.
    fn rate_quota_per_min(&self) -> u32;

    async fn quote(&self, asset: &Asset) -> Result<Quote, EngineError>;

    async fn series(&self, asset: &Asset, bar: BarWidth, count: usize) -> Result<Vec<Candle>, EngineError>;
}

// -----------------------------------------------------------------------
// Token bucket
// -----------------------------------------------------------------------

/// Simple per-adapter token bucket. Refills continuously at
/// `quota_per_min / 60` tokens per second, capped at `quota_per_min`.
pub struct TokenBucket {
    capacity: u32,
    refill_per_sec: f64,
    tokens: AtomicU64,
    last_refill_millis: AtomicU64,
    start: Instant,
}

impl TokenBucket {
    pub fn new(quota_per_min: u32) -> Self {
        let capacity = quota_per_min.max(1);
        Self {
            capacity,
            refill_per_sec: capacity as f64 / 60.0,
            tokens: AtomicU64::new((capacity as u64) << 16),
            last_refill_millis: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn refill(&self) {
        let now_millis = self.start.elapsed().as_millis() as u64;
        let last = self.last_refill_millis.load(Ordering::Relaxed);
        let elapsed_ms = now_millis.saturating_sub(last);
        if elapsed_ms == 0 {
            return;
        }
        self.last_refill_millis.store(now_millis, Ordering::Relaxed);
        let added = (elapsed_ms as f64 / 1000.0 * self.refill_per_sec * 65536.0) as u64;
        if added == 0 {
            return;
        }
        let cap_fixed = (self.capacity as u64) << 16;
        self.tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                Some((t + added).min(cap_fixed))
            })
            .ok();
    }

    /// Try to withdraw a single token. Returns `true` on success.
    pub fn try_acquire(&self) -> bool {
        self.refill();
        let unit = 1u64 << 16;
        self.tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                if t >= unit {
                    Some(t - unit)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Block (async) up to `deadline` for a token, polling at a fixed
    /// interval. Returns `false` if the deadline elapses first.
    pub async fn acquire_within(&self, deadline: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.try_acquire() {
                return true;
            }
            if started.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

// -----------------------------------------------------------------------
// Last-known-good cache entry
// -----------------------------------------------------------------------

struct CachedQuote {
    quote: Quote,
    fetched_at: Instant,
    /// The serving adapter's own `staleness_bound_secs()` at cache time,
    /// carried alongside the quote so a later stale-serve can be judged
    /// against the adapter that actually produced it, not a single
    /// crate-wide constant.
    adapter_bound_secs: u64,
}

// -----------------------------------------------------------------------
// Fan-in
// -----------------------------------------------------------------------

/// One adapter slot: the adapter itself plus its dedicated rate limiter.
struct AdapterSlot {
    adapter: Arc<dyn MarketDataAdapter>,
    bucket: TokenBucket,
}

/// Ordered adapter chains per asset class, with last-known-good fallback.
pub struct MarketDataFanIn {
    chains: HashMap<AssetClass, Vec<AdapterSlot>>,
    last_known_good: RwLock<HashMap<Asset, CachedQuote>>,
    rate_limit_deadline: Duration,
}

impl MarketDataFanIn {
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
            last_known_good: RwLock::new(HashMap::new()),
            rate_limit_deadline: Duration::from_millis(500),
        }
    }

    /// Append an adapter to the ordered chain for `class`. Adapters are
    /// tried in the order they're registered.
    pub fn register(&mut self, class: AssetClass, adapter: Arc<dyn MarketDataAdapter>) {
        let bucket = TokenBucket::new(adapter.rate_quota_per_min());
        self.chains.entry(class).or_default().push(AdapterSlot { adapter, bucket });
    }

    fn chain_for(&self, class: AssetClass) -> &[AdapterSlot] {
        self.chains.get(&class).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Fetch the current quote for `asset`, trying the class's adapter
    /// chain in order before falling back to last-known-good.
    pub async fn quote(&self, asset: &Asset) -> Result<Quote, EngineError> {
        for slot in self.chain_for(asset.class) {
            if !slot.bucket.acquire_within(self.rate_limit_deadline).await {
                warn!(asset = %asset, adapter = slot.adapter.tag(), "rate-limit bucket exhausted, skipping adapter");
                continue;
            }
            match slot.adapter.quote(asset).await {
                Ok(q) => {
                    self.last_known_good.write().insert(
                        asset.clone(),
                        CachedQuote {
                            quote: q.clone(),
                            fetched_at: Instant::now(),
                            adapter_bound_secs: slot.adapter.staleness_bound_secs(),
                        },
                    );
                    return Ok(q);
                }
                Err(e) => {
                    warn!(asset = %asset, adapter = slot.adapter.tag(), error = %e, "adapter failed, trying next");
                }
            }
        }

        self.last_known_good_quote(asset)
    }

    /// Serve the cached quote if it's still within the hard ceiling. The
    /// age is judged in two tiers: first against the *originating adapter's
    /// own* freshness bound (§4.1, §7 `StaleData`) — crossing that tier is
    /// logged and tagged on the served quote but not fatal — then against
    /// the hard ceiling all adapters share, past which nothing is servable.
    fn last_known_good_quote(&self, asset: &Asset) -> Result<Quote, EngineError> {
        let cache = self.last_known_good.read();
        if let Some(cached) = cache.get(asset) {
            let age_secs = cached.fetched_at.elapsed().as_secs();
            if age_secs > HARD_STALENESS_LIMIT_SECS {
                return Err(EngineError::SourceUnavailable(asset.to_string()));
            }
            if age_secs > cached.adapter_bound_secs {
                let stale = EngineError::StaleData { age_secs, limit_secs: cached.adapter_bound_secs };
                warn!(asset = %asset, error = %stale, adapter = %cached.quote.source_adapter, "serving quote past its adapter's freshness bound");
            }
            let mut q = cached.quote.clone();
            q.age_secs = age_secs;
            q.stale = true;
            debug!(asset = %asset, age_secs, "serving last-known-good quote");
            return Ok(q);
        }
        Err(EngineError::SourceUnavailable(asset.to_string()))
    }

    /// Fetch a bar series for `asset`, trying the class's adapter chain in
    /// order. No last-known-good fallback — a stale series is meaningless
    /// to indicator computation, so this call simply fails over.
    pub async fn series(&self, asset: &Asset, bar: BarWidth, count: usize) -> Result<Vec<Candle>, EngineError> {
        let mut last_err = EngineError::SourceUnavailable(asset.to_string());
        for slot in self.chain_for(asset.class) {
            if !slot.bucket.acquire_within(self.rate_limit_deadline).await {
                continue;
            }
            match slot.adapter.series(asset, bar, count).await {
                Ok(series) => return Ok(series),
                Err(e) => {
                    warn!(asset = %asset, adapter = slot.adapter.tag(), error = %e, "series fetch failed, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Name of the adapter that currently leads `class`'s chain (empty
    /// string if no adapters are registered).
    pub fn primary_adapter_tag(&self, class: AssetClass) -> &str {
        self.chain_for(class).first().map(|s| s.adapter.tag()).unwrap_or("")
    }
}

impl Default for MarketDataFanIn {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FlakyAdapter {
        tag: String,
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataAdapter for FlakyAdapter {
        fn tag(&self) -> &str {
            &self.tag
        }
        fn native_currency(&self) -> &str {
            "USD"
        }
        fn staleness_bound_secs(&self) -> u64 {
            30
        }
        fn rate_quota_per_min(&self) -> u32 {
            6000
        }

        async fn quote(&self, asset: &Asset) -> Result<Quote, EngineError> {
            if self.fail_times.fetch_sub(1, Ordering::Relaxed) > 0 {
                return Err(EngineError::TransientUpstream(format!("{} down", self.tag)));
            }
            Ok(Quote {
                asset: asset.clone(),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                price: 100.0,
                volume_window: 0.0,
                change_24h_pct: 0.0,
                currency: "USD".to_string(),
                source_adapter: self.tag.clone(),
                age_secs: 0,
                stale: false,
            })
        }

        async fn series(&self, _asset: &Asset, _bar: BarWidth, _count: usize) -> Result<Vec<Candle>, EngineError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn falls_over_to_next_adapter_on_failure() {
        let mut fanin = MarketDataFanIn::new();
        fanin.register(
            AssetClass::Crypto,
            Arc::new(FlakyAdapter { tag: "primary".into(), fail_times: AtomicUsize::new(99) }),
        );
        fanin.register(
            AssetClass::Crypto,
            Arc::new(FlakyAdapter { tag: "secondary".into(), fail_times: AtomicUsize::new(0) }),
        );

        let asset = Asset::crypto("BTCUSDT");
        let q = fanin.quote(&asset).await.unwrap();
        assert_eq!(q.source_adapter, "secondary");
    }

    #[tokio::test]
    async fn serves_last_known_good_when_all_adapters_fail() {
        let mut fanin = MarketDataFanIn::new();
        fanin.register(
            AssetClass::Crypto,
            Arc::new(FlakyAdapter { tag: "only".into(), fail_times: AtomicUsize::new(0) }),
        );
        let asset = Asset::crypto("ETHUSDT");
        let first = fanin.quote(&asset).await.unwrap();
        assert!(!first.stale);

        // Seed a fresh fan-in whose only adapter always fails, but whose
        // LKG cache already holds the quote fetched above.
        let mut broken = MarketDataFanIn::new();
        broken.register(
            AssetClass::Crypto,
            Arc::new(FlakyAdapter { tag: "only".into(), fail_times: AtomicUsize::new(99) }),
        );
        broken.last_known_good.write().insert(
            asset.clone(),
            CachedQuote { quote: first, fetched_at: Instant::now(), adapter_bound_secs: 30 },
        );
        let second = broken.quote(&asset).await.unwrap();
        assert!(second.stale);
        assert_eq!(second.source_adapter, "only");
    }

    #[tokio::test]
    async fn lkg_past_adapter_bound_but_within_hard_ceiling_still_serves() {
        let mut fanin = MarketDataFanIn::new();
        fanin.register(
            AssetClass::Crypto,
            Arc::new(FlakyAdapter { tag: "only".into(), fail_times: AtomicUsize::new(99) }),
        );
        let asset = Asset::crypto("ADAUSDT");
        let quote = Quote {
            asset: asset.clone(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            price: 1.0,
            volume_window: 0.0,
            change_24h_pct: 0.0,
            currency: "USD".to_string(),
            source_adapter: "only".to_string(),
            age_secs: 0,
            stale: false,
        };
        // adapter_bound_secs of 30 with a cache entry seeded "31s old" is
        // past the adapter's own bound but nowhere near the 600s hard
        // ceiling — should still be served, just tagged stale.
        fanin.last_known_good.write().insert(
            asset.clone(),
            CachedQuote {
                quote,
                fetched_at: Instant::now() - Duration::from_secs(31),
                adapter_bound_secs: 30,
            },
        );
        let served = fanin.quote(&asset).await.unwrap();
        assert!(served.stale);
        assert!(served.age_secs >= 31);
    }

    #[tokio::test]
    async fn lkg_past_hard_ceiling_is_source_unavailable() {
        let mut fanin = MarketDataFanIn::new();
        fanin.register(
            AssetClass::Crypto,
            Arc::new(FlakyAdapter { tag: "only".into(), fail_times: AtomicUsize::new(99) }),
        );
        let asset = Asset::crypto("XRPUSDT");
        let quote = Quote {
            asset: asset.clone(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            price: 1.0,
            volume_window: 0.0,
            change_24h_pct: 0.0,
            currency: "USD".to_string(),
            source_adapter: "only".to_string(),
            age_secs: 0,
            stale: false,
        };
        fanin.last_known_good.write().insert(
            asset.clone(),
            CachedQuote {
                quote,
                fetched_at: Instant::now() - Duration::from_secs(HARD_STALENESS_LIMIT_SECS + 1),
                adapter_bound_secs: 30,
            },
        );
        let err = fanin.quote(&asset).await.unwrap_err();
        assert!(matches!(err, EngineError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_asset_with_no_cache_is_source_unavailable() {
        let mut fanin = MarketDataFanIn::new();
        fanin.register(
            AssetClass::Crypto,
            Arc::new(FlakyAdapter { tag: "only".into(), fail_times: AtomicUsize::new(99) }),
        );
        let asset = Asset::crypto("DOGEUSDT");
        let err = fanin.quote(&asset).await.unwrap_err();
        matches!(err, EngineError::SourceUnavailable(_));
    }

    #[test]
    fn token_bucket_exhausts_and_refills() {
        let bucket = TokenBucket::new(60);
        for _ in 0..60 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }
}
