// =============================================================================
// Central Application State
// =============================================================================
//
// The single source of truth the engine's subsystems share. Every field is
// either an atomic counter, a `parking_lot::RwLock` around a plain
// collection, or an `Arc` to a subsystem that already manages its own
// interior mutability (`MarketDataFanIn`, `PositionTracker`,
// `AnomalyDetector`, `LlmRouter`, `CurrencyCache`). AppState itself owns no
// business logic — it only wires subsystems together and renders the
// operator-facing snapshot.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::anomaly::AnomalyDetector;
use crate::llm::LlmRouter;
use crate::market_data::{CurrencyCache, MarketDataFanIn};
use crate::pipeline::{AdviceHistory, AssetSnapshot};
use crate::position::PositionTracker;
use crate::runtime_config::RuntimeConfig;
use crate::strategies::StrategyRecord;
use crate::types::PortfolioSnapshot;

/// Cap on the in-memory recent-error ring kept for the dashboard. Errors
/// older than this are dropped; they're logged via `tracing` regardless.
const ERROR_LOG_CAPACITY: usize = 200;

/// A single recorded error for the operator-facing error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub at: String,
    pub kind: String,
    pub message: String,
}

/// Top-level engine state, shared behind an `Arc` by every task and HTTP
/// handler. Fields the REST/WS surface reads are plain `RwLock`s so a
/// snapshot never blocks the tick loops for longer than a clone.
pub struct AppState {
    /// Config path this instance was loaded from / saves back to.
    pub config_path: std::path::PathBuf,
    pub runtime_config: RwLock<RuntimeConfig>,

    pub market_data: Arc<MarketDataFanIn>,
    pub currency: Arc<CurrencyCache>,
    pub anomaly_detector: Arc<AnomalyDetector>,
    pub llm_router: Arc<LlmRouter>,
    pub positions: Arc<PositionTracker>,
    pub strategies: Vec<StrategyRecord>,
    pub advice_history: AdviceHistory,

    /// Latest computed view per asset, written by the owning pipeline task.
    pub asset_snapshots: RwLock<HashMap<String, AssetSnapshot>>,
    pub recent_errors: RwLock<VecDeque<ErrorRecord>>,

    /// Monotonic counter bumped on every state mutation the WS feed cares
    /// about, so a client can tell whether a poll returned anything new.
    state_version: AtomicU64,
    pub ws_sequence_number: AtomicU64,
    pub ws_user_connected: RwLock<bool>,
    pub last_ws_user_event: RwLock<Instant>,

    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config_path: std::path::PathBuf,
        runtime_config: RuntimeConfig,
        market_data: Arc<MarketDataFanIn>,
        currency: Arc<CurrencyCache>,
        anomaly_detector: Arc<AnomalyDetector>,
        llm_router: Arc<LlmRouter>,
        positions: Arc<PositionTracker>,
        strategies: Vec<StrategyRecord>,
    ) -> Self {
        Self {
            config_path,
            runtime_config: RwLock::new(runtime_config),
            market_data,
            currency,
            anomaly_detector,
            llm_router,
            positions,
            strategies,
            advice_history: AdviceHistory::new(),
            asset_snapshots: RwLock::new(HashMap::new()),
            recent_errors: RwLock::new(VecDeque::with_capacity(ERROR_LOG_CAPACITY)),
            state_version: AtomicU64::new(0),
            ws_sequence_number: AtomicU64::new(0),
            ws_user_connected: RwLock::new(false),
            last_ws_user_event: RwLock::new(Instant::now()),
            start_time: Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    /// Record an error for the dashboard log, trimming the oldest entry
    /// once the ring fills. Does not itself log via `tracing` — callers are
    /// expected to have already logged with full context at the call site.
    pub fn push_error(&self, kind: impl Into<String>, message: impl Into<String>) {
        let mut log = self.recent_errors.write();
        if log.len() >= ERROR_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(ErrorRecord {
            at: chrono::Utc::now().to_rfc3339(),
            kind: kind.into(),
            message: message.into(),
        });
    }

    /// Persist the runtime config back to disk using its atomic save.
    pub fn save_config(&self) -> anyhow::Result<()> {
        self.runtime_config.read().save(&self.config_path)
    }

    /// Build the full operator-facing snapshot served by the REST/WS API.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = self.runtime_config.read();
        let portfolio = self.positions.portfolio();
        let snapshots = self.asset_snapshots.read();
        let errors = self.recent_errors.read();

        StateSnapshot {
            state_version: self.current_state_version(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            engine_mode: config.engine_mode,
            portfolio,
            assets: snapshots.values().cloned().collect(),
            recent_errors: errors.iter().cloned().collect(),
        }
    }
}

/// Serializable top-level snapshot rendered by the REST state endpoint and
/// pushed over the WebSocket feed. `state_version` lets a client cheaply
/// tell whether anything changed since its last poll.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub uptime_secs: u64,
    pub engine_mode: crate::types::TradingMode,
    pub portfolio: PortfolioSnapshot,
    pub assets: Vec<AssetSnapshot>,
    pub recent_errors: Vec<ErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RiskConfig;

    fn test_state() -> AppState {
        AppState::new(
            std::path::PathBuf::from("/tmp/aurora-test-config.json"),
            RuntimeConfig::default(),
            Arc::new(MarketDataFanIn::new()),
            Arc::new(CurrencyCache::new(std::time::Duration::from_secs(3600))),
            Arc::new(AnomalyDetector::new(3600, 300)),
            Arc::new(LlmRouter::new(vec![], HashMap::new(), 30)),
            Arc::new(PositionTracker::new(RiskConfig::default())),
            Vec::new(),
        )
    }

    #[test]
    fn version_increments_monotonically() {
        let state = test_state();
        assert_eq!(state.current_state_version(), 0);
        assert_eq!(state.increment_version(), 1);
        assert_eq!(state.increment_version(), 2);
        assert_eq!(state.current_state_version(), 2);
    }

    #[test]
    fn error_log_trims_to_capacity() {
        let state = test_state();
        for i in 0..(ERROR_LOG_CAPACITY + 10) {
            state.push_error("test", format!("error {i}"));
        }
        assert_eq!(state.recent_errors.read().len(), ERROR_LOG_CAPACITY);
    }

    #[test]
    fn snapshot_reflects_engine_mode() {
        let state = test_state();
        let snap = state.build_snapshot();
        assert_eq!(snap.engine_mode, crate::types::TradingMode::Paused);
    }
}
