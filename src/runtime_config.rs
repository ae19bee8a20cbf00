// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub. Every tunable parameter lives here so the
// engine can be reconfigured without a restart. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an
// older config file — only a structurally invalid file fails to load.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::llm::TaskClass;
use crate::types::TradingMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_crypto_assets() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_equity_assets() -> Vec<String> {
    vec!["AAPL".to_string(), "MSFT".to_string()]
}

// Conservative defaults per spec Open Questions: 15% / 3 trades per day,
// with the looser documented alternative (20% / 5) exposed alongside rather
// than guessed at.
fn default_max_position_pct() -> f64 {
    15.0
}
fn default_max_position_pct_aggressive() -> f64 {
    20.0
}
fn default_stop_loss_pct() -> f64 {
    -10.0
}
fn default_stop_warning_pct() -> f64 {
    -8.0
}
fn default_take_profit_pct() -> f64 {
    20.0
}
fn default_major_gain_pct() -> f64 {
    15.0
}
fn default_max_hold_hours() -> f64 {
    10.0
}
fn default_max_trades_per_day() -> u32 {
    3
}
fn default_max_trades_per_day_aggressive() -> u32 {
    5
}
fn default_max_consecutive_losses() -> u32 {
    5
}
fn default_max_daily_loss_pct() -> f64 {
    3.0
}
fn default_max_drawdown_pct() -> f64 {
    5.0
}
fn default_min_gap_between_opens_secs() -> u64 {
    60
}

fn default_baseline_window_secs() -> u64 {
    3600
}
fn default_debounce_secs() -> u64 {
    300
}

fn default_llm_wall_clock_budget_secs() -> u64 {
    30
}
fn default_llm_pool_size() -> usize {
    4
}
fn default_task_map() -> HashMap<TaskClass, Vec<String>> {
    let mut m = HashMap::new();
    m.insert(TaskClass::Lightweight, vec!["local-rules".to_string(), "stub-small".to_string()]);
    m.insert(TaskClass::Standard, vec!["stub-standard".to_string(), "stub-small".to_string()]);
    m.insert(TaskClass::Complex, vec!["stub-complex".to_string(), "stub-standard".to_string()]);
    m
}

fn default_entry_threshold() -> f64 {
    0.6
}

fn default_sl_atr_multiplier() -> f64 {
    1.5
}
fn default_tp1_atr_multiplier() -> f64 {
    2.5
}
fn default_tp2_atr_multiplier() -> f64 {
    4.0
}
fn default_min_sl_pct() -> f64 {
    0.4
}
fn default_min_tp1_pct() -> f64 {
    0.6
}
fn default_min_tp2_pct() -> f64 {
    1.0
}

// =============================================================================
// Section structs
// =============================================================================

/// Per-asset-class lists of monitored instruments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_equity_assets")]
    pub equity: Vec<String>,
    #[serde(default = "default_crypto_assets")]
    pub crypto: Vec<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            equity: default_equity_assets(),
            crypto: default_crypto_assets(),
        }
    }
}

/// Position risk configuration, shared identically between live tracking
/// (C6) and backtesting (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    /// Looser alternative from the source documents, exposed but not
    /// used by default. See Open Questions.
    #[serde(default = "default_max_position_pct_aggressive")]
    pub max_position_pct_aggressive: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_stop_warning_pct")]
    pub stop_warning_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_major_gain_pct")]
    pub major_gain_pct: f64,
    #[serde(default = "default_max_hold_hours")]
    pub max_hold_hours: f64,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    #[serde(default = "default_max_trades_per_day_aggressive")]
    pub max_trades_per_day_aggressive: u32,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_min_gap_between_opens_secs")]
    pub min_gap_between_opens_secs: u64,
    #[serde(default)]
    pub fee_rate_pct: f64,
    #[serde(default)]
    pub slippage_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_pct: default_max_position_pct(),
            max_position_pct_aggressive: default_max_position_pct_aggressive(),
            stop_loss_pct: default_stop_loss_pct(),
            stop_warning_pct: default_stop_warning_pct(),
            take_profit_pct: default_take_profit_pct(),
            major_gain_pct: default_major_gain_pct(),
            max_hold_hours: default_max_hold_hours(),
            max_trades_per_day: default_max_trades_per_day(),
            max_trades_per_day_aggressive: default_max_trades_per_day_aggressive(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            min_gap_between_opens_secs: default_min_gap_between_opens_secs(),
            fee_rate_pct: 0.1,
            slippage_pct: 0.1,
        }
    }
}

/// Anomaly detector baseline/debounce configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Rolling baseline horizon. Not explicitly specified upstream; 60
    /// minutes is used as a reasonable, configurable default.
    #[serde(default = "default_baseline_window_secs")]
    pub baseline_window_secs: u64,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            baseline_window_secs: default_baseline_window_secs(),
            debounce_secs: default_debounce_secs(),
        }
    }
}

/// Task-class to provider-fallback-chain map, plus call-budget knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_task_map")]
    pub task_map: HashMap<TaskClass, Vec<String>>,
    #[serde(default = "default_llm_wall_clock_budget_secs")]
    pub wall_clock_budget_secs: u64,
    #[serde(default = "default_llm_pool_size")]
    pub pool_size: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            task_map: default_task_map(),
            wall_clock_budget_secs: default_llm_wall_clock_budget_secs(),
            pool_size: default_llm_pool_size(),
        }
    }
}

/// Chat allow-list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: Vec<String>,
}

/// A single analysis-cadence mode (short_term or long_term).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub cadence_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModesConfig {
    #[serde(default = "default_short_term_mode")]
    pub short_term: ModeEntry,
    #[serde(default = "default_long_term_mode")]
    pub long_term: ModeEntry,
}

fn default_short_term_mode() -> ModeEntry {
    ModeEntry { enabled: true, cadence_secs: 5 }
}
fn default_long_term_mode() -> ModeEntry {
    ModeEntry { enabled: true, cadence_secs: 15 }
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            short_term: default_short_term_mode(),
            long_term: default_long_term_mode(),
        }
    }
}

/// Tunable parameters for stop/target sizing and the aggregator threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(default = "default_sl_atr_multiplier")]
    pub sl_atr_multiplier: f64,
    #[serde(default = "default_tp1_atr_multiplier")]
    pub tp1_atr_multiplier: f64,
    #[serde(default = "default_tp2_atr_multiplier")]
    pub tp2_atr_multiplier: f64,
    #[serde(default = "default_min_sl_pct")]
    pub min_sl_pct: f64,
    #[serde(default = "default_min_tp1_pct")]
    pub min_tp1_pct: f64,
    #[serde(default = "default_min_tp2_pct")]
    pub min_tp2_pct: f64,
    /// Minimum aggregate confidence to produce a non-hold decision.
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,
    #[serde(default)]
    pub enable_breakout: bool,
    #[serde(default)]
    pub enable_ma_cross_rsi: bool,
    #[serde(default)]
    pub enable_momentum_reversal: bool,
    #[serde(default)]
    pub enable_order_flow_anomaly: bool,
    #[serde(default)]
    pub enable_news_momentum: bool,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            sl_atr_multiplier: default_sl_atr_multiplier(),
            tp1_atr_multiplier: default_tp1_atr_multiplier(),
            tp2_atr_multiplier: default_tp2_atr_multiplier(),
            min_sl_pct: default_min_sl_pct(),
            min_tp1_pct: default_min_tp1_pct(),
            min_tp2_pct: default_min_tp2_pct(),
            entry_threshold: default_entry_threshold(),
            enable_breakout: true,
            enable_ma_cross_rsi: true,
            enable_momentum_reversal: true,
            enable_order_flow_anomaly: true,
            enable_news_momentum: true,
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Supervisor-level kill switch: Live, Paused, or Killed.
    #[serde(default)]
    pub engine_mode: TradingMode,

    #[serde(default)]
    pub modes: ModesConfig,

    #[serde(default)]
    pub assets: AssetsConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub strategy_params: StrategyParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine_mode: TradingMode::Paused,
            modes: ModesConfig::default(),
            assets: AssetsConfig::default(),
            risk: RiskConfig::default(),
            anomaly: AnomalyConfig::default(),
            llm: LlmConfig::default(),
            auth: AuthConfig::default(),
            strategy_params: StrategyParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            engine_mode = %config.engine_mode,
            crypto_assets = ?config.assets.crypto,
            equity_assets = ?config.assets.equity,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename) so a crash mid-write never corrupts
    /// the config file on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_conservative_risk_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.engine_mode, TradingMode::Paused);
        assert!((cfg.risk.max_position_pct - 15.0).abs() < f64::EPSILON);
        assert!((cfg.risk.max_position_pct_aggressive - 20.0).abs() < f64::EPSILON);
        assert_eq!(cfg.risk.max_trades_per_day, 3);
        assert_eq!(cfg.risk.max_trades_per_day_aggressive, 5);
        assert!((cfg.risk.stop_loss_pct - (-10.0)).abs() < f64::EPSILON);
        assert!((cfg.risk.stop_warning_pct - (-8.0)).abs() < f64::EPSILON);
        assert!((cfg.risk.take_profit_pct - 20.0).abs() < f64::EPSILON);
        assert!((cfg.risk.major_gain_pct - 15.0).abs() < f64::EPSILON);
        assert!((cfg.risk.max_hold_hours - 10.0).abs() < f64::EPSILON);
        assert_eq!(cfg.anomaly.baseline_window_secs, 3600);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.engine_mode, TradingMode::Paused);
        assert_eq!(cfg.modes.short_term.cadence_secs, 5);
        assert_eq!(cfg.modes.long_term.cadence_secs, 15);
        assert_eq!(cfg.risk.max_trades_per_day, 3);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "engine_mode": "Live", "assets": { "crypto": ["ETHUSDT"] } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.engine_mode, TradingMode::Live);
        assert_eq!(cfg.assets.crypto, vec!["ETHUSDT"]);
        assert!(!cfg.assets.equity.is_empty());
        assert_eq!(cfg.risk.max_consecutive_losses, 5);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.assets.crypto, cfg2.assets.crypto);
        assert_eq!(cfg.risk.max_position_pct, cfg2.risk.max_position_pct);
        assert_eq!(cfg.engine_mode, cfg2.engine_mode);
    }

    #[test]
    fn enum_mode_assignment_compatible() {
        let mut cfg = RuntimeConfig::default();
        cfg.engine_mode = TradingMode::Killed;
        assert_eq!(cfg.engine_mode, TradingMode::Killed);
    }
}
