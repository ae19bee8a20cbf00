// =============================================================================
// Shared types used across the Aurora trading assistant
// =============================================================================

use serde::{Deserialize, Serialize};

/// Broad category of tradable instrument. Determines which market-data
/// adapter chain, currency, and quantity rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Crypto,
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equity => write!(f, "equity"),
            Self::Crypto => write!(f, "crypto"),
        }
    }
}

/// An identifier plus asset class. Identifier scheme is class-dependent:
/// numeric codes for some equity markets, exchange-prefixed pairs for crypto.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub class: AssetClass,
    pub id: String,
}

impl Asset {
    pub fn new(class: AssetClass, id: impl Into<String>) -> Self {
        Self { class, id: id.into() }
    }

    pub fn crypto(id: impl Into<String>) -> Self {
        Self::new(AssetClass::Crypto, id)
    }

    pub fn equity(id: impl Into<String>) -> Self {
        Self::new(AssetClass::Equity, id)
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// Balance snapshot for a single currency/asset in the simulated ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Side of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Whether the engine is actively trading, paused, or killed. This is the
/// supervisor-level kill switch, distinct from per-mode cadence selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Cadence mode the analysis pipeline runs at for a given asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    ShortTerm,
    LongTerm,
}

impl AnalysisMode {
    pub fn default_cadence_secs(self) -> u64 {
        match self {
            Self::ShortTerm => 5,
            Self::LongTerm => 15,
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortTerm => write!(f, "short_term"),
            Self::LongTerm => write!(f, "long_term"),
        }
    }
}

/// A quote for an asset from a single market-data adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub asset: Asset,
    /// RFC3339 timestamp of this quote.
    pub timestamp: String,
    pub price: f64,
    pub volume_window: f64,
    pub change_24h_pct: f64,
    pub currency: String,
    /// Adapter tag that served this quote (for failover auditing).
    pub source_adapter: String,
    /// Age of the data behind this quote, in seconds. Zero for a live read.
    pub age_secs: u64,
    /// Set when this quote was served from a stale/last-known-good cache
    /// rather than a fresh read.
    pub stale: bool,
}

/// Bar width for a Series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarWidth {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
}

impl BarWidth {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        }
    }
}

impl std::fmt::Display for BarWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity tier of an anomaly event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Kind of anomaly detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    PriceJump,
    VolumeSpike,
    IndicatorDivergence,
    Breakout,
    SentimentShift,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriceJump => write!(f, "price_jump"),
            Self::VolumeSpike => write!(f, "volume_spike"),
            Self::IndicatorDivergence => write!(f, "indicator_divergence"),
            Self::Breakout => write!(f, "breakout"),
            Self::SentimentShift => write!(f, "sentiment_shift"),
        }
    }
}

/// An anomaly event emitted by the Anomaly Detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub asset: Asset,
    pub timestamp: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub score: f64,
    pub context: String,
}

/// Recommended trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for AdviceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Where a piece of advice originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceSource {
    Rules,
    Llm,
}

/// A tiered take-profit target: close `fraction` of the position once
/// unrealized return reaches `trigger_pct`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TakeProfitTier {
    pub trigger_pct: f64,
    pub fraction: f64,
}

/// A piece of structured trading advice produced by the Analysis Pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advice {
    pub asset: Asset,
    pub action: AdviceAction,
    pub confidence: f64,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_tiers: Vec<TakeProfitTier>,
    pub reasoning_text: String,
    pub source: AdviceSource,
    pub generated_at: String,
}

/// Cause of a position mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeCause {
    User,
    StopLoss,
    TakeProfit,
    Timeout,
    StrategySignal,
    BacktestEnd,
}

impl std::fmt::Display for TradeCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TakeProfit => write!(f, "take_profit"),
            Self::Timeout => write!(f, "timeout"),
            Self::StrategySignal => write!(f, "strategy_signal"),
            Self::BacktestEnd => write!(f, "backtest_end"),
        }
    }
}

/// A single tracked position. Stop/target prices are derived from entry at
/// open-time and never recomputed during the position's life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub asset: Asset,
    pub side: Side,
    pub quantity_remaining: f64,
    pub original_quantity: f64,
    pub entry_price: f64,
    pub entry_time: String,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    #[serde(default)]
    pub realized_pnl: f64,
    pub closed: bool,
    /// Current mark price, last set by `mark()`. Used for unrealized P&L.
    #[serde(default)]
    pub last_mark_price: f64,
    /// Alert idempotence: which one-shot threshold alerts have already fired.
    #[serde(default)]
    pub stop_warning_fired: bool,
    #[serde(default)]
    pub major_gain_fired: bool,
    /// Tiered take-profit targets not yet triggered. Only populated when the
    /// opening strategy signal declared tiered exits; empty otherwise, in
    /// which case the position exits solely via the fixed stop/target rules.
    #[serde(default)]
    pub pending_tiers: Vec<TakeProfitTier>,
}

/// Immutable append-only log entry of an open/adjust/close event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: String,
    pub asset: Asset,
    pub side: Side,
    pub action: TradeAction,
    pub quantity: f64,
    pub price: f64,
    pub cause: TradeCause,
    pub timestamp: String,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
}

/// Kind of mutation a trade record documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Open,
    PartialClose,
    Close,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::PartialClose => write!(f, "partial_close"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Alert emitted by the Position Tracker on a threshold crossing. Idempotent
/// per (position, threshold) — `stop_loss_warning` and `major_gain` fire at
/// most once per position life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAlert {
    pub position_id: String,
    pub asset: Asset,
    pub kind: AlertKind,
    pub unrealized_return_pct: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    StopLossWarning,
    MajorGain,
}

/// Derived view: positions grouped by asset class, marked to the latest
/// quote, with win-rate and total P&L from the trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// One entry per asset class that has ever held a position. A plain
    /// `Vec` (not a map keyed by `AssetClass`) since JSON object keys must
    /// be strings and the class is cheap to carry alongside its summary.
    pub by_class: Vec<ClassSummary>,
    pub total_unrealized_pnl: f64,
    pub total_realized_pnl: f64,
    pub win_rate: f64,
    pub open_position_count: usize,
    pub closed_trade_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class: AssetClass,
    pub open_position_count: usize,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

/// Closed set of conversation-router intents (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Buy,
    Sell,
    AskAdvice,
    CheckPosition,
    PortfolioAdjust,
    MarketAnalysis,
    RunBacktest,
    Chat,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::AskAdvice => write!(f, "ask_advice"),
            Self::CheckPosition => write!(f, "check_position"),
            Self::PortfolioAdjust => write!(f, "portfolio_adjust"),
            Self::MarketAnalysis => write!(f, "market_analysis"),
            Self::RunBacktest => write!(f, "run_backtest"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

/// Typed, optional arguments extracted from a user utterance. Missing
/// required slots (per intent kind) trigger a clarification response rather
/// than a wrong-guess execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Slots {
    pub asset: Option<Asset>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub date_range: Option<String>,
    pub strategy_name: Option<String>,
    pub time_horizon: Option<String>,
    pub initial_capital: Option<f64>,
}

/// An ephemeral per-message value: a classified intent plus its extracted
/// slots and the rule-pass confidence that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub slots: Slots,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_display() {
        let a = Asset::crypto("BTCUSDT");
        assert_eq!(a.to_string(), "crypto:BTCUSDT");
    }

    #[test]
    fn trading_mode_default_is_paused() {
        assert_eq!(TradingMode::default(), TradingMode::Paused);
    }

    #[test]
    fn analysis_mode_cadence() {
        assert_eq!(AnalysisMode::ShortTerm.default_cadence_secs(), 5);
        assert_eq!(AnalysisMode::LongTerm.default_cadence_secs(), 15);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Warn);
        assert!(Severity::Warn > Severity::Info);
    }
}
