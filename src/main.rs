// =============================================================================
// aurora-assistant — entry point
// =============================================================================
//
// Wires the nine components together and hands every long-running task to
// the Supervisor (C9): one restartable pipeline unit per (asset, enabled
// cadence mode), a currency-refresh unit, a chat-listener placeholder, and
// the axum API server. Shutdown is cooperative — Ctrl-C flips the shared
// `watch` signal and every unit gets a bounded drain before the process
// exits.
// =============================================================================

mod anomaly;
mod api;
mod app_state;
mod backtest;
mod binance;
mod conversation;
mod errors;
mod indicators;
mod llm;
mod market_data;
mod pipeline;
mod position;
mod runtime_config;
mod strategies;
mod supervisor;
mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use binance::client::BinanceClient;
use llm::provider::{LlmProvider, StubProvider};
use llm::LlmRouter;
use market_data::adapters::{BinanceAdapter, SyntheticEquityAdapter};
use market_data::{CurrencyCache, MarketDataFanIn};
use runtime_config::RuntimeConfig;
use types::{AnalysisMode, Asset, AssetClass};

const DEFAULT_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::path::PathBuf::from(
        std::env::var("AURORA_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    let runtime_config = match RuntimeConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "no usable runtime config found, starting from conservative defaults");
            RuntimeConfig::default()
        }
    };

    let mut fanin = MarketDataFanIn::new();
    fanin.register(AssetClass::Crypto, Arc::new(BinanceAdapter::new(BinanceClient::new())));
    fanin.register(AssetClass::Equity, Arc::new(SyntheticEquityAdapter::new()));
    let market_data = Arc::new(fanin);

    let currency = Arc::new(CurrencyCache::new(std::time::Duration::from_secs(3600)));

    let anomaly_detector = Arc::new(anomaly::AnomalyDetector::new(
        runtime_config.anomaly.baseline_window_secs,
        runtime_config.anomaly.debounce_secs,
    ));

    let providers: Vec<Arc<dyn LlmProvider>> = vec![
        Arc::new(StubProvider::new("local-rules")),
        Arc::new(StubProvider::new("stub-small")),
        Arc::new(StubProvider::new("stub-standard")),
        Arc::new(StubProvider::new("stub-complex")),
    ];
    let llm_router = Arc::new(LlmRouter::new(
        providers,
        runtime_config.llm.task_map.clone(),
        runtime_config.llm.wall_clock_budget_secs,
    ));

    let positions = Arc::new(position::PositionTracker::new(runtime_config.risk.clone()));
    let strategies = strategies::default_strategies();

    let assets: Vec<Asset> = runtime_config
        .assets
        .crypto
        .iter()
        .map(|id| Asset::crypto(id.clone()))
        .chain(runtime_config.assets.equity.iter().map(|id| Asset::equity(id.clone())))
        .collect();

    let modes = runtime_config.modes.clone();

    let state = Arc::new(AppState::new(
        config_path.clone(),
        runtime_config,
        market_data,
        currency,
        anomaly_detector,
        llm_router,
        positions,
        strategies,
    ));

    let supervisor = Arc::new(supervisor::Supervisor::new());
    let pidfile = supervisor::default_pidfile_path();
    if let Err(e) = supervisor::write_pidfile(&pidfile) {
        warn!(error = %e, "failed to write pidfile");
    }

    for asset in &assets {
        for (mode, entry) in [(AnalysisMode::ShortTerm, &modes.short_term), (AnalysisMode::LongTerm, &modes.long_term)] {
            if !entry.enabled {
                continue;
            }
            let unit_name = format!("pipeline:{asset}:{mode}");
            let cadence = entry.cadence_secs;
            let asset = asset.clone();
            let state = state.clone();
            supervisor.spawn_unit(unit_name, move || {
                pipeline::run_asset_loop(state.clone(), asset.clone(), mode, cadence)
            });
        }
    }

    {
        let state = state.clone();
        supervisor.spawn_unit("currency-refresh", move || {
            let state = state.clone();
            async move { refresh_currency_rates(&state).await }
        });
    }

    // The chat transport itself (a concrete messaging platform) is external
    // to this engine; this unit stands in for it so the supervised-unit
    // wiring is exercised even with no transport configured. A real
    // deployment swaps this closure for whatever delivers inbound messages
    // from the actual chat platform into `conversation::handle_message`.
    {
        supervisor.spawn_unit("chat-listener", move || async move {
            std::future::pending::<()>().await;
        });
    }

    let app = api::rest::router(state.clone());
    let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "aurora-assistant listening");

    tokio::select! {
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                warn!(error = %e, "API server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    supervisor.request_shutdown();
    if let Err(e) = state.save_config() {
        warn!(error = %e, "failed to persist runtime config on shutdown");
    }
    supervisor::remove_pidfile(&pidfile);

    // Give supervised units a moment to observe the shutdown signal and
    // drain before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    Ok(())
}

/// Periodically refresh the USD conversion table the currency cache serves.
/// A fixed table stands in for a live FX-rate vendor, same rationale as the
/// synthetic equity adapter: this engine carries no external FX feed.
async fn refresh_currency_rates(state: &Arc<AppState>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
    let rates: HashMap<&str, f64> = HashMap::from([
        ("USD", 1.0),
        ("USDT", 1.0),
        ("USDC", 1.0),
        ("EUR", 1.08),
        ("GBP", 1.27),
        ("JPY", 0.0068),
    ]);
    loop {
        interval.tick().await;
        for (currency, rate) in &rates {
            state.currency.update(currency, *rate);
        }
        info!("currency rate table refreshed");
    }
}
