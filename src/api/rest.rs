// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::conversation::{self, InboundMessage};
use crate::errors::EngineError;
use crate::types::{Asset, AssetClass, TradingMode};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/portfolio", get(portfolio))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/api/v1/heartbeat", post(heartbeat))
        .route("/api/v1/trade-journal", get(trade_journal))
        .route("/api/v1/trade-journal/stats", get(trade_journal_stats))
        .route("/api/v1/chat", post(chat))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Positions / portfolio (authenticated)
// =============================================================================

#[derive(Deserialize, Default)]
struct PositionsQuery {
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

async fn positions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<PositionsQuery>,
) -> impl IntoResponse {
    let asset = match (q.class, q.id) {
        (Some(class), Some(id)) => match class.to_lowercase().as_str() {
            "crypto" => Some(Asset::new(AssetClass::Crypto, id)),
            "equity" => Some(Asset::new(AssetClass::Equity, id)),
            _ => None,
        },
        _ => None,
    };
    Json(state.positions.query(asset.as_ref()))
}

async fn portfolio(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.positions.portfolio())
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    engine_mode: String,
    message: String,
}

async fn control_pause(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.engine_mode = TradingMode::Paused;
    }
    state.increment_version();
    info!("trading paused via API");

    Json(ControlResponse {
        engine_mode: TradingMode::Paused.to_string(),
        message: "Trading paused".to_string(),
    })
}

async fn control_resume(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.engine_mode = TradingMode::Live;
    }
    state.increment_version();
    info!("trading resumed via API");

    Json(ControlResponse {
        engine_mode: TradingMode::Live.to_string(),
        message: "Trading resumed".to_string(),
    })
}

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.engine_mode = TradingMode::Killed;
    }
    state.increment_version();
    warn!("trading killed via API");

    Json(ControlResponse {
        engine_mode: TradingMode::Killed.to_string(),
        message: "Trading killed — manual restart required".to_string(),
    })
}

// =============================================================================
// Heartbeat (authenticated)
// =============================================================================

async fn heartbeat(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    *state.last_ws_user_event.write() = std::time::Instant::now();
    state.increment_version();

    Json(serde_json::json!({
        "status": "ok",
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Trade Journal (authenticated)
// =============================================================================

async fn trade_journal(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.positions.recent_trades(500))
}

async fn trade_journal_stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let closed = state.positions.closed_positions(500);
    let total_trades = closed.len();
    if total_trades == 0 {
        return Json(serde_json::json!({
            "total_trades": 0,
            "win_rate": 0.0,
            "total_net_pnl": 0.0,
            "profit_factor": 0.0,
        }));
    }
    let wins = closed.iter().filter(|p| p.realized_pnl > 0.0).count();
    let win_rate = wins as f64 / total_trades as f64;
    let total_net_pnl: f64 = closed.iter().map(|p| p.realized_pnl).sum();
    let gross_profit: f64 = closed.iter().filter(|p| p.realized_pnl > 0.0).map(|p| p.realized_pnl).sum();
    let gross_loss: f64 = closed.iter().filter(|p| p.realized_pnl < 0.0).map(|p| p.realized_pnl.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    Json(serde_json::json!({
        "total_trades": total_trades,
        "win_rate": win_rate,
        "total_net_pnl": total_net_pnl,
        "profit_factor": profit_factor,
    }))
}

// =============================================================================
// Chat (authenticated) — HTTP stand-in for the Conversation Router's real
// transport (§6 treats the chat platform itself as external); this lets an
// operator or dashboard exercise C8 without standing up that transport.
// =============================================================================

#[derive(Deserialize)]
struct ChatRequest {
    user_id: String,
    text: String,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
}

async fn chat(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if req.text.trim().is_empty() {
        let err = EngineError::ValidationError("message text must not be empty".to_string());
        return Err((StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": err.user_message() }))));
    }

    let message = InboundMessage { user_id: req.user_id, text: req.text };
    let reply = conversation::handle_message(&state, &message).await;
    Ok(Json(ChatResponse { reply }))
}
