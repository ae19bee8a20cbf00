// =============================================================================
// Conversation Router (C8) — hybrid rule+LLM intent classification
// =============================================================================
//
// Inbound messages are classified by a cheap rule pass first; only when its
// confidence falls below threshold does the router pay for an LLM call at
// `lightweight` task class. The transport itself (chat platform, per-message
// delivery) is out of scope — this module only classifies, extracts slots,
// authorizes, dispatches, and renders a reply. `send`/`on_message` are the
// transport's contract, owned by whatever wires a concrete chat platform to
// `handle_message` below.
// =============================================================================

pub mod dispatch;
pub mod rules;

use tracing::{info, warn};

use crate::app_state::AppState;
use crate::errors::EngineError;
use crate::llm::TaskClass;
use crate::types::{Intent, IntentKind};

pub use dispatch::dispatch;
pub use rules::classify_rule_pass;

/// Rule-pass confidence below this triggers an LLM fallback classification.
const LLM_FALLBACK_THRESHOLD: f64 = 0.7;

/// A single inbound chat message, tagged with the sending user's identifier
/// per §6 ("Inbound: text messages tagged with a user identifier").
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub user_id: String,
    pub text: String,
}

/// Classify, authorize, dispatch, and render a reply for one inbound
/// message. Authorization is checked before classification spends any
/// compute — an unauthorized user never reaches the rule or LLM pass.
pub async fn handle_message(state: &std::sync::Arc<AppState>, message: &InboundMessage) -> String {
    let config = state.runtime_config.read();
    let authorized = config.auth.users.iter().any(|u| u == &message.user_id);
    drop(config);

    if !authorized {
        warn!(user = %message.user_id, "unauthorized chat message rejected");
        return EngineError::AuthorizationDenied(message.user_id.clone()).user_message();
    }

    let intent = classify(state, &message.text).await;
    info!(user = %message.user_id, intent = %intent.kind, confidence = intent.confidence, "message classified");

    match dispatch(state, &intent, &message.text).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(user = %message.user_id, error = %e, "dispatch failed");
            e.user_message()
        }
    }
}

/// Rule pass first; fall back to an LLM lightweight-class classification
/// only when the rule pass isn't confident.
async fn classify(state: &std::sync::Arc<AppState>, text: &str) -> Intent {
    let rule_intent = classify_rule_pass(text);
    if rule_intent.confidence >= LLM_FALLBACK_THRESHOLD {
        return rule_intent;
    }

    let prompt = crate::llm::prompt::PromptBuilder::new(
        "Classify this user message into exactly one of: buy, sell, ask_advice, check_position, \
         portfolio_adjust, market_analysis, run_backtest, chat. Respond with just the label.",
    )
    .with_context("Message", text)
    .build();

    match state.llm_router.route(TaskClass::Lightweight, &prompt).await {
        Ok(response) => {
            let kind = parse_intent_label(&response.text).unwrap_or(IntentKind::Chat);
            Intent { kind, slots: rule_intent.slots, confidence: response.confidence.max(rule_intent.confidence) }
        }
        Err(e) => {
            warn!(error = %e, "LLM classification fallback failed, defaulting to rule-pass result");
            rule_intent
        }
    }
}

/// Coerce an LLM's free-text label into the closed intent set. Any output
/// that doesn't match exactly one known label is coerced to `chat`, per
/// §4.8 ("any other output is coerced to chat").
fn parse_intent_label(text: &str) -> Option<IntentKind> {
    let normalized = text.trim().to_lowercase();
    match normalized.as_str() {
        "buy" => Some(IntentKind::Buy),
        "sell" => Some(IntentKind::Sell),
        "ask_advice" => Some(IntentKind::AskAdvice),
        "check_position" => Some(IntentKind::CheckPosition),
        "portfolio_adjust" => Some(IntentKind::PortfolioAdjust),
        "market_analysis" => Some(IntentKind::MarketAnalysis),
        "run_backtest" => Some(IntentKind::RunBacktest),
        "chat" => Some(IntentKind::Chat),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_label_coerces_to_chat() {
        assert_eq!(parse_intent_label("banana"), None);
    }

    #[test]
    fn known_labels_parse_case_insensitively() {
        assert_eq!(parse_intent_label("  BUY \n"), Some(IntentKind::Buy));
        assert_eq!(parse_intent_label("run_backtest"), Some(IntentKind::RunBacktest));
    }
}
