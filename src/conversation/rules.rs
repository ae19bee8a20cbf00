// =============================================================================
// Rule pass — keyword/regex intent classification and slot extraction
// =============================================================================

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Asset, AssetClass, Intent, IntentKind, Slots};

/// Lazily-compiled regex behind a `OnceLock`, keyed by a per-call-site
/// initializer closure. Mirrors the one-compile-per-process pattern the
/// rest of this codebase reaches for without adding a `lazy_static`-style
/// dependency.
fn cached_regex(cell: &OnceLock<Regex>, pattern: &str) -> &Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

/// Asset aliases: free-text mentions (symbol, company name, ticker in any
/// supported language) resolved to a concrete `Asset`. A small curated
/// table rather than a live lookup service — out of scope per §1 (no
/// persistence backend / external name-lookup service is specified).
static ASSET_ALIASES: &[(&str, AssetClass, &str)] = &[
    ("btcusdt", AssetClass::Crypto, "BTCUSDT"),
    ("btc", AssetClass::Crypto, "BTCUSDT"),
    ("bitcoin", AssetClass::Crypto, "BTCUSDT"),
    ("ethusdt", AssetClass::Crypto, "ETHUSDT"),
    ("eth", AssetClass::Crypto, "ETHUSDT"),
    ("ethereum", AssetClass::Crypto, "ETHUSDT"),
    ("bnbusdt", AssetClass::Crypto, "BNBUSDT"),
    ("solusdt", AssetClass::Crypto, "SOLUSDT"),
    ("sol", AssetClass::Crypto, "SOLUSDT"),
    ("aapl", AssetClass::Equity, "AAPL"),
    ("apple", AssetClass::Equity, "AAPL"),
    ("msft", AssetClass::Equity, "MSFT"),
    ("microsoft", AssetClass::Equity, "MSFT"),
    ("005930", AssetClass::Equity, "005930"),
    ("samsung electronics", AssetClass::Equity, "005930"),
    ("삼성전자", AssetClass::Equity, "005930"),
    ("三星电子", AssetClass::Equity, "005930"),
]; // note: longer aliases listed before their substrings would matter if this
   // ever iterates greedily; lookup below scans the whole list per call.

static BUY_VERB: OnceLock<Regex> = OnceLock::new();
static SELL_VERB: OnceLock<Regex> = OnceLock::new();
static BACKTEST_VERB: OnceLock<Regex> = OnceLock::new();
static ADVICE_VERB: OnceLock<Regex> = OnceLock::new();
static POSITION_VERB: OnceLock<Regex> = OnceLock::new();
static PORTFOLIO_VERB: OnceLock<Regex> = OnceLock::new();
static MARKET_VERB: OnceLock<Regex> = OnceLock::new();
static QUANTITY_RE: OnceLock<Regex> = OnceLock::new();
static PRICE_RE: OnceLock<Regex> = OnceLock::new();

fn buy_verb() -> &'static Regex {
    cached_regex(&BUY_VERB, r"(?i)\b(buy|long|매수|买入)\b")
}
fn sell_verb() -> &'static Regex {
    cached_regex(&SELL_VERB, r"(?i)\b(sell|short|매도|卖出)\b")
}
fn backtest_verb() -> &'static Regex {
    cached_regex(&BACKTEST_VERB, r"(?i)\b(backtest|back-test|back test)\b")
}
fn advice_verb() -> &'static Regex {
    cached_regex(&ADVICE_VERB, r"(?i)\b(advice|recommend|should i|think about)\b")
}
fn position_verb() -> &'static Regex {
    cached_regex(&POSITION_VERB, r"(?i)\b(position|holding|how (is|am i doing))\b")
}
fn portfolio_verb() -> &'static Regex {
    cached_regex(&PORTFOLIO_VERB, r"(?i)\b(portfolio|rebalance|adjust)\b")
}
fn market_verb() -> &'static Regex {
    cached_regex(&MARKET_VERB, r"(?i)\b(market overview|overall market|market analysis)\b")
}
fn quantity_re() -> &'static Regex {
    cached_regex(&QUANTITY_RE, r"(?i)(\d+(?:\.\d+)?)\s*(?:shares?|주|股|units?)?")
}
fn price_re() -> &'static Regex {
    cached_regex(&PRICE_RE, r"(?i)(?:price|at|가격|价格)\D{0,3}(\d+(?:\.\d+)?)")
}

fn find_asset(text: &str) -> Option<Asset> {
    let lower = text.to_lowercase();
    ASSET_ALIASES
        .iter()
        .filter(|(alias, _, _)| lower.contains(alias))
        .max_by_key(|(alias, _, _)| alias.len())
        .map(|(_, class, id)| Asset::new(*class, *id))
}

fn find_quantity(text: &str, exclude: Option<f64>) -> Option<f64> {
    quantity_re().captures_iter(text).find_map(|c| {
        let value: f64 = c.get(1)?.as_str().parse().ok()?;
        if Some(value) == exclude {
            None
        } else {
            Some(value)
        }
    })
}

fn find_price(text: &str) -> Option<f64> {
    price_re().captures(text).and_then(|c| c.get(1)?.as_str().parse().ok())
}

/// Rule-pass classification: keyword/regex matching against a per-intent
/// vocabulary. Returns a candidate intent plus a confidence in `[0,1]`.
/// A buy/sell verb plus a recognized asset plus a numeric quantity is a
/// strong signal and clears the 0.7 LLM-fallback threshold on its own.
pub fn classify_rule_pass(text: &str) -> Intent {
    let asset = find_asset(text);
    let price = find_price(text);
    let quantity = find_quantity(text, price);

    if backtest_verb().is_match(text) {
        return Intent {
            kind: IntentKind::RunBacktest,
            slots: Slots {
                asset,
                strategy_name: extract_strategy_name(text),
                date_range: extract_date_range(text),
                initial_capital: extract_initial_capital(text),
                ..Default::default()
            },
            confidence: 0.8,
        };
    }

    if market_verb().is_match(text) {
        return Intent { kind: IntentKind::MarketAnalysis, slots: Slots::default(), confidence: 0.85 };
    }

    if buy_verb().is_match(text) || sell_verb().is_match(text) {
        let kind = if buy_verb().is_match(text) { IntentKind::Buy } else { IntentKind::Sell };
        let mut confidence: f64 = 0.4;
        if asset.is_some() {
            confidence += 0.2;
        }
        if quantity.is_some() {
            confidence += 0.2;
        }
        if price.is_some() {
            confidence += 0.1;
        }
        return Intent {
            kind,
            slots: Slots { asset, quantity, price, ..Default::default() },
            confidence: confidence.min(1.0),
        };
    }

    if position_verb().is_match(text) {
        return Intent { kind: IntentKind::CheckPosition, slots: Slots { asset, ..Default::default() }, confidence: 0.75 };
    }

    if portfolio_verb().is_match(text) {
        return Intent { kind: IntentKind::PortfolioAdjust, slots: Slots { asset, ..Default::default() }, confidence: 0.7 };
    }

    if advice_verb().is_match(text) || asset.is_some() {
        let confidence = if asset.is_some() && advice_verb().is_match(text) { 0.75 } else { 0.5 };
        return Intent { kind: IntentKind::AskAdvice, slots: Slots { asset, ..Default::default() }, confidence };
    }

    Intent { kind: IntentKind::Chat, slots: Slots::default(), confidence: 0.3 }
}

fn extract_strategy_name(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for name in ["intraday_breakout", "ma_cross_rsi_filter", "momentum_reversal", "order_flow_anomaly", "news_driven_momentum"] {
        if lower.contains(&name.replace('_', " ")) || lower.contains(name) {
            return Some(name.to_string());
        }
    }
    None
}

fn extract_date_range(text: &str) -> Option<String> {
    static LAST_N_DAYS: OnceLock<Regex> = OnceLock::new();
    cached_regex(&LAST_N_DAYS, r"(?i)last (\d+) days?")
        .captures(text)
        .map(|c| format!("last {} days", &c[1]))
}

/// Initial capital for a backtest request: "capital 10000", "budget $5000".
fn extract_initial_capital(text: &str) -> Option<f64> {
    static CAPITAL_RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(&CAPITAL_RE, r"(?i)(?:capital|budget)\D{0,3}\$?(\d+(?:\.\d+)?)")
        .captures(text)
        .and_then(|c| c.get(1)?.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_with_asset_quantity_and_price_clears_threshold() {
        let intent = classify_rule_pass("buy BTCUSDT 10 shares at price 50000");
        assert_eq!(intent.kind, IntentKind::Buy);
        assert!(intent.confidence >= 0.7, "confidence was {}", intent.confidence);
        assert_eq!(intent.slots.asset, Some(Asset::crypto("BTCUSDT")));
        assert_eq!(intent.slots.quantity, Some(10.0));
        assert_eq!(intent.slots.price, Some(50000.0));
    }

    #[test]
    fn samsung_electronics_buy_resolves_to_005930() {
        let intent = classify_rule_pass("buy Samsung Electronics 10 shares price 75000");
        assert_eq!(intent.kind, IntentKind::Buy);
        assert_eq!(intent.slots.asset, Some(Asset::equity("005930")));
        assert_eq!(intent.slots.quantity, Some(10.0));
        assert_eq!(intent.slots.price, Some(75000.0));
    }

    #[test]
    fn chinese_samsung_electronics_utterance_resolves_to_005930() {
        // Spec §8 scenario 5, literal utterance.
        let intent = classify_rule_pass("买入三星电子 10股 价格75000");
        assert_eq!(intent.kind, IntentKind::Buy);
        assert_eq!(intent.slots.asset, Some(Asset::equity("005930")));
        assert_eq!(intent.slots.quantity, Some(10.0));
        assert_eq!(intent.slots.price, Some(75000.0));
        assert!(intent.confidence >= 0.7, "confidence was {}", intent.confidence);
    }

    #[test]
    fn bare_chat_has_low_confidence() {
        let intent = classify_rule_pass("good morning");
        assert_eq!(intent.kind, IntentKind::Chat);
        assert!(intent.confidence < 0.7);
    }

    #[test]
    fn backtest_request_extracts_date_range() {
        let intent = classify_rule_pass("run a backtest over the last 30 days for momentum_reversal");
        assert_eq!(intent.kind, IntentKind::RunBacktest);
        assert_eq!(intent.slots.date_range, Some("last 30 days".to_string()));
        assert_eq!(intent.slots.strategy_name, Some("momentum_reversal".to_string()));
    }

    #[test]
    fn backtest_request_extracts_initial_capital() {
        let intent = classify_rule_pass("backtest the last 30 days for momentum_reversal with capital 5000");
        assert_eq!(intent.kind, IntentKind::RunBacktest);
        assert_eq!(intent.slots.initial_capital, Some(5000.0));
    }

    #[test]
    fn backtest_request_missing_capital_has_no_slot() {
        let intent = classify_rule_pass("run a backtest over the last 30 days for momentum_reversal");
        assert_eq!(intent.slots.initial_capital, None);
    }

    #[test]
    fn position_check_recognized() {
        let intent = classify_rule_pass("how is my BTC position doing");
        assert_eq!(intent.kind, IntentKind::CheckPosition);
        assert_eq!(intent.slots.asset, Some(Asset::crypto("BTCUSDT")));
    }
}
