// =============================================================================
// LLM provider abstraction
// =============================================================================
//
// A thin trait over whatever HTTP-backed language model sits behind it. The
// router only ever talks to this trait, never to a concrete SDK — no LLM
// provider SDK crate is pulled in; providers that need one talk plain JSON
// over `reqwest`, which the rest of this codebase already depends on.
// =============================================================================

use async_trait::async_trait;
use std::time::Duration;

use crate::llm::TaskClass;

#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network failure, non-2xx response, malformed body. Triggers fallback
    /// to the next provider in the task class's chain.
    Unavailable(String),
    /// Provider responded but declined to answer (safety refusal, quota).
    Refused(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "provider unavailable: {msg}"),
            Self::Refused(msg) => write!(f, "provider refused: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// A completed response from a provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub provider_name: String,
    /// Provider's own confidence signal if it exposes one, otherwise a
    /// heuristic assigned by the caller.
    pub confidence: f64,
}

/// One named model/provider behind the router. Implementors own their own
/// HTTP client, auth, and retry policy for a single attempt; the router
/// owns the cross-provider fallback and the wall-clock budget.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        task_class: TaskClass,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Deterministic offline provider used when no external LLM endpoint is
/// configured (default installation, and every unit test). Never makes a
/// network call; answers are template-based rather than reasoned, but the
/// shape matches what a real provider would return so the rest of the
/// pipeline is indifferent to which kind it's talking to.
pub struct StubProvider {
    pub name: String,
}

impl StubProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        task_class: TaskClass,
        prompt: &str,
        _timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        // The analysis pipeline's advice-escalation prompt always carries a
        // "Rule-based candidate" context block (see `pipeline::escalate_to_llm`)
        // and expects a JSON body back. Every other caller (intent
        // classification, free-form chat) wants plain text. A real provider
        // tells these apart by following the prompt's own instructions; this
        // offline stand-in tells them apart by that marker so the pipeline
        // exercises its `source = llm` path without a live provider wired up.
        if let Some(text) = stub_advice_json(prompt) {
            return Ok(ProviderResponse { text, provider_name: self.name.clone(), confidence: 0.65 });
        }

        let text = format!(
            "[{} stub response for {} task]\n{}",
            self.name,
            task_class,
            prompt.lines().take(3).collect::<Vec<_>>().join(" ")
        );
        Ok(ProviderResponse {
            text,
            provider_name: self.name.clone(),
            confidence: 0.5,
        })
    }
}

/// Parse the `action=... confidence=...` line the pipeline embeds in its
/// "Rule-based candidate" context block and echo it back as the structured
/// advice JSON `escalate_to_llm` expects, so the stub's advice carries the
/// same direction the rule pass already computed rather than a fixed guess.
fn stub_advice_json(prompt: &str) -> Option<String> {
    let lines: Vec<&str> = prompt.lines().collect();
    let marker_idx = lines.iter().position(|l| l.contains("## Rule-based candidate"))?;
    let candidate_line = lines.get(marker_idx + 1)?;
    let action = candidate_line
        .split("action=")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    #[derive(serde::Serialize)]
    struct Body {
        action: String,
        confidence: f64,
        stop_loss_pct: f64,
        take_profit_tiers: Vec<crate::types::TakeProfitTier>,
        reasoning: String,
    }

    serde_json::to_string(&Body {
        action,
        confidence: 0.65,
        stop_loss_pct: -1.5,
        take_profit_tiers: vec![crate::types::TakeProfitTier { trigger_pct: 2.0, fraction: 1.0 }],
        reasoning: "stub provider: echoing rule-pass direction, no live model configured".to_string(),
    })
    .ok()
}

/// Generic HTTP JSON provider, for a provider reachable over a simple POST
/// endpoint returning `{"text": "..."}`. Concrete provider wiring (auth
/// headers, request shape) is left to configuration since no specific
/// vendor SDK is part of this codebase's dependency stack.
pub struct HttpJsonProvider {
    pub name: String,
    pub endpoint: String,
    pub client: reqwest::Client,
}

impl HttpJsonProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpJsonProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        task_class: TaskClass,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            task_class: String,
            prompt: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            text: String,
            #[serde(default = "default_confidence")]
            confidence: f64,
        }
        fn default_confidence() -> f64 {
            0.6
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&Req { task_class: task_class.to_string(), prompt })
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "status {}",
                resp.status()
            )));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        Ok(ProviderResponse {
            text: body.text,
            provider_name: self.name.clone(),
            confidence: body.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_provider_never_fails() {
        let p = StubProvider::new("local-rules");
        let resp = p
            .complete(TaskClass::Lightweight, "BTCUSDT RSI 72", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.provider_name, "local-rules");
        assert!(resp.text.contains("local-rules"));
    }

    #[tokio::test]
    async fn stub_provider_echoes_rule_candidate_as_advice_json() {
        let p = StubProvider::new("stub-complex");
        let prompt = crate::llm::prompt::PromptBuilder::new("Assess BTCUSDT after a price_jump anomaly")
            .with_context("Rule-based candidate", "action=sell confidence=0.82")
            .build();

        let resp = p.complete(TaskClass::Complex, &prompt, Duration::from_secs(5)).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&resp.text).expect("stub advice must be valid JSON");
        assert_eq!(parsed["action"], "sell");
    }
}
