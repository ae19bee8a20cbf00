// =============================================================================
// LLM Router — task-class to provider-chain dispatch with a wall-clock budget
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::errors::EngineError;
use crate::llm::provider::{LlmProvider, ProviderResponse};
use crate::llm::TaskClass;

/// Routes a task to the first provider in its configured fallback chain
/// that returns successfully, within a total wall-clock budget shared
/// across all attempts for that call.
pub struct LlmRouter {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    task_map: HashMap<TaskClass, Vec<String>>,
    wall_clock_budget: Duration,
}

impl LlmRouter {
    pub fn new(
        providers: Vec<Arc<dyn LlmProvider>>,
        task_map: HashMap<TaskClass, Vec<String>>,
        wall_clock_budget_secs: u64,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            providers,
            task_map,
            wall_clock_budget: Duration::from_secs(wall_clock_budget_secs),
        }
    }

    /// Route `prompt` for `task_class`, trying each configured provider in
    /// order until one succeeds or the wall-clock budget runs out. A
    /// low-confidence (<0.4) response from a `Standard` task auto-upgrades
    /// to `Complex` and retries the complex chain once, budget permitting.
    #[tracing::instrument(skip(self, prompt), fields(task_class = %task_class))]
    pub async fn route(
        &self,
        task_class: TaskClass,
        prompt: &str,
    ) -> Result<ProviderResponse, EngineError> {
        let started = Instant::now();
        let response = self.try_chain(task_class, prompt, started).await?;

        if task_class == TaskClass::Standard && response.confidence < 0.4 {
            let upgraded = task_class.upgraded();
            info!(from = %task_class, to = %upgraded, "auto-upgrading low-confidence task");
            if let Ok(better) = self.try_chain(upgraded, prompt, started).await {
                return Ok(better);
            }
        }

        Ok(response)
    }

    async fn try_chain(
        &self,
        task_class: TaskClass,
        prompt: &str,
        started: Instant,
    ) -> Result<ProviderResponse, EngineError> {
        let chain = self.task_map.get(&task_class).ok_or_else(|| {
            EngineError::ConfigurationError(format!("no provider chain for {task_class}"))
        })?;

        for provider_name in chain {
            let elapsed = started.elapsed();
            if elapsed >= self.wall_clock_budget {
                return Err(EngineError::AnalysisTimeout {
                    budget_secs: self.wall_clock_budget.as_secs(),
                });
            }
            let remaining = self.wall_clock_budget - elapsed;

            let Some(provider) = self.providers.get(provider_name) else {
                warn!(provider = %provider_name, "configured provider not registered, skipping");
                continue;
            };

            match provider.complete(task_class, prompt, remaining).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(provider = %provider_name, error = %e, "provider failed, trying next");
                    continue;
                }
            }
        }

        Err(EngineError::AnalysisTimeout {
            budget_secs: self.wall_clock_budget.as_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::StubProvider;

    fn router() -> LlmRouter {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![
            Arc::new(StubProvider::new("primary")),
            Arc::new(StubProvider::new("secondary")),
        ];
        let mut task_map = HashMap::new();
        task_map.insert(TaskClass::Standard, vec!["primary".to_string(), "secondary".to_string()]);
        LlmRouter::new(providers, task_map, 30)
    }

    #[tokio::test]
    async fn routes_to_first_available_provider() {
        let r = router();
        let resp = r.route(TaskClass::Standard, "explain BTCUSDT").await.unwrap();
        assert_eq!(resp.provider_name, "primary");
    }

    #[tokio::test]
    async fn unknown_task_class_is_configuration_error() {
        let r = router();
        let err = r.route(TaskClass::Complex, "x").await.unwrap_err();
        assert_eq!(err.kind_tag(), "ConfigurationError");
    }
}
