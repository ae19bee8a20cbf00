// =============================================================================
// LLM Router (C4) — task-class model selection, provider fallback, prompt assembly
// =============================================================================

pub mod prompt;
pub mod provider;
pub mod router;

pub use provider::{LlmProvider, ProviderError, ProviderResponse};
pub use router::LlmRouter;

use serde::{Deserialize, Serialize};

/// Classification of an analysis task by cost/complexity, used to pick which
/// provider chain to try. Cheaper classes are attempted with cheaper models
/// first; a task may be auto-upgraded a tier when the cheap answer comes
/// back low-confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Single indicator read, anomaly context summary.
    Lightweight,
    /// Routine per-tick trade narrative.
    Standard,
    /// Multi-asset synthesis, conflicting-signal adjudication.
    Complex,
}

impl std::fmt::Display for TaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lightweight => write!(f, "lightweight"),
            Self::Standard => write!(f, "standard"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

impl TaskClass {
    /// One tier up, used for the standard-to-complex auto-upgrade rule.
    pub fn upgraded(self) -> Self {
        match self {
            Self::Lightweight => Self::Standard,
            Self::Standard => Self::Complex,
            Self::Complex => Self::Complex,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_stops_at_complex() {
        assert_eq!(TaskClass::Lightweight.upgraded(), TaskClass::Standard);
        assert_eq!(TaskClass::Standard.upgraded(), TaskClass::Complex);
        assert_eq!(TaskClass::Complex.upgraded(), TaskClass::Complex);
    }
}
