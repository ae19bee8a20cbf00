// =============================================================================
// Engine error kinds
// =============================================================================
//
// These are "kinds, not types" in the sense the component design calls for:
// a single enum with a policy attached to each variant in the module that
// raises it, rather than a taxonomy of dedicated error structs. Nothing here
// is ever silently swallowed — every call site either logs-and-continues
// (the transient kinds) or routes the kind to the caller.
// =============================================================================

use std::fmt;

#[derive(Debug, Clone)]
pub enum EngineError {
    /// Network error, rate-limit rejection, provider 5xx. Retry at the next
    /// tick; never crash the loop; contributes to adapter/provider failover.
    TransientUpstream(String),
    /// Adapter returned data older than its freshness bound.
    StaleData { age_secs: u64, limit_secs: u64 },
    /// Every adapter failed and the staleness limit was also exceeded.
    SourceUnavailable(String),
    /// User command with missing or malformed slots.
    ValidationError(String),
    /// User not on the configured allow-list.
    AuthorizationDenied(String),
    /// Attempt to open/size a position beyond configured limits.
    RiskViolation(String),
    /// A tick's processing took longer than the cadence interval.
    PipelineOverrun { asset: String, elapsed_ms: u64 },
    /// Total LLM wall-clock budget exceeded.
    AnalysisTimeout { budget_secs: u64 },
    /// Invalid or missing required configuration at startup.
    ConfigurationError(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientUpstream(msg) => write!(f, "transient upstream error: {msg}"),
            Self::StaleData { age_secs, limit_secs } => write!(
                f,
                "stale data: age {age_secs}s exceeds freshness bound {limit_secs}s"
            ),
            Self::SourceUnavailable(msg) => write!(f, "source unavailable: {msg}"),
            Self::ValidationError(msg) => write!(f, "validation error: {msg}"),
            Self::AuthorizationDenied(user) => write!(f, "authorization denied for user {user}"),
            Self::RiskViolation(msg) => write!(f, "risk violation: {msg}"),
            Self::PipelineOverrun { asset, elapsed_ms } => {
                write!(f, "pipeline overrun for {asset}: {elapsed_ms}ms")
            }
            Self::AnalysisTimeout { budget_secs } => {
                write!(f, "analysis timeout: exceeded {budget_secs}s budget")
            }
            Self::ConfigurationError(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Short machine-readable tag, used in log fields and API error bodies.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::TransientUpstream(_) => "TransientUpstream",
            Self::StaleData { .. } => "StaleData",
            Self::SourceUnavailable(_) => "SourceUnavailable",
            Self::ValidationError(_) => "ValidationError",
            Self::AuthorizationDenied(_) => "AuthorizationDenied",
            Self::RiskViolation(_) => "RiskViolation",
            Self::PipelineOverrun { .. } => "PipelineOverrun",
            Self::AnalysisTimeout { .. } => "AnalysisTimeout",
            Self::ConfigurationError(_) => "ConfigurationError",
        }
    }

    /// Render a user-facing message: actionable, never a raw stack dump.
    pub fn user_message(&self) -> String {
        match self {
            Self::ValidationError(msg) => format!("I couldn't do that: {msg}"),
            Self::AuthorizationDenied(_) => {
                "You're not authorized to use this assistant.".to_string()
            }
            Self::RiskViolation(msg) => format!("That trade was refused: {msg}"),
            Self::SourceUnavailable(asset) => {
                format!("Market data for {asset} is unavailable right now — try again shortly.")
            }
            Self::AnalysisTimeout { .. } => {
                "The analysis took too long and fell back to a simpler answer.".to_string()
            }
            _ => "Something went wrong processing that request.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(
            EngineError::ValidationError("x".into()).kind_tag(),
            "ValidationError"
        );
        assert_eq!(
            EngineError::RiskViolation("x".into()).kind_tag(),
            "RiskViolation"
        );
    }

    #[test]
    fn user_message_never_empty() {
        let errs = vec![
            EngineError::TransientUpstream("timeout".into()),
            EngineError::StaleData { age_secs: 100, limit_secs: 30 },
            EngineError::ConfigurationError("bad json".into()),
        ];
        for e in errs {
            assert!(!e.user_message().is_empty());
        }
    }
}
