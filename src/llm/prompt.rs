// =============================================================================
// Prompt assembly
// =============================================================================
//
// Builds the text sent to an LLM provider: a fixed system role, a task
// description, and a handful of context blocks (indicator snapshot, recent
// anomaly, open positions). Kept as plain string assembly rather than a
// templating crate, matching the lightweight style of this codebase's
// existing string-building helpers.

const SYSTEM_ROLE: &str = "You are a disciplined trading analyst. Be concise. \
Never recommend a position size; that is decided elsewhere. State your \
reasoning and a confidence between 0 and 1.";

pub struct PromptBuilder {
    task_description: String,
    context_blocks: Vec<String>,
}

impl PromptBuilder {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            context_blocks: Vec::new(),
        }
    }

    pub fn with_context(mut self, label: &str, body: impl std::fmt::Display) -> Self {
        self.context_blocks.push(format!("## {label}\n{body}"));
        self
    }

    pub fn build(self) -> String {
        let mut out = String::new();
        out.push_str(SYSTEM_ROLE);
        out.push_str("\n\n# Task\n");
        out.push_str(&self.task_description);
        for block in &self.context_blocks {
            out.push_str("\n\n");
            out.push_str(block);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembled_prompt_contains_all_sections() {
        let prompt = PromptBuilder::new("Assess BTCUSDT after a volume spike")
            .with_context("Indicators", "RSI=72 ADX=30")
            .with_context("Recent anomaly", "volume_spike severity=high score=4.1")
            .build();

        assert!(prompt.contains("disciplined trading analyst"));
        assert!(prompt.contains("Assess BTCUSDT"));
        assert!(prompt.contains("RSI=72"));
        assert!(prompt.contains("volume_spike"));
    }
}
