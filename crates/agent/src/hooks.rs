//! Optional collaborators invoked by the loop between steps.

use async_trait::async_trait;
use std::sync::Arc;
use taskloop_core::error::ProviderError;
use taskloop_core::message::ToolResult;
use taskloop_core::provider::{Provider, ProviderRequest};

use crate::prompts::STEP_SUMMARY_PREFIX;

/// Output cap for the advisory step summary.
const STEP_SUMMARY_MAX_TOKENS: u32 = 100;

/// How much of the tool output the summary prompt quotes.
const QUOTED_OUTPUT_CHARS: usize = 200;

/// Runs after every recorded tool result. Returning `Some(text)` records
/// `text` as a session-summary turn.
#[async_trait]
pub trait StepHook: Send + Sync {
    async fn after_tool_result(&self, result: &ToolResult)
    -> Result<Option<String>, ProviderError>;
}

/// Asks the model, in an isolated call, for the one new fact the last tool
/// call produced.
pub struct StepSummaryHook {
    provider: Arc<dyn Provider>,
    model: String,
}

impl StepSummaryHook {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    fn prompt(result: &ToolResult) -> String {
        let quoted: String = result.output.chars().take(QUOTED_OUTPUT_CHARS).collect();
        format!(
            "Based on the result of the tool call '{}' which returned '{quoted}...', \
             what is the single most important new piece of information or \
             confirmation you have learned? State it as a brief, factual summary.",
            result.tool_name
        )
    }
}

#[async_trait]
impl StepHook for StepSummaryHook {
    async fn after_tool_result(
        &self,
        result: &ToolResult,
    ) -> Result<Option<String>, ProviderError> {
        let request =
            ProviderRequest::isolated(&self.model, Self::prompt(result), STEP_SUMMARY_MAX_TOKENS);
        let response = self.provider.complete(request).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("{STEP_SUMMARY_PREFIX}{text}")))
    }
}
