//! Summarizers used by the context manager to compress old turns.

use async_trait::async_trait;
use std::sync::Arc;
use taskloop_core::error::ProviderError;
use taskloop_core::message::{ContentBlock, Turn};
use taskloop_core::provider::{Provider, ProviderRequest};

/// Longest tool output copied into the summarization transcript.
const TRANSCRIPT_OUTPUT_LIMIT: usize = 2000;

/// Condenses a run of turns into a short digest.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, ProviderError>;
}

/// Asks the model, in an isolated request, for a digest of the run.
pub struct LlmSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
        }
    }

    fn prompt(turns: &[Turn]) -> String {
        format!(
            "The following is an earlier part of a task you are working on. \
             Summarize it in a few sentences, keeping the facts learned, files \
             and values found, and decisions made. Lead with the single most \
             important fact learned.\n\n{}",
            render_transcript(turns)
        )
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, ProviderError> {
        let request = ProviderRequest::isolated(&self.model, Self::prompt(turns), self.max_tokens);
        let response = self.provider.complete(request).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidResponse("empty summary".into()));
        }
        Ok(text)
    }
}

/// Render turns as plain text, one line per block. Images are named, not embedded.
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        for block in &turn.blocks {
            let line = match block {
                ContentBlock::Text { text } => format!("[{}] {text}", turn.role),
                ContentBlock::Image { media_type, .. } => {
                    format!("[{}] <image {media_type}>", turn.role)
                }
                ContentBlock::ToolCall { name, input, .. } => {
                    format!("[{}] called {name} with {input}", turn.role)
                }
                ContentBlock::ToolCallResult {
                    tool_name,
                    output,
                    is_error,
                    ..
                } => {
                    let status = if *is_error { "failed" } else { "returned" };
                    format!(
                        "[{}] {tool_name} {status}: {}",
                        turn.role,
                        truncate_chars(output, TRANSCRIPT_OUTPUT_LIMIT)
                    )
                }
            };
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
