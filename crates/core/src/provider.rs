//! Provider trait: the model-query contract.
//!
//! A Provider takes a projected message list, a system prompt and a tool set,
//! and returns an ordered list of text and/or tool-call blocks together with
//! token usage. Retrying transient failures is the provider's business; an
//! error returned from [`Provider::complete`] is final for the current task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{ContentBlock, ModelMessage};

/// How the model may use the offered tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to call a tool
    Auto,
    /// The model must call some tool
    Any,
    /// The model must call the named tool
    Tool { name: String },
}

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// The projected conversation
    pub messages: Vec<ModelMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// `None` lets the provider apply its default, which requires a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl ProviderRequest {
    /// An isolated, tool-free request with a single user message.
    pub fn isolated(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: vec![ModelMessage::user_text(prompt)],
            system_prompt: None,
            max_tokens,
            temperature: 0.0,
            tools: Vec::new(),
            tool_choice: None,
        }
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Ordered text and tool-call blocks; may be empty
    pub content: Vec<ContentBlock>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

impl ProviderResponse {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// The core Provider trait.
///
/// The agent loop calls `complete()` without knowing which backend answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_request_has_no_tools() {
        let req = ProviderRequest::isolated("model-x", "summarize", 100);
        assert!(req.tools.is_empty());
        assert!(req.tool_choice.is_none());
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, 100);
    }

    #[test]
    fn tool_choice_serialization() {
        let json = serde_json::to_string(&ToolChoice::Any).unwrap();
        assert_eq!(json, r#"{"type":"any"}"#);
        let json = serde_json::to_string(&ToolChoice::Tool { name: "complete".into() }).unwrap();
        assert!(json.contains(r#""type":"tool""#));
        assert!(json.contains("complete"));
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage { input_tokens: 10, output_tokens: 5 });
        total.add(&Usage { input_tokens: 3, output_tokens: 2 });
        assert_eq!(total.total(), 20);
    }

    #[test]
    fn response_text_joins_blocks() {
        let resp = ProviderResponse {
            content: vec![
                ContentBlock::text("a"),
                ContentBlock::ToolCall {
                    id: "c".into(),
                    name: "t".into(),
                    input: serde_json::json!({}),
                },
                ContentBlock::text("b"),
            ],
            usage: None,
            model: "m".into(),
        };
        assert_eq!(resp.text(), "a\nb");
    }
}
