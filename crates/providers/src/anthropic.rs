//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Base64 image blocks for attachments
//! - Forced tool use by default (`tool_choice: any`)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskloop_core::error::ProviderError;
use taskloop_core::message::{ContentBlock, MessageRole, ModelMessage};
use taskloop_core::provider::*;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert model messages to Anthropic API format with content blocks.
    fn to_api_messages(messages: &[ModelMessage]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    MessageRole::User => "user".into(),
                    MessageRole::Assistant => "assistant".into(),
                },
                content: msg.content.iter().map(Self::to_api_block).collect(),
            })
            .collect()
    }

    fn to_api_block(block: &ContentBlock) -> ApiBlock {
        match block {
            ContentBlock::Text { text } => ApiBlock::Text { text: text.clone() },
            ContentBlock::Image { media_type, data } => ApiBlock::Image {
                source: ImageSource {
                    kind: "base64".into(),
                    media_type: media_type.clone(),
                    data: data.clone(),
                },
            },
            ContentBlock::ToolCall { id, name, input } => ApiBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ContentBlock::ToolCallResult {
                tool_call_id,
                output,
                is_error,
                ..
            } => ApiBlock::ToolResult {
                tool_use_id: tool_call_id.clone(),
                content: output.clone(),
                is_error: *is_error,
            },
        }
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    /// An absent choice forces the model to call some tool.
    fn to_api_tool_choice(choice: Option<&ToolChoice>) -> serde_json::Value {
        match choice {
            None | Some(ToolChoice::Any) => serde_json::json!({"type": "any"}),
            Some(ToolChoice::Auto) => serde_json::json!({"type": "auto"}),
            Some(ToolChoice::Tool { name }) => serde_json::json!({"type": "tool", "name": name}),
        }
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if let Some(ref sys) = request.system_prompt {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = Self::to_api_tool_choice(request.tool_choice.as_ref());
        }

        body
    }

    fn map_status(status: u16, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()),
            503 | 529 => ProviderError::Overloaded(body),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }

    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut content = Vec::with_capacity(resp.content.len());

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text });
                    }
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    content.push(ContentBlock::ToolCall { id, name, input });
                }
                // Thinking is not part of the recorded history
                ResponseContentBlock::Thinking { .. } => {}
            }
        }

        debug!(
            stop_reason = resp.stop_reason.as_deref().unwrap_or("unknown"),
            blocks = content.len(),
            "Anthropic response received"
        );

        ProviderResponse {
            content,
            usage: Some(Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            }),
            model: resp.model,
        }
    }
}

#[async_trait]
impl taskloop_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(Self::map_status(status, error_body));
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-20241022",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // 401 = bad key, anything else = reachable
        Ok(response.status().as_u16() != 401)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ApiBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ApiBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[allow(dead_code)]
        thinking: String,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloop_core::Provider;

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider =
            AnthropicProvider::new("sk-ant-test").with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn message_conversion_user_assistant() {
        let messages = vec![
            ModelMessage::user_text("Hello"),
            ModelMessage {
                role: MessageRole::Assistant,
                content: vec![ContentBlock::text("Hi!")],
            },
        ];
        let api_msgs = AnthropicProvider::to_api_messages(&messages);
        assert_eq!(api_msgs.len(), 2);
        assert_eq!(api_msgs[0].role, "user");
        assert_eq!(api_msgs[1].role, "assistant");
    }

    #[test]
    fn message_conversion_with_tool_call() {
        let msg = ModelMessage {
            role: MessageRole::Assistant,
            content: vec![
                ContentBlock::text("Let me search"),
                ContentBlock::ToolCall {
                    id: "toolu_123".into(),
                    name: "web_search".into(),
                    input: serde_json::json!({"query": "rust"}),
                },
            ],
        };
        let api_msgs = AnthropicProvider::to_api_messages(&[msg]);
        let blocks = &api_msgs[0].content;
        assert_eq!(blocks.len(), 2);
        match &blocks[1] {
            ApiBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_123");
                assert_eq!(name, "web_search");
                assert_eq!(input["query"], "rust");
            }
            other => panic!("Expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_serializes_as_user_block() {
        let msg = ModelMessage {
            role: MessageRole::User,
            content: vec![ContentBlock::ToolCallResult {
                tool_call_id: "toolu_123".into(),
                tool_name: "web_search".into(),
                output: "search results here".into(),
                is_error: true,
            }],
        };
        let api_msgs = AnthropicProvider::to_api_messages(&[msg]);
        let json = serde_json::to_value(&api_msgs[0]).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert_eq!(json["content"][0]["tool_use_id"], "toolu_123");
        assert_eq!(json["content"][0]["is_error"], true);
    }

    #[test]
    fn image_block_uses_base64_source() {
        let block = AnthropicProvider::to_api_block(&ContentBlock::Image {
            media_type: "image/png".into(),
            data: "iVBORw0KGgo=".into(),
        });
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["source"]["type"], "base64");
        assert_eq!(json["source"]["media_type"], "image/png");
    }

    #[test]
    fn tool_choice_defaults_to_any() {
        let mut request = ProviderRequest::isolated("claude", "hi", 10);
        request.tools = vec![ToolDefinition {
            name: "calculator".into(),
            description: "Evaluate math".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];

        let body = AnthropicProvider::build_body(&request);
        assert_eq!(body["tool_choice"]["type"], "any");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");

        request.tool_choice = Some(ToolChoice::Tool {
            name: "calculator".into(),
        });
        let body = AnthropicProvider::build_body(&request);
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], "calculator");
    }

    #[test]
    fn no_tools_means_no_tool_choice() {
        let mut request = ProviderRequest::isolated("claude", "summarize", 100);
        request.system_prompt = Some("Be brief".into());
        let body = AnthropicProvider::build_body(&request);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["system"], "Be brief");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            AnthropicProvider::map_status(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            AnthropicProvider::map_status(529, "overloaded".into()),
            ProviderError::Overloaded(_)
        ));
        assert!(matches!(
            AnthropicProvider::map_status(401, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        let err = AnthropicProvider::map_status(400, "bad".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn parse_tool_use_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_02",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "thinking", "thinking": "The user wants..."},
                    {"type": "text", "text": "I'll check."},
                    {"type": "tool_use", "id": "toolu_1", "name": "complete", "input": {"answer": "42"}}
                ],
                "usage": {"input_tokens": 50, "output_tokens": 20},
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();

        let response = AnthropicProvider::response_to_provider_response(resp);
        assert_eq!(response.content.len(), 2);
        assert_eq!(response.text(), "I'll check.");
        assert!(matches!(
            &response.content[1],
            ContentBlock::ToolCall { name, .. } if name == "complete"
        ));
        assert_eq!(response.usage.unwrap().total(), 70);
    }
}
