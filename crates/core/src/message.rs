//! Turn and content-block domain types.
//!
//! A [`Turn`] is one recorded step of a session: the user's instruction, the
//! model's output, a tool result, or a synthetic session summary. Turns are
//! immutable once written; the history store owns their order.
//!
//! [`ModelMessage`] is the projection of turns that the model-query contract
//! consumes: role-grouped content blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HistoryError;

/// The role of a recorded turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// The end user (instructions, corrective prompts)
    User,
    /// Model output
    Assistant,
    /// Output of a dispatched tool call
    ToolResult,
    /// Synthetic digest replacing compressed turns
    SessionSummary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolResult => "tool-result",
            Self::SessionSummary => "session-summary",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of turn content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },

    /// Base64-encoded image, embedded rather than referenced.
    Image {
        media_type: String,
        data: String,
    },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolCallResult {
        tool_call_id: String,
        tool_name: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Wire name of the block type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolCallResult { .. } => "tool_call_result",
        }
    }

    fn allowed_in(&self, role: Role) -> bool {
        matches!(
            (role, self),
            (Role::User, Self::Text { .. } | Self::Image { .. })
                | (Role::Assistant, Self::Text { .. } | Self::ToolCall { .. })
                | (Role::ToolResult, Self::ToolCallResult { .. })
                | (Role::SessionSummary, Self::Text { .. })
        )
    }
}

/// A tool call extracted from an assistant turn, awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
}

/// The outcome of dispatching a [`PendingToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call this result answers
    pub tool_call_id: String,
    pub tool_name: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &PendingToolCall, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(call: &PendingToolCall, output: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::success(call, output)
        }
    }
}

/// One recorded step of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    pub role: Role,

    /// Ordered content blocks
    pub blocks: Vec<ContentBlock>,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Build a turn, rejecting blocks that cannot appear under `role`.
    pub fn new(role: Role, blocks: Vec<ContentBlock>) -> Result<Self, HistoryError> {
        let turn = Self::new_unchecked(role, blocks);
        turn.validate()?;
        Ok(turn)
    }

    fn new_unchecked(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            blocks,
            timestamp: Utc::now(),
        }
    }

    /// A text-only user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new_unchecked(Role::User, vec![ContentBlock::text(text)])
    }

    /// A text-only assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new_unchecked(Role::Assistant, vec![ContentBlock::text(text)])
    }

    pub fn session_summary(text: impl Into<String>) -> Self {
        Self::new_unchecked(Role::SessionSummary, vec![ContentBlock::text(text)])
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self::new_unchecked(
            Role::ToolResult,
            vec![ContentBlock::ToolCallResult {
                tool_call_id: result.tool_call_id.clone(),
                tool_name: result.tool_name.clone(),
                output: result.output.clone(),
                is_error: result.is_error,
            }],
        )
    }

    /// Decode a persisted turn. Unknown block types and role/block
    /// mismatches are errors, never silently dropped.
    pub fn from_json(json: &str) -> Result<Self, HistoryError> {
        let turn: Self =
            serde_json::from_str(json).map_err(|e| HistoryError::Decode(e.to_string()))?;
        turn.validate()?;
        Ok(turn)
    }

    pub fn validate(&self) -> Result<(), HistoryError> {
        match self.blocks.iter().find(|b| !b.allowed_in(self.role)) {
            Some(block) => Err(HistoryError::MalformedBlock {
                role: self.role.to_string(),
                block: block.kind().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool calls carried by this turn. Only assistant turns carry any.
    pub fn tool_calls(&self) -> Vec<PendingToolCall> {
        if self.role != Role::Assistant {
            return Vec::new();
        }
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolCall { id, name, input } => Some(PendingToolCall {
                    id: id.clone(),
                    tool_name: name.clone(),
                    tool_input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// IDs of the tool calls this turn answers.
    pub fn answered_call_ids(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolCallResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
    }
}

/// Role of a projected model message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A role-grouped run of content blocks, as sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl ModelMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::text(text)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = Turn::user("Hello, agent!");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.text(), "Hello, agent!");
        assert!(turn.tool_calls().is_empty());
    }

    #[test]
    fn tool_call_rejected_in_user_turn() {
        let err = Turn::new(
            Role::User,
            vec![ContentBlock::ToolCall {
                id: "call_1".into(),
                name: "search".into(),
                input: serde_json::json!({}),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, HistoryError::MalformedBlock { .. }));
        assert!(err.to_string().contains("tool_call"));
    }

    #[test]
    fn summary_turn_is_text_only() {
        let err = Turn::new(
            Role::SessionSummary,
            vec![ContentBlock::Image {
                media_type: "image/png".into(),
                data: "AAAA".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, HistoryError::MalformedBlock { .. }));
    }

    #[test]
    fn extracts_tool_calls_from_assistant_only() {
        let turn = Turn::new(
            Role::Assistant,
            vec![
                ContentBlock::text("Let me look"),
                ContentBlock::ToolCall {
                    id: "call_1".into(),
                    name: "read_file".into(),
                    input: serde_json::json!({"path": "a.txt"}),
                },
            ],
        )
        .unwrap();
        let calls = turn.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "read_file");
        assert_eq!(calls[0].tool_input["path"], "a.txt");
    }

    #[test]
    fn unknown_block_type_fails_to_decode() {
        let json = r#"{
            "id": "t1",
            "role": "user",
            "blocks": [{"type": "video", "url": "x"}],
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;
        let err = Turn::from_json(json).unwrap_err();
        assert!(matches!(err, HistoryError::Decode(_)));
    }

    #[test]
    fn decode_validates_roles() {
        let json = r#"{
            "id": "t1",
            "role": "session-summary",
            "blocks": [{"type": "tool_call", "id": "c", "name": "n", "input": {}}],
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;
        let err = Turn::from_json(json).unwrap_err();
        assert!(matches!(err, HistoryError::MalformedBlock { .. }));
    }

    #[test]
    fn turn_serialization_roundtrip() {
        let call = PendingToolCall {
            id: "call_9".into(),
            tool_name: "list_files".into(),
            tool_input: serde_json::json!({}),
        };
        let turn = Turn::tool_result(&ToolResult::error(&call, "boom"));
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains(r#""role":"tool-result""#));
        let decoded = Turn::from_json(&json).unwrap();
        assert_eq!(decoded, turn);
        assert_eq!(decoded.answered_call_ids().collect::<Vec<_>>(), vec!["call_9"]);
    }
}
