//! The History Store: the ordered, session-scoped log of turns.
//!
//! Owns token accounting and triggers the [`ContextManager`] when the live
//! history exceeds its budget. Turns are append-only; only compression may
//! replace or drop old ones.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskloop_core::error::HistoryError;
use taskloop_core::event::{AgentEvent, EventKind, EventSink};
use taskloop_core::message::{
    ContentBlock, MessageRole, ModelMessage, PendingToolCall, Role, ToolResult, Turn,
};
use tracing::{debug, info};

use crate::context::{ContextManager, HeuristicTokenCounter, TokenCounter, TruncateReport};
use crate::prompts::EMPTY_RESPONSE_PLACEHOLDER;

pub struct HistoryStore {
    turns: Vec<Turn>,
    counter: Arc<dyn TokenCounter>,
    context: ContextManager,
    sink: Arc<dyn EventSink>,
}

impl HistoryStore {
    pub fn new(context: ContextManager, sink: Arc<dyn EventSink>) -> Self {
        Self {
            turns: Vec::new(),
            counter: Arc::new(HeuristicTokenCounter),
            context,
            sink,
        }
    }

    /// Replace the token-counting strategy.
    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn budget(&self) -> usize {
        self.context.budget()
    }

    /// Append the user's instruction. Attached files are listed in the text
    /// and images among them are embedded as base64 blocks.
    pub async fn add_user_turn(
        &mut self,
        text: &str,
        attachments: &[PathBuf],
    ) -> Result<(), HistoryError> {
        let mut instruction = text.to_string();
        let mut blocks = Vec::new();

        if !attachments.is_empty() {
            instruction.push_str("\n\nAttached files:\n");
            for path in attachments {
                instruction.push_str(&format!(" - {}\n", path.display()));
                debug!(file = %path.display(), "Attached file");
            }
            for path in attachments {
                if let Some(media_type) = image_media_type(path) {
                    let bytes = tokio::fs::read(path).await.map_err(|e| {
                        HistoryError::Attachment {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    blocks.push(ContentBlock::Image {
                        media_type: media_type.into(),
                        data: BASE64.encode(bytes),
                    });
                }
            }
        }

        blocks.push(ContentBlock::text(instruction.clone()));
        let turn = Turn::new(Role::User, blocks)?;
        self.turns.push(turn);

        let files: Vec<String> = attachments.iter().map(|p| p.display().to_string()).collect();
        self.sink.emit(AgentEvent::new(
            EventKind::UserMessage,
            serde_json::json!({ "text": instruction, "files": files }),
        ));
        Ok(())
    }

    /// Append a user turn that did not come from the user (e.g. a corrective prompt).
    pub fn add_user_text(&mut self, text: impl Into<String>) {
        let turn = Turn::user(text);
        self.sink.emit(AgentEvent::new(
            EventKind::UserMessage,
            serde_json::json!({ "text": turn.text(), "files": [] }),
        ));
        self.turns.push(turn);
    }

    /// Append model output. Empty output is stored as the completion placeholder.
    pub fn add_assistant_turn(&mut self, blocks: Vec<ContentBlock>) -> Result<(), HistoryError> {
        let blocks = if blocks.is_empty() {
            vec![ContentBlock::text(EMPTY_RESPONSE_PLACEHOLDER)]
        } else {
            blocks
        };
        let turn = Turn::new(Role::Assistant, blocks)?;
        self.turns.push(turn);
        Ok(())
    }

    /// Append the result of a dispatched call and forward it to the event sink.
    pub fn add_tool_result(&mut self, result: &ToolResult) {
        self.turns.push(Turn::tool_result(result));
        self.sink.emit(AgentEvent::new(
            EventKind::ToolResult,
            serde_json::json!({
                "tool_call_id": result.tool_call_id,
                "tool_name": result.tool_name,
                "output": result.output,
                "is_error": result.is_error,
            }),
        ));
    }

    pub fn add_session_summary(&mut self, text: impl Into<String>) {
        let turn = Turn::session_summary(text);
        self.sink
            .emit(AgentEvent::text(EventKind::SessionSummary, turn.text()));
        self.turns.push(turn);
    }

    /// Tool calls of the most recent assistant turn that have no result yet.
    pub fn pending_tool_calls(&self) -> Vec<PendingToolCall> {
        let Some(idx) = self.turns.iter().rposition(|t| t.role == Role::Assistant) else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.turns[idx + 1..]
            .iter()
            .flat_map(|t| t.answered_call_ids())
            .collect();
        self.turns[idx]
            .tool_calls()
            .into_iter()
            .filter(|call| !answered.contains(&call.id.as_str()))
            .collect()
    }

    pub fn count_tokens(&self) -> usize {
        self.counter.count(&self.turns)
    }

    /// Compress the history if it is over budget.
    ///
    /// Fails with [`HistoryError::OverBudget`] when the history cannot fit.
    pub async fn truncate(&mut self) -> Result<TruncateReport, HistoryError> {
        let report = self
            .context
            .compress(&mut self.turns, self.counter.as_ref())
            .await?;
        for digest in &report.summaries {
            self.sink
                .emit(AgentEvent::text(EventKind::SessionSummary, digest.clone()));
        }
        Ok(report)
    }

    pub fn clear(&mut self) {
        info!(turns = self.turns.len(), "Clearing history");
        self.turns.clear();
        self.context.reset();
    }

    /// Replace the history with previously recorded turns, validating each.
    pub fn restore(&mut self, turns: Vec<Turn>) -> Result<(), HistoryError> {
        for turn in &turns {
            turn.validate()?;
        }
        self.turns = turns;
        Ok(())
    }

    /// Project the turns into role-grouped model messages.
    ///
    /// Tool results and summaries travel in user messages; summaries only as text.
    pub fn to_model_messages(&self) -> Vec<ModelMessage> {
        let mut messages: Vec<ModelMessage> = Vec::new();
        for turn in &self.turns {
            let role = match turn.role {
                Role::Assistant => MessageRole::Assistant,
                Role::User | Role::ToolResult | Role::SessionSummary => MessageRole::User,
            };
            let content = match turn.role {
                Role::SessionSummary => vec![ContentBlock::text(turn.text())],
                _ => turn.blocks.clone(),
            };
            match messages.last_mut() {
                Some(last) if last.role == role => last.content.extend(content),
                _ => messages.push(ModelMessage { role, content }),
            }
        }
        messages
    }
}

/// Media type for attachments embedded as images.
fn image_media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
