//! Terminal rendering of agent events.

use async_trait::async_trait;
use taskloop_core::event::{AgentEvent, DeliveryError, EventKind, EventObserver};

/// Longest preview printed for tool inputs, outputs and summaries.
const PREVIEW_CHARS: usize = 160;

/// Prints progress lines to stderr so stdout carries only answers.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl ConsoleObserver {
    /// One progress line for `event`, or `None` for events shown elsewhere.
    pub fn render(event: &AgentEvent) -> Option<String> {
        let content = &event.content;
        match event.kind {
            EventKind::AgentPlanning => Some(format!("  … {}", preview(text_of(content)))),
            EventKind::ToolCall => Some(format!(
                "  → {} {}",
                content["tool_name"].as_str().unwrap_or("?"),
                preview(&content["tool_input"].to_string())
            )),
            EventKind::ToolResult => {
                let marker = if content["is_error"].as_bool().unwrap_or(false) {
                    "✗"
                } else {
                    "←"
                };
                Some(format!(
                    "  {marker} {}: {}",
                    content["tool_name"].as_str().unwrap_or("?"),
                    preview(content["output"].as_str().unwrap_or_default())
                ))
            }
            EventKind::SessionSummary => Some(format!("  [summary] {}", preview(text_of(content)))),
            EventKind::UserMessage
            | EventKind::AgentResponse
            | EventKind::AgentResponseInterrupted
            | EventKind::Error => None,
        }
    }
}

#[async_trait]
impl EventObserver for ConsoleObserver {
    async fn deliver(&self, event: &AgentEvent) -> Result<(), DeliveryError> {
        if let Some(line) = Self::render(event) {
            eprintln!("{line}");
        }
        Ok(())
    }
}

fn text_of(content: &serde_json::Value) -> &str {
    content["text"].as_str().unwrap_or_default()
}

/// First line of `text`, cut to [`PREVIEW_CHARS`].
fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(PREVIEW_CHARS).collect();
    if out.len() < line.len() || text.lines().nth(1).is_some() {
        out.push_str(" …");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_shows_name_and_input() {
        let event = AgentEvent::new(
            EventKind::ToolCall,
            serde_json::json!({"id": "call_1", "tool_name": "read_file", "tool_input": {"path": "a.csv"}}),
        );
        assert_eq!(
            ConsoleObserver::render(&event).unwrap(),
            r#"  → read_file {"path":"a.csv"}"#
        );
    }

    #[test]
    fn failed_tool_result_is_marked() {
        let event = AgentEvent::new(
            EventKind::ToolResult,
            serde_json::json!({"tool_call_id": "call_1", "tool_name": "read_file", "output": "Error: missing\nmore", "is_error": true}),
        );
        assert_eq!(
            ConsoleObserver::render(&event).unwrap(),
            "  ✗ read_file: Error: missing …"
        );
    }

    #[test]
    fn long_text_is_cut() {
        let rendered = preview(&"x".repeat(500));
        assert_eq!(rendered.chars().count(), PREVIEW_CHARS + 2);
    }

    #[test]
    fn answers_are_not_rendered() {
        let event = AgentEvent::text(EventKind::AgentResponse, "42");
        assert!(ConsoleObserver::render(&event).is_none());
    }
}
