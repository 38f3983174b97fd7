//! Task request/result types and the agent loop's states.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::provider::{ToolChoice, Usage};

/// Where the agent loop is in its state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    AwaitingInput,
    Running,
    Interrupted,
    Completed,
    MaxTurnsExceeded,
    /// The last run ended in a fatal error
    Failed,
}

/// Where the interrupt was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptPhase {
    /// Before a model query
    Planning,
    /// Around a tool dispatch
    ToolExecution,
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum TerminalState {
    Completed,
    Interrupted(InterruptPhase),
    MaxTurnsExceeded,
}

impl From<TerminalState> for LoopState {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Completed => LoopState::Completed,
            TerminalState::Interrupted(_) => LoopState::Interrupted,
            TerminalState::MaxTurnsExceeded => LoopState::MaxTurnsExceeded,
        }
    }
}

/// One instruction for the agent loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub instruction: String,

    /// Files attached to the instruction; images are embedded
    #[serde(default)]
    pub attachments: Vec<PathBuf>,

    /// Keep the previous history instead of starting fresh
    #[serde(default)]
    pub resume: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl TaskRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<PathBuf>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }
}

/// The defined outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub state: TerminalState,

    /// The answer, or the canned interrupted / max-turns text
    pub output: String,

    /// A short status line for the caller
    pub message: String,

    /// Loop iterations consumed
    pub iterations: u32,

    /// Model tokens consumed during the run
    #[serde(default)]
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_state_starts_awaiting_input() {
        assert_eq!(LoopState::default(), LoopState::AwaitingInput);
    }

    #[test]
    fn terminal_state_maps_to_loop_state() {
        assert_eq!(
            LoopState::from(TerminalState::Interrupted(InterruptPhase::Planning)),
            LoopState::Interrupted
        );
        assert_eq!(LoopState::from(TerminalState::MaxTurnsExceeded), LoopState::MaxTurnsExceeded);
    }

    #[test]
    fn task_request_builder() {
        let req = TaskRequest::new("summarize the report")
            .with_attachments(vec!["chart.png".into()])
            .resume(true)
            .with_tool_choice(ToolChoice::Auto);
        assert!(req.resume);
        assert_eq!(req.attachments.len(), 1);
        assert_eq!(req.tool_choice, Some(ToolChoice::Auto));
    }
}
