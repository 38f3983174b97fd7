//! The designated completion tool.
//!
//! Calling it is how the model ends a task: dispatch records the final
//! answer and flips `should_stop`. The agent loop reads the signal once per
//! turn and the registry resets it between tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::ToolError;
use crate::tool::{Tool, ToolContext};

/// Which completion tool a session exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Non-interactive runs: the model submits a final answer.
    Complete,
    /// Interactive runs: the model hands control back to the user.
    #[default]
    ReturnControlToUser,
}

/// Owned by the completion tool, mutated only by dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub should_stop: bool,
    pub final_answer: String,
}

pub struct CompletionTool {
    mode: CompletionMode,
    signal: Mutex<CompletionSignal>,
}

impl CompletionTool {
    pub fn new(mode: CompletionMode) -> Self {
        Self {
            mode,
            signal: Mutex::new(CompletionSignal::default()),
        }
    }

    pub fn signal(&self) -> CompletionSignal {
        self.signal
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn reset(&self) {
        self.set(CompletionSignal::default());
    }

    fn set(&self, value: CompletionSignal) {
        match self.signal.lock() {
            Ok(mut signal) => *signal = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

#[async_trait]
impl Tool for CompletionTool {
    fn name(&self) -> &str {
        match self.mode {
            CompletionMode::Complete => "complete",
            CompletionMode::ReturnControlToUser => "return_control_to_user",
        }
    }

    fn description(&self) -> &str {
        match self.mode {
            CompletionMode::Complete => {
                "Call this tool when you are done with the task, and supply your answer or summary."
            }
            CompletionMode::ReturnControlToUser => {
                "Call this tool when assistant needs to return control to the user, \
                 either because the task is finished or because the user must provide more input."
            }
        }
    }

    fn input_schema(&self) -> serde_json::Value {
        match self.mode {
            CompletionMode::Complete => serde_json::json!({
                "type": "object",
                "properties": {
                    "answer": {
                        "type": "string",
                        "description": "The answer to the question, or final summary of actions taken to accomplish the task."
                    }
                },
                "required": ["answer"]
            }),
            CompletionMode::ReturnControlToUser => serde_json::json!({
                "type": "object",
                "properties": {
                    "answer": {
                        "type": "string",
                        "description": "Message shown to the user when control returns to them."
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext<'_>,
    ) -> std::result::Result<String, ToolError> {
        let answer = match (self.mode, input.get("answer").and_then(|a| a.as_str())) {
            (_, Some(answer)) => answer.to_string(),
            (CompletionMode::ReturnControlToUser, None) => String::new(),
            (CompletionMode::Complete, None) => {
                return Err(ToolError::InvalidArguments(
                    "complete requires a string 'answer'".into(),
                ));
            }
        };
        self.set(CompletionSignal {
            should_stop: true,
            final_answer: answer,
        });
        Ok(match self.mode {
            CompletionMode::Complete => "Task completed".into(),
            CompletionMode::ReturnControlToUser => "Handing control back to the user.".into(),
        })
    }
}
