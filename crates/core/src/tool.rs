//! The tool trait, the abstraction over agent capabilities, and the registry
//! that dispatches tool calls by name.
//!
//! The registry is built once per session with an upfront uniqueness check.
//! It always carries exactly one completion tool (see [`crate::completion`]),
//! whose signal the agent loop reads after every dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::completion::{CompletionMode, CompletionSignal, CompletionTool};
use crate::error::{ProtocolViolation, ToolError};
use crate::interrupt::InterruptFlag;
use crate::message::{PendingToolCall, ToolResult, Turn};
use crate::provider::ToolDefinition;

/// What a tool sees while it runs.
pub struct ToolContext<'a> {
    /// The session's turns so far
    pub history: &'a [Turn],

    /// Tools running for a long time may poll this and return early
    pub interrupt: &'a InterruptFlag,
}

/// The core Tool trait.
///
/// Stateless tools may be shared between sessions behind an `Arc`; a tool
/// that caches anything must be constructed per session.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Result of a dispatch that reached a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok(String),
    ToolError(String),
}

impl ToolOutcome {
    pub fn into_result(self, call: &PendingToolCall) -> ToolResult {
        match self {
            Self::Ok(output) => ToolResult::success(call, output),
            Self::ToolError(message) => ToolResult::error(call, message),
        }
    }
}

/// Reject the tool set if any two definitions share a name.
///
/// Sorts the names and compares neighbours, failing on the first duplicate.
pub fn check_unique_names(definitions: &[ToolDefinition]) -> Result<(), ProtocolViolation> {
    let mut names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
    names.sort_unstable();
    match names.windows(2).find(|pair| pair[0] == pair[1]) {
        Some(pair) => Err(ProtocolViolation::DuplicateToolName(pair[0].to_string())),
        None => Ok(()),
    }
}

/// The fixed set of invocable tools for one session.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, completion tool last
    order: Vec<String>,
    completion: Arc<CompletionTool>,
}

impl ToolRegistry {
    /// Build a registry from `tools` plus the completion tool for `mode`.
    pub fn new(tools: Vec<Arc<dyn Tool>>, mode: CompletionMode) -> Result<Self, ProtocolViolation> {
        let completion = Arc::new(CompletionTool::new(mode));
        let mut all = tools;
        all.push(completion.clone());

        let definitions: Vec<ToolDefinition> = all.iter().map(|t| t.to_definition()).collect();
        check_unique_names(&definitions)?;

        let order = all.iter().map(|t| t.name().to_string()).collect();
        let tools = all
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();

        Ok(Self {
            tools,
            order,
            completion,
        })
    }

    /// A registry holding only the completion tool.
    pub fn completion_only(mode: CompletionMode) -> Self {
        let completion = Arc::new(CompletionTool::new(mode));
        let name = completion.name().to_string();
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert(name.clone(), completion.clone());
        Self {
            tools,
            order: vec![name],
            completion,
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Tool definitions in registration order (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.to_definition())
            .collect()
    }

    /// Definitions, re-checked for name uniqueness. Tools report their names
    /// dynamically, so the loop calls this before every model query.
    pub fn validated_definitions(&self) -> Result<Vec<ToolDefinition>, ProtocolViolation> {
        let definitions = self.definitions();
        check_unique_names(&definitions)?;
        Ok(definitions)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Execute a tool call.
    ///
    /// A failing tool yields [`ToolOutcome::ToolError`]; only an unknown tool
    /// name is an error, since the model should only reference declared tools.
    pub async fn dispatch(
        &self,
        call: &PendingToolCall,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutcome, ProtocolViolation> {
        let tool = self
            .tools
            .get(&call.tool_name)
            .ok_or_else(|| ProtocolViolation::UnknownTool(call.tool_name.clone()))?;

        info!(tool = %call.tool_name, call_id = %call.id, "Running tool");
        debug!(tool = %call.tool_name, input = %call.tool_input, "Tool input");

        let start = Instant::now();
        let result = tool.execute(call.tool_input.clone(), ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                debug!(tool = %call.tool_name, duration_ms, output = %output, "Tool finished");
                Ok(ToolOutcome::Ok(output))
            }
            Err(e) => {
                warn!(tool = %call.tool_name, duration_ms, error = %e, "Tool execution failed");
                Ok(ToolOutcome::ToolError(format!("Error: {e}")))
            }
        }
    }

    pub fn completion_signal(&self) -> CompletionSignal {
        self.completion.signal()
    }

    pub fn should_stop(&self) -> bool {
        self.completion.signal().should_stop
    }

    pub fn final_answer(&self) -> String {
        self.completion.signal().final_answer
    }

    /// Clear the completion signal between tasks.
    pub fn reset(&self) {
        self.completion.reset();
    }
}
