//! Fixed texts the loop records or returns.

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an autonomous assistant that completes tasks by calling tools.

Rules:
- Call exactly one tool per turn. Never answer with plain text alone.
- Read each tool result before deciding the next step.
- When the task is finished, call the completion tool with your final answer.
- If a tool fails, use the error message to adjust your next call.";

/// Recorded when the model returns no content at all.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "Completed the task.";

/// Corrective user turn after a response without a tool call.
pub const FORCE_TOOL_PROMPT: &str = "You must use a tool to answer the question.";

pub const MAX_TURNS_MESSAGE: &str = "Agent did not complete after max turns";

pub const TASK_COMPLETED_MESSAGE: &str = "Task completed";

pub const PLANNING_INTERRUPTED_OUTPUT: &str = "Agent interrupted by user.";
pub const PLANNING_INTERRUPTED_TURN: &str =
    "Agent interrupted by user. You can resume by providing a new instruction.";

pub const TOOL_INTERRUPTED_OUTPUT: &str = "Tool execution interrupted by user.";
pub const TOOL_INTERRUPTED_TURN: &str =
    "Tool execution interrupted by user. You can resume by providing a new instruction.";

/// Prefix of the per-step advisory summaries.
pub const STEP_SUMMARY_PREFIX: &str = "Summary of last action: ";
