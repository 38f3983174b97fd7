//! The agent loop: one instruction in, one terminal outcome out.
//!
//! Every iteration runs **compress → query → record → dispatch**:
//!
//! 1. **Compress** the history to the token budget (summaries first, then drops)
//! 2. **Query** the model with the full history and the tool definitions
//! 3. **Record** the response; text-only answers get a corrective prompt
//! 4. **Dispatch** the single tool call and record its result
//!
//! The loop ends when the completion tool is called, the task is
//! interrupted, or the turn limit runs out.

pub mod context;
pub mod history;
pub mod hooks;
pub mod loop_runner;
pub mod prompts;
pub mod pump;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{ContextManager, HeuristicTokenCounter, LlmSummarizer, Summarizer, TokenCounter};
pub use history::HistoryStore;
pub use hooks::{StepHook, StepSummaryHook};
pub use loop_runner::{AgentLoop, LoopSettings};
pub use pump::{EventPump, PumpStats};
