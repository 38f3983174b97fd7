//! History compression against a token budget.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`TokenCounter`] | Prices the live history (pluggable, heuristic by default) |
//! | [`Summarizer`] | Condenses a run of turns through an isolated model call |
//! | [`ContextManager`] | Chooses what to summarize or drop so the history fits |

pub mod manager;
pub mod summarizer;
pub mod token;

pub use manager::{ContextManager, SUMMARY_PREFIX, TruncateReport};
pub use summarizer::{LlmSummarizer, Summarizer};
pub use token::{HeuristicTokenCounter, TokenCounter, estimate_tokens};
