//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, plus a fixed
//! per-turn overhead for role and delimiters. Counting is pluggable through
//! [`TokenCounter`] so a real tokenizer can replace the heuristic.

use taskloop_core::message::{ContentBlock, Turn};

/// Per-turn overhead for role name, delimiters and formatting markers.
const TURN_OVERHEAD: usize = 4;

/// Flat cost charged for an embedded image.
pub const IMAGE_TOKENS: usize = 1600;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Strategy for pricing the live history.
///
/// Implementations must be deterministic: the same turns always cost the same.
pub trait TokenCounter: Send + Sync {
    fn count_turn(&self, turn: &Turn) -> usize;

    fn count(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|t| self.count_turn(t)).sum()
    }
}

/// The 4-characters-per-token heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl HeuristicTokenCounter {
    fn count_block(block: &ContentBlock) -> usize {
        match block {
            ContentBlock::Text { text } => estimate_tokens(text),
            ContentBlock::Image { .. } => IMAGE_TOKENS,
            ContentBlock::ToolCall { name, input, .. } => {
                estimate_tokens(name) + estimate_tokens(&input.to_string())
            }
            ContentBlock::ToolCallResult { output, .. } => estimate_tokens(output),
        }
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_turn(&self, turn: &Turn) -> usize {
        TURN_OVERHEAD + turn.blocks.iter().map(Self::count_block).sum::<usize>()
    }
}
