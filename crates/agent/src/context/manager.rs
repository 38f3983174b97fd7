//! Keeps the live history inside the token budget.
//!
//! When the history is over budget, the oldest contiguous run of ordinary
//! turns between the task framing (the first turn) and the most recent
//! `keep_recent` turns is replaced by one `SessionSummary` turn produced by
//! an isolated summarization request. Summary turns are never re-summarized.
//!
//! If summarization is unavailable, fails, or is not enough, the oldest turns
//! after the framing are dropped until the history fits. A tool call and its
//! results are always kept or removed together. When only the framing and the
//! latest step remain and they still do not fit, their largest tool outputs
//! (then texts) are clipped. A history that cannot be made to fit is an error.

use std::ops::Range;
use std::sync::Arc;
use taskloop_config::ContextSection;
use taskloop_core::error::HistoryError;
use taskloop_core::message::{ContentBlock, Role, Turn};
use tracing::{debug, info, warn};

use super::summarizer::Summarizer;
use super::token::TokenCounter;

/// Prefix of the summary turns this manager inserts.
pub const SUMMARY_PREFIX: &str = "Summary of earlier conversation: ";

/// Appended to text clipped to fit the budget.
pub const CLIP_MARKER: &str = "\n[truncated to fit the context budget]";

/// Blocks shorter than this are never clipped.
const CLIP_MIN_CHARS: usize = 128;

/// What a truncation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TruncateReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// Digests inserted, oldest first
    pub summaries: Vec<String>,
    /// Turns replaced by summaries
    pub summarized_turns: usize,
    /// Turns dropped without a summary
    pub dropped_turns: usize,
    /// Blocks clipped because the protected turns alone exceeded the budget
    pub clipped_blocks: usize,
}

impl TruncateReport {
    pub fn changed(&self) -> bool {
        self.summarized_turns > 0 || self.dropped_turns > 0 || self.clipped_blocks > 0
    }
}

pub struct ContextManager {
    budget: usize,
    keep_recent: usize,
    max_summary_failures: u32,
    failure_streak: u32,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl ContextManager {
    pub fn new(budget: usize, keep_recent: usize) -> Self {
        Self {
            budget,
            keep_recent: keep_recent.max(1),
            max_summary_failures: 2,
            failure_streak: 0,
            summarizer: None,
        }
    }

    pub fn from_config(section: &ContextSection) -> Self {
        Self::new(section.token_budget, section.keep_recent_turns)
            .with_max_summary_failures(section.max_summary_failures)
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_max_summary_failures(mut self, max: u32) -> Self {
        self.max_summary_failures = max;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Consecutive summarization failures since the last success or reset.
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    pub fn reset(&mut self) {
        self.failure_streak = 0;
    }

    /// Bring `turns` within budget. A no-op when already within budget.
    ///
    /// On success the history costs at most the budget. Fails with
    /// [`HistoryError::OverBudget`] only when nothing is left to drop or clip.
    pub async fn compress(
        &mut self,
        turns: &mut Vec<Turn>,
        counter: &dyn TokenCounter,
    ) -> Result<TruncateReport, HistoryError> {
        let tokens_before = counter.count(turns);
        let mut report = TruncateReport {
            tokens_before,
            tokens_after: tokens_before,
            ..TruncateReport::default()
        };
        if tokens_before <= self.budget {
            return Ok(report);
        }

        info!(
            tokens = tokens_before,
            budget = self.budget,
            turns = turns.len(),
            "History over budget, compressing"
        );

        self.summarize_runs(turns, counter, &mut report).await;

        while counter.count(turns) > self.budget {
            let Some(unit) = Self::oldest_droppable(turns) else {
                break;
            };
            debug!(turns = unit.len(), "Dropping oldest turns");
            report.dropped_turns += unit.len();
            turns.drain(unit);
        }
        if report.dropped_turns > 0 {
            warn!(
                dropped = report.dropped_turns,
                "Hard-truncated history to fit the budget"
            );
        }

        while counter.count(turns) > self.budget {
            let Some((turn, block)) = Self::largest_clippable(turns) else {
                break;
            };
            clip_block(&mut turns[turn].blocks[block]);
            report.clipped_blocks += 1;
        }
        if report.clipped_blocks > 0 {
            warn!(
                clipped = report.clipped_blocks,
                "Clipped oversized blocks to fit the budget"
            );
        }

        report.tokens_after = counter.count(turns);
        if report.tokens_after > self.budget {
            return Err(HistoryError::OverBudget {
                tokens: report.tokens_after,
                budget: self.budget,
            });
        }
        Ok(report)
    }

    async fn summarize_runs(
        &mut self,
        turns: &mut Vec<Turn>,
        counter: &dyn TokenCounter,
        report: &mut TruncateReport,
    ) {
        let Some(summarizer) = self.summarizer.clone() else {
            return;
        };

        while counter.count(turns) > self.budget {
            if self.failure_streak >= self.max_summary_failures {
                debug!(
                    failures = self.failure_streak,
                    "Summarization disabled after repeated failures"
                );
                return;
            }
            let Some(run) = self.next_summary_run(turns) else {
                return;
            };

            match summarizer.summarize(&turns[run.clone()]).await {
                Ok(digest) => {
                    self.failure_streak = 0;
                    report.summarized_turns += run.len();
                    info!(turns = run.len(), "Summarized older turns");
                    turns.splice(
                        run,
                        [Turn::session_summary(format!("{SUMMARY_PREFIX}{digest}"))],
                    );
                    report.summaries.push(digest);
                }
                Err(e) => {
                    self.failure_streak += 1;
                    warn!(
                        error = %e,
                        failures = self.failure_streak,
                        "Summarization failed, skipping for this turn"
                    );
                    return;
                }
            }
        }
    }

    /// Index of the first turn of the protected recent tail.
    fn tail_start(&self, turns: &[Turn]) -> usize {
        let mut start = turns.len().saturating_sub(self.keep_recent).max(1);
        while start > 1 && start < turns.len() && turns[start].role == Role::ToolResult {
            start -= 1;
        }
        start
    }

    /// The oldest contiguous run of non-summary turns eligible for summarizing.
    fn next_summary_run(&self, turns: &[Turn]) -> Option<Range<usize>> {
        let end_limit = self.tail_start(turns);
        let start = (1..end_limit).find(|&i| turns[i].role != Role::SessionSummary)?;
        let end = (start..end_limit)
            .find(|&i| turns[i].role == Role::SessionSummary)
            .unwrap_or(end_limit);
        Some(start..end)
    }

    /// The oldest unit after the framing turn, never including the final turn.
    ///
    /// An assistant turn with tool calls goes together with every tool result
    /// that follows it. A leading tool result goes with the results after it.
    fn oldest_droppable(turns: &[Turn]) -> Option<Range<usize>> {
        if turns.len() < 3 {
            return None;
        }
        let mut end = 2;
        if has_tool_call(&turns[1]) || turns[1].role == Role::ToolResult {
            while end < turns.len() && turns[end].role == Role::ToolResult {
                end += 1;
            }
        }
        (end < turns.len()).then_some(1..end)
    }

    /// Position of the longest clippable block: tool outputs first, then text.
    fn largest_clippable(turns: &[Turn]) -> Option<(usize, usize)> {
        largest_block(turns, |block| match block {
            ContentBlock::ToolCallResult { output, .. } => Some(output),
            _ => None,
        })
        .or_else(|| {
            largest_block(turns, |block| match block {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            })
        })
    }
}

fn largest_block(
    turns: &[Turn],
    text_of: impl Fn(&ContentBlock) -> Option<&String>,
) -> Option<(usize, usize)> {
    turns
        .iter()
        .enumerate()
        .flat_map(|(t, turn)| {
            turn.blocks
                .iter()
                .enumerate()
                .map(move |(b, block)| (t, b, block))
        })
        .filter_map(|(t, b, block)| {
            let len = text_of(block)?.chars().count();
            (len >= CLIP_MIN_CHARS).then_some((len, t, b))
        })
        .max_by_key(|(len, _, _)| *len)
        .map(|(_, t, b)| (t, b))
}

/// Keep the first half of a block's text and mark the cut.
fn clip_block(block: &mut ContentBlock) {
    let text = match block {
        ContentBlock::ToolCallResult { output, .. } => output,
        ContentBlock::Text { text } => text,
        _ => return,
    };
    let keep = text.chars().count() / 2;
    let mut clipped: String = text.chars().take(keep).collect();
    clipped.push_str(CLIP_MARKER);
    *text = clipped;
}

fn has_tool_call(turn: &Turn) -> bool {
    turn.role == Role::Assistant
        && turn
            .blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCall { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::summarizer::Summarizer;
    use crate::context::token::HeuristicTokenCounter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskloop_core::error::ProviderError;
    use taskloop_core::message::{PendingToolCall, ToolResult};

    struct FixedSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _turns: &[Turn]) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("found it".into())
        }
    }

    struct FailingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _turns: &[Turn]) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Overloaded("busy".into()))
        }
    }

    fn call(id: &str) -> PendingToolCall {
        PendingToolCall {
            id: id.into(),
            tool_name: "read_file".into(),
            tool_input: serde_json::json!({"path": format!("{id}.txt")}),
        }
    }

    fn assistant_calling(calls: &[PendingToolCall]) -> Turn {
        Turn::new(
            Role::Assistant,
            calls
                .iter()
                .map(|c| ContentBlock::ToolCall {
                    id: c.id.clone(),
                    name: c.tool_name.clone(),
                    input: c.tool_input.clone(),
                })
                .collect(),
        )
        .unwrap()
    }

    fn tool_step(n: usize, output_len: usize) -> Vec<Turn> {
        let call = call(&format!("call_{n}"));
        vec![
            assistant_calling(std::slice::from_ref(&call)),
            Turn::tool_result(&ToolResult::success(&call, "x".repeat(output_len))),
        ]
    }

    fn long_history(steps: usize) -> Vec<Turn> {
        let mut turns = vec![Turn::user("Analyze every file")];
        for n in 0..steps {
            turns.extend(tool_step(n, 400));
        }
        turns
    }

    /// Every tool result answers a call issued by the nearest assistant turn
    /// before it, and every call before the last turn is answered.
    fn assert_pairs_intact(turns: &[Turn]) {
        let mut issued: Vec<String> = Vec::new();
        for (i, turn) in turns.iter().enumerate() {
            if turn.role == Role::ToolResult {
                for id in turn.answered_call_ids() {
                    let pos = issued
                        .iter()
                        .position(|c| c == id)
                        .unwrap_or_else(|| panic!("tool result {id} at {i} has no call"));
                    issued.remove(pos);
                }
            } else {
                assert!(issued.is_empty(), "calls {issued:?} unanswered before {i}");
                issued = turn.tool_calls().into_iter().map(|c| c.id).collect();
            }
        }
    }

    #[tokio::test]
    async fn within_budget_is_noop() {
        let mut turns = long_history(2);
        let before = turns.clone();
        let mut manager = ContextManager::new(10_000, 2);
        let report = manager
            .compress(&mut turns, &HeuristicTokenCounter)
            .await
            .unwrap();
        assert!(!report.changed());
        assert_eq!(turns, before);
    }

    #[tokio::test]
    async fn summarizes_oldest_run_and_keeps_framing_and_tail() {
        let mut turns = long_history(6);
        let total = HeuristicTokenCounter.count(&turns);
        let summarizer = Arc::new(FixedSummarizer {
            calls: AtomicUsize::new(0),
        });
        let mut manager = ContextManager::new(total / 2, 2).with_summarizer(summarizer.clone());

        let last_two = turns[turns.len() - 2..].to_vec();
        let report = manager
            .compress(&mut turns, &HeuristicTokenCounter)
            .await
            .unwrap();

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.summaries, vec!["found it".to_string()]);
        assert_eq!(report.dropped_turns, 0);
        assert_eq!(turns[0].text(), "Analyze every file");
        assert_eq!(turns[1].role, Role::SessionSummary);
        assert_eq!(turns[1].text(), format!("{SUMMARY_PREFIX}found it"));
        assert_eq!(turns[turns.len() - 2..], last_two[..]);
        assert!(HeuristicTokenCounter.count(&turns) <= total / 2);
    }

    #[tokio::test]
    async fn repeated_compression_is_idempotent() {
        let mut turns = long_history(6);
        let total = HeuristicTokenCounter.count(&turns);
        let summarizer = Arc::new(FixedSummarizer {
            calls: AtomicUsize::new(0),
        });
        let mut manager = ContextManager::new(total / 2, 2).with_summarizer(summarizer.clone());

        manager
            .compress(&mut turns, &HeuristicTokenCounter)
            .await
            .unwrap();
        let compact = turns.clone();
        let report = manager
            .compress(&mut turns, &HeuristicTokenCounter)
            .await
            .unwrap();

        assert!(!report.changed());
        assert_eq!(turns, compact);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn summarization_failure_falls_back_to_dropping() {
        let mut turns = long_history(6);
        let budget = HeuristicTokenCounter.count(&turns) / 2;
        let summarizer = Arc::new(FailingSummarizer {
            calls: AtomicUsize::new(0),
        });
        let mut manager = ContextManager::new(budget, 2)
            .with_summarizer(summarizer.clone())
            .with_max_summary_failures(2);

        let report = manager
            .compress(&mut turns, &HeuristicTokenCounter)
            .await
            .unwrap();
        assert!(report.summaries.is_empty());
        assert!(report.dropped_turns > 0);
        assert_eq!(report.clipped_blocks, 0);
        assert!(HeuristicTokenCounter.count(&turns) <= budget);
        assert_eq!(manager.failure_streak(), 1);
        assert_eq!(turns[0].text(), "Analyze every file");
        assert_pairs_intact(&turns);
    }

    #[tokio::test]
    async fn stops_summarizing_after_repeated_failures() {
        let summarizer = Arc::new(FailingSummarizer {
            calls: AtomicUsize::new(0),
        });
        let mut manager = ContextManager::new(0, 2)
            .with_summarizer(summarizer.clone())
            .with_max_summary_failures(2);
        // Budget of zero is never met, so each pass reaches the summarizer
        // until the failure limit is hit.
        for _ in 0..5 {
            let mut turns = long_history(6);
            let result = manager.compress(&mut turns, &HeuristicTokenCounter).await;
            assert!(matches!(result, Err(HistoryError::OverBudget { budget: 0, .. })));
        }
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);

        manager.reset();
        let mut turns = long_history(6);
        let _ = manager.compress(&mut turns, &HeuristicTokenCounter).await;
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn count_after_truncate_never_exceeds_budget() {
        for steps in 1..12 {
            for budget in [60, 150, 400, 900] {
                let mut turns = long_history(steps);
                let mut manager = ContextManager::new(budget, 3);
                let report = manager
                    .compress(&mut turns, &HeuristicTokenCounter)
                    .await
                    .unwrap_or_else(|e| panic!("steps={steps} budget={budget}: {e}"));
                let after = HeuristicTokenCounter.count(&turns);
                assert!(after <= budget, "steps={steps} budget={budget} after={after}");
                assert_eq!(report.tokens_after, after);
                assert_pairs_intact(&turns);
            }
        }
    }

    #[tokio::test]
    async fn dropping_keeps_multi_call_turn_with_all_its_results() {
        let (a, b, c) = (call("a"), call("b"), call("c"));
        let mut turns = vec![
            Turn::user("Analyze every file"),
            assistant_calling(&[a.clone(), b.clone()]),
            Turn::tool_result(&ToolResult::success(&a, "ok")),
            Turn::tool_result(&ToolResult::success(&b, "ok")),
            Turn::user("y".repeat(400)),
            assistant_calling(std::slice::from_ref(&c)),
            Turn::tool_result(&ToolResult::success(&c, "ok")),
        ];
        let mut manager = ContextManager::new(135, 2);

        let report = manager
            .compress(&mut turns, &HeuristicTokenCounter)
            .await
            .unwrap();

        assert_eq!(report.dropped_turns, 3);
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].role, Role::User);
        assert!(HeuristicTokenCounter.count(&turns) <= 135);
        assert_pairs_intact(&turns);
    }

    #[test]
    fn leading_tool_results_are_dropped_together() {
        let (a, b) = (call("a"), call("b"));
        let mut turns = vec![
            Turn::user("Analyze every file"),
            Turn::tool_result(&ToolResult::success(&a, "x".repeat(400))),
            Turn::tool_result(&ToolResult::success(&b, "x".repeat(400))),
            Turn::user("next"),
        ];
        assert_eq!(ContextManager::oldest_droppable(&turns), Some(1..3));

        turns.truncate(3);
        assert_eq!(ContextManager::oldest_droppable(&turns), None);
    }

    #[tokio::test]
    async fn oversized_final_output_is_clipped_to_fit() {
        let a = call("a");
        let mut turns = vec![
            Turn::user("Analyze"),
            assistant_calling(std::slice::from_ref(&a)),
            Turn::tool_result(&ToolResult::success(&a, "x".repeat(4000))),
        ];
        let mut manager = ContextManager::new(500, 2);

        let report = manager
            .compress(&mut turns, &HeuristicTokenCounter)
            .await
            .unwrap();

        assert_eq!(report.dropped_turns, 0);
        assert!(report.clipped_blocks > 0);
        assert!(HeuristicTokenCounter.count(&turns) <= 500);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].text(), "Analyze");
        let ContentBlock::ToolCallResult { output, .. } = &turns[2].blocks[0] else {
            panic!("expected a tool result block");
        };
        assert!(output.starts_with("xxxx"));
        assert!(output.ends_with(CLIP_MARKER));
        assert_pairs_intact(&turns);
    }

    #[tokio::test]
    async fn unfittable_history_is_an_error() {
        let mut turns = vec![
            Turn::new(
                Role::User,
                vec![
                    ContentBlock::text("Describe this"),
                    ContentBlock::Image {
                        media_type: "image/png".into(),
                        data: "iVBORw==".into(),
                    },
                ],
            )
            .unwrap(),
            Turn::assistant("Looking."),
        ];
        let mut manager = ContextManager::new(500, 2);

        let err = manager
            .compress(&mut turns, &HeuristicTokenCounter)
            .await
            .unwrap_err();

        match err {
            HistoryError::OverBudget { tokens, budget } => {
                assert_eq!(budget, 500);
                assert!(tokens > 500);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tail_never_starts_with_a_tool_result() {
        let turns = long_history(4);
        let manager = ContextManager::new(10, 1);
        let start = manager.tail_start(&turns);
        assert_ne!(turns[start].role, Role::ToolResult);
        assert_eq!(start, turns.len() - 2);
    }

    #[test]
    fn summary_turns_split_eligible_runs() {
        let mut turns = long_history(4);
        turns.insert(3, Turn::session_summary("Summary of last action: read f0"));
        let manager = ContextManager::new(10, 2);
        assert_eq!(manager.next_summary_run(&turns), Some(1..3));

        turns.remove(1);
        turns.remove(1);
        // turns[1] is now the summary; the run starts after it
        assert_eq!(manager.next_summary_run(&turns), Some(2..turns.len() - 2));
    }
}
