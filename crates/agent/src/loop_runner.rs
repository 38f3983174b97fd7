//! The agent loop state machine.

use std::sync::Arc;
use taskloop_config::AppConfig;
use taskloop_core::agent::{InterruptPhase, LoopState, TaskRequest, TaskResult, TerminalState};
use taskloop_core::completion::CompletionMode;
use taskloop_core::error::{ProtocolViolation, Result};
use taskloop_core::event::{AgentEvent, EventKind, EventSink};
use taskloop_core::interrupt::InterruptFlag;
use taskloop_core::message::{ContentBlock, PendingToolCall, ToolResult};
use taskloop_core::provider::{Provider, ProviderRequest, Usage};
use taskloop_core::tool::{Tool, ToolContext, ToolRegistry};
use tracing::{debug, error, info, warn};

use crate::context::{ContextManager, LlmSummarizer};
use crate::history::HistoryStore;
use crate::hooks::{StepHook, StepSummaryHook};
use crate::prompts::*;

/// Output recorded for tool calls left unanswered by an aborted run.
const NOT_EXECUTED_OUTPUT: &str = "Tool call was not executed.";

/// Per-session model settings.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    pub max_turns: u32,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_turns: config.agent.max_turns,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            system_prompt: config
                .agent
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

/// The core agent loop that orchestrates model queries and tool dispatch.
///
/// Each instance owns its tool registry and history; sessions share nothing.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    history: HistoryStore,
    interrupt: InterruptFlag,
    settings: LoopSettings,
    sink: Arc<dyn EventSink>,
    step_hook: Option<Arc<dyn StepHook>>,
    state: LoopState,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: ToolRegistry,
        history: HistoryStore,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provider,
            tools,
            history,
            interrupt: InterruptFlag::new(),
            settings: LoopSettings::default(),
            sink,
            step_hook: None,
            state: LoopState::AwaitingInput,
        }
    }

    /// Wire a loop from configuration: completion mode, summarizing context
    /// manager and optional step summaries all follow `config`.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Vec<Arc<dyn Tool>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let mode = if config.agent.interactive_mode {
            CompletionMode::ReturnControlToUser
        } else {
            CompletionMode::Complete
        };
        let registry = ToolRegistry::new(tools, mode)?;

        let summarizer = LlmSummarizer::new(
            provider.clone(),
            &config.model,
            config.context.summary_max_tokens,
        );
        let context =
            ContextManager::from_config(&config.context).with_summarizer(Arc::new(summarizer));
        let history = HistoryStore::new(context, sink.clone());

        let mut agent = Self::new(provider.clone(), registry, history, sink)
            .with_settings(LoopSettings::from_config(config));
        if config.agent.step_summaries {
            agent = agent.with_step_hook(Arc::new(StepSummaryHook::new(provider, &config.model)));
        }
        Ok(agent)
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.settings.max_turns = max_turns;
        self
    }

    pub fn with_step_hook(mut self, hook: Arc<dyn StepHook>) -> Self {
        self.step_hook = Some(hook);
        self
    }

    /// Share an externally owned interrupt flag.
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// A handle that can cancel the running task from another task or thread.
    pub fn interrupt_handle(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Request cooperative cancellation of the current task.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.interrupt.cancel();
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Drop all history and return to awaiting input.
    pub fn clear(&mut self) {
        self.history.clear();
        self.tools.reset();
        self.state = LoopState::AwaitingInput;
    }

    /// Run one instruction to a terminal outcome.
    ///
    /// Completion, interruption and running out of turns are results; only
    /// protocol violations, history failures and provider failures that
    /// survived retries are errors.
    pub async fn run(&mut self, request: TaskRequest) -> Result<TaskResult> {
        info!(
            resume = request.resume,
            attachments = request.attachments.len(),
            max_turns = self.settings.max_turns,
            "Starting task"
        );

        self.tools.reset();
        self.interrupt.clear();
        if request.resume {
            self.close_dangling_calls();
        } else {
            self.history.clear();
        }
        self.state = LoopState::Running;

        let outcome = self.run_turns(&request).await;
        match &outcome {
            Ok(result) => {
                self.state = result.state.into();
                info!(
                    state = ?result.state,
                    iterations = result.iterations,
                    input_tokens = result.usage.input_tokens,
                    output_tokens = result.usage.output_tokens,
                    "Task finished"
                );
            }
            Err(e) => {
                self.state = LoopState::Failed;
                error!(error = %e, "Task failed");
                self.sink.emit(AgentEvent::new(
                    EventKind::Error,
                    serde_json::json!({ "message": e.to_string() }),
                ));
            }
        }
        outcome
    }

    async fn run_turns(&mut self, request: &TaskRequest) -> Result<TaskResult> {
        self.history
            .add_user_turn(&request.instruction, &request.attachments)
            .await?;

        let mut usage = Usage::default();
        let mut iterations = 0;
        let mut remaining = self.settings.max_turns;

        while remaining > 0 {
            remaining -= 1;
            iterations += 1;

            self.history.truncate().await?;
            info!(
                turn = iterations,
                remaining,
                tokens = self.history.count_tokens(),
                budget = self.history.budget(),
                "New turn"
            );

            let tools = self.tools.validated_definitions()?;

            if self.interrupt.is_interrupted() {
                return Ok(self.interrupted(InterruptPhase::Planning, iterations, usage));
            }

            let query = ProviderRequest {
                model: self.settings.model.clone(),
                messages: self.history.to_model_messages(),
                system_prompt: Some(self.settings.system_prompt.clone()),
                max_tokens: self.settings.max_output_tokens,
                temperature: self.settings.temperature,
                tools,
                tool_choice: request.tool_choice.clone(),
            };
            let response = self.provider.complete(query).await?;
            if let Some(turn_usage) = &response.usage {
                usage.add(turn_usage);
                debug!(
                    input_tokens = turn_usage.input_tokens,
                    output_tokens = turn_usage.output_tokens,
                    "Model usage"
                );
            }

            let planning = response.text();
            self.history.add_assistant_turn(response.content)?;

            let pending = self.history.pending_tool_calls();
            let call = match pending.as_slice() {
                [] => {
                    warn!(turn = iterations, "Model returned no tool call, forcing one");
                    self.history.add_user_text(FORCE_TOOL_PROMPT);
                    continue;
                }
                [call] => call.clone(),
                calls => {
                    return Err(ProtocolViolation::MultipleToolCalls { count: calls.len() }.into());
                }
            };

            if !planning.trim().is_empty() {
                self.sink
                    .emit(AgentEvent::text(EventKind::AgentPlanning, planning));
            }
            self.sink.emit(AgentEvent::new(
                EventKind::ToolCall,
                serde_json::json!({
                    "id": call.id,
                    "tool_name": call.tool_name,
                    "tool_input": call.tool_input,
                }),
            ));

            if self.interrupt.is_interrupted() {
                self.history
                    .add_tool_result(&ToolResult::error(&call, TOOL_INTERRUPTED_OUTPUT));
                return Ok(self.interrupted(InterruptPhase::ToolExecution, iterations, usage));
            }

            let result = self.dispatch(&call).await?;
            self.history.add_tool_result(&result);
            if !self.tools.should_stop() && !self.interrupt.is_interrupted() {
                self.run_step_hook(&result).await;
            }

            if self.tools.should_stop() {
                return Ok(self.completed(iterations, usage));
            }
            if self.interrupt.is_interrupted() {
                return Ok(self.interrupted(InterruptPhase::ToolExecution, iterations, usage));
            }
        }

        warn!(iterations, "Max turns reached without completion");
        self.record_final_turn(MAX_TURNS_MESSAGE, EventKind::AgentResponse);
        Ok(TaskResult {
            state: TerminalState::MaxTurnsExceeded,
            output: MAX_TURNS_MESSAGE.into(),
            message: MAX_TURNS_MESSAGE.into(),
            iterations,
            usage,
        })
    }

    async fn dispatch(&self, call: &PendingToolCall) -> Result<ToolResult> {
        let ctx = ToolContext {
            history: self.history.turns(),
            interrupt: &self.interrupt,
        };
        let outcome = self.tools.dispatch(call, &ctx).await?;
        Ok(outcome.into_result(call))
    }

    async fn run_step_hook(&mut self, result: &ToolResult) {
        let Some(hook) = self.step_hook.clone() else {
            return;
        };
        match hook.after_tool_result(result).await {
            Ok(Some(summary)) => self.history.add_session_summary(summary),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Step summary failed, continuing"),
        }
    }

    fn completed(&mut self, iterations: u32, usage: Usage) -> TaskResult {
        let answer = self.tools.final_answer();
        info!(iterations, "Completion tool called");
        self.record_final_turn(&answer, EventKind::AgentResponse);
        TaskResult {
            state: TerminalState::Completed,
            output: answer,
            message: TASK_COMPLETED_MESSAGE.into(),
            iterations,
            usage,
        }
    }

    fn interrupted(&mut self, phase: InterruptPhase, iterations: u32, usage: Usage) -> TaskResult {
        let (output, turn_text) = match phase {
            InterruptPhase::Planning => (PLANNING_INTERRUPTED_OUTPUT, PLANNING_INTERRUPTED_TURN),
            InterruptPhase::ToolExecution => (TOOL_INTERRUPTED_OUTPUT, TOOL_INTERRUPTED_TURN),
        };
        info!(?phase, iterations, "Task interrupted");
        self.record_final_turn(turn_text, EventKind::AgentResponseInterrupted);
        TaskResult {
            state: TerminalState::Interrupted(phase),
            output: output.into(),
            message: turn_text.into(),
            iterations,
            usage,
        }
    }

    /// Record a closing assistant turn and announce it.
    fn record_final_turn(&mut self, text: &str, kind: EventKind) {
        let blocks = if text.is_empty() {
            Vec::new()
        } else {
            vec![ContentBlock::text(text)]
        };
        if let Err(e) = self.history.add_assistant_turn(blocks) {
            warn!(error = %e, "Failed to record final turn");
        }
        let recorded = self
            .history
            .turns()
            .last()
            .map(|t| t.text())
            .unwrap_or_default();
        self.sink.emit(AgentEvent::text(kind, recorded));
    }

    /// Answer tool calls left pending by an aborted run so a resumed history
    /// stays well formed.
    fn close_dangling_calls(&mut self) {
        for call in self.history.pending_tool_calls() {
            warn!(tool = %call.tool_name, call_id = %call.id, "Closing unanswered tool call");
            self.history
                .add_tool_result(&ToolResult::error(&call, NOT_EXECUTED_OUTPUT));
        }
    }
}
