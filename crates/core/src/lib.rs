//! # taskloop core
//!
//! Domain types, traits, and error definitions for the taskloop agent.
//! This crate has **no framework dependencies**; it defines the domain model
//! that the agent loop and every collaborator implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the loop is a trait here:
//! - [`Provider`]: the model-query contract
//! - [`Tool`]: an invocable capability, held by a [`ToolRegistry`]
//! - [`EventSink`] / [`EventObserver`]: fire-and-forget event delivery
//! - [`SessionStore`]: optional durable event log
//!
//! Implementations live in their respective crates, which keeps the loop
//! testable with scripted mocks.

pub mod agent;
pub mod completion;
pub mod error;
pub mod event;
pub mod interrupt;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{InterruptPhase, LoopState, TaskRequest, TaskResult, TerminalState};
pub use completion::{CompletionMode, CompletionSignal, CompletionTool};
pub use error::{Error, HistoryError, ProtocolViolation, ProviderError, Result, StoreError, ToolError};
pub use event::{AgentEvent, DeliveryError, EventBus, EventKind, EventObserver, EventSink, NullSink};
pub use interrupt::InterruptFlag;
pub use message::{ContentBlock, MessageRole, ModelMessage, PendingToolCall, Role, ToolResult, Turn};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolChoice, ToolDefinition, Usage};
pub use session::{FileSessionStore, InMemorySessionStore, SessionId, SessionStore};
pub use tool::{Tool, ToolContext, ToolOutcome, ToolRegistry};
