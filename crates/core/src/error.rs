//! Error types for the taskloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is the task-level
//! error that aborts a run.
//!
//! Recoverable tool failures ([`ToolError`]) never reach the caller of the
//! agent loop: they are turned into tool-result text. Everything that does
//! reach the caller is fatal for the current task.

use thiserror::Error;

/// The top-level error type for all taskloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model unavailable (after the provider gave up retrying) ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Protocol violations ---
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    // --- History errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Session persistence ---
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether a retry may succeed: throttling, overload, 5xx, timeouts
    /// and connection failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Overloaded(_)
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => {
                *status_code == 429 || (500..=599).contains(status_code)
            }
            Self::AuthenticationFailed(_) | Self::NotConfigured(_) | Self::InvalidResponse(_) => {
                false
            }
        }
    }
}

/// Violations of the tool-calling protocol. Always fatal for the task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("Only one tool call per turn is supported, model issued {count}")]
    MultipleToolCalls { count: usize },

    #[error("Tool {0} is duplicated")]
    DuplicateToolName(String),

    #[error("Tool with name {0} not found")]
    UnknownTool(String),
}

/// Failures while recording or decoding turns.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Content block '{block}' is not allowed in a {role} turn")]
    MalformedBlock { role: String, block: String },

    #[error("Failed to decode turn: {0}")]
    Decode(String),

    #[error("Failed to read attachment {path}: {reason}")]
    Attachment { path: String, reason: String },

    #[error("History needs {tokens} tokens after compression, budget is {budget}")]
    OverBudget { tokens: usize, budget: usize },
}

/// Tool execution failures. Recovered by the loop as tool-result text.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}
