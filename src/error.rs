//! Error types for the research engine.
//!
//! Provider-level failures (`LlmError`, `SearchProviderError`, `ToolError`)
//! are kept apart from the orchestration-level `ResearchError` so that each
//! layer can decide whether to recover locally or propagate.

use thiserror::Error;

/// Errors from language-model calls.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} API key not configured (set {env_var})")]
    MissingApiKey { provider: String, env_var: String },

    #[error("request to language model failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("language model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not parse model response: {0}")]
    ResponseParse(String),

    #[error("model call failed: {0}")]
    Other(String),
}

/// Errors from tool dispatch inside a generation loop.
///
/// These never abort the loop; they are rendered as tool results so the
/// model can react to them.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("tool '{name}' failed: {message}")]
    Execution { name: String, message: String },
}

/// Errors raised by a search backend.
#[derive(Debug, Error)]
pub enum SearchProviderError {
    #[error("{provider} not configured")]
    NotConfigured { provider: String },

    #[error("search provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not decode search response: {0}")]
    Decode(String),
}

impl SearchProviderError {
    /// HTTP status code, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Top-level error for research orchestration.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no tools available: configure search or connectors")]
    NoToolsAvailable,

    #[error("system instructions need {system_tokens} tokens but the context budget is {budget}")]
    ContextBudgetExceeded { system_tokens: usize, budget: usize },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("research run cancelled")]
    Cancelled,

    #[error("research queue is closed")]
    QueueClosed,
}

impl ResearchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
