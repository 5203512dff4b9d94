use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Malformed response from tool provider: {0}")]
    MalformedResponse(String),

    #[error("Tool call loop exceeded {0} rounds")]
    ToolLoopExceeded(usize),

    #[error("Model call failed: {0}")]
    ModelCallFailed(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Stable name used for this error on the event stream
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ProviderUnavailable(_) => "ProviderUnavailable",
            AgentError::UnknownTool(_) => "UnknownTool",
            AgentError::MalformedResponse(_) => "MalformedResponse",
            AgentError::ToolLoopExceeded(_) => "ToolLoopExceeded",
            AgentError::ModelCallFailed(_) => "ModelCallFailed",
            AgentError::InvalidParameters(_) => "InvalidParameters",
            AgentError::ExecutionError(_) => "ExecutionError",
            AgentError::Internal(_) => "Internal",
        }
    }

    /// Errors that end the whole conversation rather than a single tool invocation
    pub fn is_conversation_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::ToolLoopExceeded(_) | AgentError::ModelCallFailed(_) | AgentError::Internal(_)
        )
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Raised while merging provider tool sets into one namespace
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Tool '{tool}' is advertised by both '{first}' and '{second}'")]
    DuplicateTool {
        tool: String,
        first: String,
        second: String,
    },

    #[error("Tool provider '{0}' is configured more than once")]
    DuplicateSystem(String),
}
