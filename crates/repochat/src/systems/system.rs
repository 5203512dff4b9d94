use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// A tool provider the agent can call into
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions
    fn instructions(&self) -> &str;

    /// Tools advertised at connection time. Fixed for the life of the system.
    fn tools(&self) -> &[Tool];

    /// Whether calls can still be delivered
    async fn is_alive(&self) -> bool;

    /// Call a tool with the given parameters
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;

    /// Release the underlying connection
    async fn shutdown(&self) {}
}
