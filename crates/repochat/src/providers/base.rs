use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::AgentResult;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::Tool;

/// One increment of a model reply
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderDelta {
    /// Text as soon as the model produces it
    Text(String),
    /// A complete tool request. These arrive after the text of the reply.
    ToolRequest(ToolRequest),
}

pub type DeltaStream = BoxStream<'static, AgentResult<ProviderDelta>>;

/// Base trait for language model providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start generating the next assistant message.
    ///
    /// Failing to reach the model is an error of the call itself; a failure
    /// part way through the reply is yielded as an error item on the stream.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> AgentResult<DeltaStream>;
}
