use std::collections::HashMap;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::agent::AgentEvent;
use crate::errors::AgentResult;
use crate::protocol::{StreamEvent, ToolCallPayload, ToolResultPayload};

/// Maps agent events onto wire events one for one, and keeps what it needs
/// for the closing `done` summary.
#[derive(Debug, Default)]
pub struct EventEmitter {
    tool_calls: Vec<ToolCallPayload>,
    tool_results: Vec<ToolResultPayload>,
    names: HashMap<String, String>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&mut self, event: AgentEvent) -> StreamEvent {
        match event {
            AgentEvent::Text(content) => StreamEvent::Content { content },
            AgentEvent::ToolCall(request) => {
                let payload = ToolCallPayload::from(&request);
                self.names.insert(payload.id.clone(), payload.name.clone());
                self.tool_calls.push(payload.clone());
                StreamEvent::ToolCall { tool_call: payload }
            }
            AgentEvent::ToolResult(response) => {
                let name = self.names.get(&response.id).cloned().unwrap_or_default();
                let payload = ToolResultPayload::new(&response, name);
                self.tool_results.push(payload.clone());
                StreamEvent::ToolResult {
                    tool_result: payload,
                }
            }
        }
    }

    /// Summary sent when the reply finishes normally
    pub fn done(self) -> StreamEvent {
        StreamEvent::Done {
            tool_calls: self.tool_calls,
            tool_results: self.tool_results,
        }
    }
}

/// Turn an agent reply into the events sent to the client. The stream ends
/// with `done`, or with `error` at the first failure.
pub fn emit<S>(events: S) -> BoxStream<'static, StreamEvent>
where
    S: Stream<Item = AgentResult<AgentEvent>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut emitter = EventEmitter::new();
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    yield emitter.event(event);
                }
                Err(e) => {
                    tracing::warn!(kind = e.kind(), error = %e, "reply ended with an error");
                    yield StreamEvent::from(&e);
                    return;
                }
            }
        }
        yield emitter.done();
    })
}
