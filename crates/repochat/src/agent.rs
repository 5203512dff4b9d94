use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::context::{shape_tool_result, truncate_history};
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, MessageContent, ToolRequest, ToolResponse};
use crate::models::tool::{InvocationState, ToolInvocation};
use crate::prompt_template::{load_bundled_prompt, load_prompt_file};
use crate::providers::base::{Provider, ProviderDelta};
use crate::registry::ToolRegistry;

/// Tool rounds allowed in one reply before the conversation is failed
pub const DEFAULT_MAX_TURNS: usize = 10;
/// Messages of history sent to the model on each call
pub const DEFAULT_MAX_MESSAGES: usize = 10;

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

/// What the agent produces while it works on a reply, in order
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Model text, as it streams in
    Text(String),
    /// A tool the model asked for, announced before it runs
    ToolCall(ToolRequest),
    /// The full, unshaped outcome of a tool call
    ToolResult(ToolResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    AwaitingModel,
    DispatchingTools,
    AwaitingToolResults,
    Done,
    Failed,
}

fn enter(state: &mut TurnState, next: TurnState) {
    tracing::debug!(from = ?*state, to = ?next, "turn state");
    *state = next;
}

enum Pending {
    Running(JoinHandle<AgentResult<Vec<Content>>>),
    Rejected(AgentError),
}

/// Agent integrates a language model with the tool providers it can call
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    max_turns: usize,
    max_messages: usize,
    /// Replaces the bundled system prompt when set
    prompt_file: Option<PathBuf>,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            registry,
            max_turns: DEFAULT_MAX_TURNS,
            max_messages: DEFAULT_MAX_MESSAGES,
            prompt_file: None,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_prompt_file(mut self, prompt_file: impl Into<PathBuf>) -> Self {
        self.prompt_file = Some(prompt_file.into());
        self
    }

    fn system_prompt(&self) -> AgentResult<String> {
        let systems: Vec<SystemInfo> = self
            .registry
            .systems()
            .iter()
            .map(|system| SystemInfo {
                name: system.name().to_string(),
                description: system.description().to_string(),
                instructions: system.instructions().to_string(),
            })
            .collect();
        let mut context = HashMap::new();
        context.insert("systems", systems);
        let rendered = match &self.prompt_file {
            Some(path) => load_prompt_file(path, &context),
            None => load_bundled_prompt("system.md", &context),
        };
        rendered.map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Run the conversation until the model answers without asking for tools.
    ///
    /// Tool calls run on their own tasks, so dropping the stream does not cut
    /// a provider off mid-call; those results are simply discarded. A fatal
    /// error is yielded as the last item.
    pub fn reply(&self, messages: &[Message]) -> BoxStream<'static, AgentResult<AgentEvent>> {
        let provider = self.provider.clone();
        let registry = self.registry.clone();
        let max_turns = self.max_turns;
        let max_messages = self.max_messages;
        let system_prompt = self.system_prompt();
        let mut messages = messages.to_vec();

        Box::pin(async_stream::try_stream! {
            let system_prompt = system_prompt?;
            let tools = registry.tools().to_vec();
            let mut state = TurnState::AwaitingModel;
            let mut batches = 0;

            loop {
                let window = truncate_history(&messages, max_messages);
                let mut deltas = provider
                    .stream(&system_prompt, &window, &tools)
                    .await
                    .map_err(|e| fail(&mut state, e))?;

                let mut text = String::new();
                let mut requests: Vec<ToolRequest> = Vec::new();
                while let Some(delta) = deltas.next().await {
                    match delta.map_err(|e| fail(&mut state, e))? {
                        ProviderDelta::Text(token) => {
                            text.push_str(&token);
                            yield AgentEvent::Text(token);
                        }
                        ProviderDelta::ToolRequest(request) => requests.push(request),
                    }
                }

                let mut response = Message::assistant();
                if !text.is_empty() {
                    response = response.with_text(text);
                }

                if requests.is_empty() {
                    messages.push(response);
                    enter(&mut state, TurnState::Done);
                    break;
                }

                if batches == max_turns {
                    Err::<(), _>(fail(&mut state, AgentError::ToolLoopExceeded(max_turns)))?;
                }

                enter(&mut state, TurnState::DispatchingTools);
                let mut invocations = Vec::with_capacity(requests.len());
                let mut pending = Vec::with_capacity(requests.len());
                for request in &requests {
                    yield AgentEvent::ToolCall(request.clone());

                    match &request.tool_call {
                        Ok(tool_call) => {
                            let mut invocation = ToolInvocation::new(
                                &request.id,
                                &tool_call.name,
                                tool_call.arguments.clone(),
                            );
                            invocation.advance(InvocationState::Dispatched);
                            invocations.push(invocation);

                            let registry = registry.clone();
                            let tool_call = tool_call.clone();
                            pending.push(Pending::Running(tokio::spawn(async move {
                                registry.invoke(tool_call).await
                            })));
                        }
                        Err(e) => {
                            tracing::warn!(id = %request.id, error = %e, "not dispatching malformed tool request");
                            invocations.push(ToolInvocation::new(&request.id, "", serde_json::Value::Null));
                            pending.push(Pending::Rejected(e.clone()));
                        }
                    }
                }

                enter(&mut state, TurnState::AwaitingToolResults);
                let mut results = Vec::with_capacity(pending.len());
                for task in pending {
                    let result = match task {
                        Pending::Running(handle) => match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(AgentError::ExecutionError(format!("tool task failed: {}", e))),
                        },
                        Pending::Rejected(e) => Err(e),
                    };
                    results.push(result);
                }

                let mut tool_responses = Message::user();
                for ((request, invocation), result) in requests.iter().zip(invocations.iter_mut()).zip(results) {
                    let outcome = if result.is_ok() {
                        InvocationState::Completed
                    } else {
                        InvocationState::Failed
                    };
                    invocation.advance(outcome);
                    tracing::debug!(id = %invocation.id, tool = %invocation.name, state = ?invocation.state, "tool invocation finished");

                    yield AgentEvent::ToolResult(ToolResponse {
                        id: request.id.clone(),
                        tool_result: result.clone(),
                    });
                    let shaped = result.map(|content| shape_tool_result(&content));
                    tool_responses = tool_responses.with_tool_response(request.id.clone(), shaped);
                }

                for request in requests {
                    response = response.with_content(MessageContent::ToolRequest(request));
                }
                messages.push(response);
                messages.push(tool_responses);
                batches += 1;
                enter(&mut state, TurnState::AwaitingModel);
            }
        })
    }
}

fn fail(state: &mut TurnState, error: AgentError) -> AgentError {
    enter(state, TurnState::Failed);
    tracing::warn!(error = %error, "reply failed");
    error
}
