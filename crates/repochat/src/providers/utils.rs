use std::collections::{BTreeMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};
use crate::models::content::{Content, ImageContent};
use crate::models::message::{Message, MessageContent, ToolRequest};
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Convert internal Message format to OpenAI's API message specification.
///
/// Tool responses become `role: "tool"` entries following the assistant
/// message that requested them. Images in a tool response are sent as a
/// follow-up user message, since tool messages only carry text.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(content) => text.push_str(&content.text),
                MessageContent::Image(image) => {
                    converted["content"] = json!([convert_image(image)]);
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => tool_calls.push(json!({
                        "id": request.id,
                        "type": "function",
                        "function": {
                            "name": sanitize_function_name(&tool_call.name),
                            "arguments": tool_call.arguments.to_string(),
                        }
                    })),
                    Err(e) => output.push(json!({
                        "role": "tool",
                        "content": format!("Error: {}", e),
                        "tool_call_id": request.id
                    })),
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(contents) => {
                        let mut tool_content = Vec::new();
                        let mut image_messages = Vec::new();
                        for content in contents {
                            match content {
                                Content::Image(image) => {
                                    tool_content.push(Content::text(
                                        "This tool result included an image that is uploaded in the next message.",
                                    ));
                                    image_messages.push(json!({
                                        "role": "user",
                                        "content": [convert_image(image)]
                                    }));
                                }
                                other => tool_content.push(other.clone()),
                            }
                        }
                        output.push(json!({
                            "role": "tool",
                            "content": tool_content,
                            "tool_call_id": response.id
                        }));
                        output.extend(image_messages);
                    }
                    Err(e) => output.push(json!({
                        "role": "tool",
                        "content": format!("The tool call returned the following error:\n{}", e),
                        "tool_call_id": response.id
                    })),
                },
            }
        }

        if !text.is_empty() {
            converted["content"] = json!(text);
        }
        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }
        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

pub fn convert_image(image: &ImageContent) -> Value {
    json!({
        "type": "image_url",
        "image_url": {
            "url": format!("data:{};base64,{}", image.mime_type, image.data)
        }
    })
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> AgentResult<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(AgentError::Internal(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Build a tool request from the name and raw argument text the model produced.
/// A bad name or unparseable arguments give a request that carries the error.
pub fn tool_request_from_parts(id: String, name: &str, arguments: &str) -> ToolRequest {
    let tool_call = if !is_valid_function_name(name) {
        Err(AgentError::UnknownTool(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            name
        )))
    } else if arguments.trim().is_empty() {
        Ok(ToolCall::new(name, json!({})))
    } else {
        serde_json::from_str::<Value>(arguments)
            .map(|params| ToolCall::new(name, params))
            .map_err(|e| {
                AgentError::InvalidParameters(format!(
                    "Could not interpret tool use parameters for id {}: {}",
                    id, e
                ))
            })
    };
    ToolRequest { id, tool_call }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Collects streamed tool-call fragments.
///
/// Fragments are keyed by their `index`. The id, name and argument pieces may
/// arrive in any order across chunks; a call is only complete once the stream ends.
#[derive(Debug, Default)]
pub struct ToolCallBuffer {
    calls: BTreeMap<u64, PartialCall>,
}

impl ToolCallBuffer {
    /// Take one entry of a chunk's `delta.tool_calls`
    pub fn absorb(&mut self, fragment: &Value) {
        let id = fragment
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty());

        let index = match fragment.get("index").and_then(Value::as_u64) {
            Some(index) => index,
            None => match id {
                Some(id) => self
                    .calls
                    .iter()
                    .find(|(_, call)| call.id.as_deref() == Some(id))
                    .map(|(index, _)| *index)
                    .unwrap_or_else(|| self.next_index()),
                None => {
                    tracing::debug!("skipping tool call fragment with neither id nor index");
                    return;
                }
            },
        };

        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            call.id = Some(id.to_string());
        }
        if let Some(name) = fragment
            .pointer("/function/name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
        {
            call.name = name.to_string();
        }
        if let Some(arguments) = fragment.pointer("/function/arguments").and_then(Value::as_str) {
            call.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed requests in index order. Calls that never got an id or a name are dropped.
    pub fn finish(self) -> Vec<ToolRequest> {
        self.calls
            .into_values()
            .filter_map(|call| match call.id {
                Some(id) if !call.name.is_empty() => {
                    Some(tool_request_from_parts(id, &call.name, &call.arguments))
                }
                id => {
                    tracing::warn!(id = ?id, name = %call.name, "dropping incomplete tool call");
                    None
                }
            })
            .collect()
    }

    fn next_index(&self) -> u64 {
        self.calls.keys().next_back().map_or(0, |last| last + 1)
    }
}

/// Pull a readable message out of an error body, naming context overflow explicitly
pub fn openai_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let error = value.get("error").unwrap_or(&value);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();
    match error.get("code").and_then(Value::as_str) {
        Some("context_length_exceeded") | Some("string_above_max_length") => {
            format!("Context length exceeded. Message: {}", message)
        }
        _ => message,
    }
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}
