//! Wire format of the reply stream.
//!
//! Every event is one record: the `data: ` marker, a JSON object tagged by
//! `type`, and a blank line. This is a subset of server-sent events, so
//! browsers can read it with an `EventSource`-style parser.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::AgentError;
use crate::models::content::Content;
use crate::models::message::{ToolRequest, ToolResponse};

pub const MARKER: &str = "data:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

impl From<&AgentError> for ErrorPayload {
    fn from(error: &AgentError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Set when the model's request could not be understood
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl From<&ToolRequest> for ToolCallPayload {
    fn from(request: &ToolRequest) -> Self {
        match &request.tool_call {
            Ok(call) => Self {
                id: request.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                error: None,
            },
            Err(e) => Self {
                id: request.id.clone(),
                name: String::new(),
                arguments: Value::Null,
                error: Some(e.into()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    pub is_error: bool,
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

impl ToolResultPayload {
    pub fn new(response: &ToolResponse, tool_name: impl Into<String>) -> Self {
        let (content, error) = match &response.tool_result {
            Ok(content) => (content.clone(), None),
            Err(e) => (Vec::new(), Some(ErrorPayload::from(e))),
        };
        Self {
            tool_call_id: response.id.clone(),
            tool_name: tool_name.into(),
            is_error: error.is_some(),
            content,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content {
        content: String,
    },
    ToolCall {
        #[serde(rename = "toolCall")]
        tool_call: ToolCallPayload,
    },
    ToolResult {
        #[serde(rename = "toolResult")]
        tool_result: ToolResultPayload,
    },
    Done {
        #[serde(rename = "toolCalls", default)]
        tool_calls: Vec<ToolCallPayload>,
        #[serde(rename = "toolResults", default)]
        tool_results: Vec<ToolResultPayload>,
    },
    Error {
        kind: String,
        error: String,
    },
}

impl From<&AgentError> for StreamEvent {
    fn from(error: &AgentError) -> Self {
        StreamEvent::Error {
            kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }
}

/// One message of the history a client sends with its question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Body of a chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
}

/// Body of the readiness check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub systems: BTreeMap<String, bool>,
}

/// Failure to read one record. The stream carries on past it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamDecodeError {
    #[error("Record does not start with 'data:': {0}")]
    MissingMarker(String),

    #[error("Record payload is not a valid event: {0}")]
    InvalidPayload(String),
}

/// Encode one event as a complete record
pub fn encode(event: &StreamEvent) -> Result<String, serde_json::Error> {
    Ok(format!("{} {}\n\n", MARKER, serde_json::to_string(event)?))
}

/// Decode one non-blank line of the stream
pub fn decode_line(line: &str) -> Result<StreamEvent, StreamDecodeError> {
    let payload = line
        .strip_prefix(MARKER)
        .ok_or_else(|| StreamDecodeError::MissingMarker(line.to_string()))?;
    serde_json::from_str(payload.trim_start())
        .map_err(|e| StreamDecodeError::InvalidPayload(format!("{}: {}", e, payload.trim())))
}
