use crate::models::content::Content;
use crate::models::role::Role;
use crate::protocol::{StreamEvent, ToolCallPayload, ToolResultPayload};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub role: Role,
    pub text: String,
    /// Set on the entry that reports a failed reply
    pub failed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ReplyStatus {
    #[default]
    Idle,
    Streaming,
    Complete,
    Failed {
        kind: String,
        message: String,
    },
}

/// What a chat view shows, rebuilt purely from the event stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub entries: Vec<ChatEntry>,
    pub tool_calls: Vec<ToolCallPayload>,
    pub tool_results: Vec<ToolResultPayload>,
    pub status: ReplyStatus,
}

impl ChatState {
    /// Start a reply to `text`
    pub fn ask(mut self, text: impl Into<String>) -> Self {
        self.entries.push(ChatEntry {
            role: Role::User,
            text: text.into(),
            failed: false,
        });
        self.status = ReplyStatus::Streaming;
        self
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.role == Role::User)
            .map(|entry| entry.text.as_str())
    }

    /// Successful results of `tool_name`
    pub fn results_for<'a>(&'a self, tool_name: &'a str) -> impl Iterator<Item = &'a ToolResultPayload> {
        self.tool_results
            .iter()
            .filter(move |result| result.tool_name == tool_name && !result.is_error)
    }

    /// Every image any tool returned, as `(data, mime_type)`
    pub fn images(&self) -> Vec<(&str, &str)> {
        self.tool_results
            .iter()
            .flat_map(|result| result.content.iter())
            .filter_map(Content::as_image)
            .collect()
    }
}

fn upsert_call(calls: &mut Vec<ToolCallPayload>, call: &ToolCallPayload) {
    match calls.iter_mut().find(|existing| existing.id == call.id) {
        Some(existing) => *existing = call.clone(),
        None => calls.push(call.clone()),
    }
}

fn upsert_result(results: &mut Vec<ToolResultPayload>, result: &ToolResultPayload) {
    match results
        .iter_mut()
        .find(|existing| existing.tool_call_id == result.tool_call_id)
    {
        Some(existing) => *existing = result.clone(),
        None => results.push(result.clone()),
    }
}

/// Fold one event into the state.
///
/// Tool calls and results are keyed by id, so the `done` summary can be
/// applied on top of the individual events without duplicating them.
pub fn apply(mut state: ChatState, event: &StreamEvent) -> ChatState {
    match event {
        StreamEvent::Content { content } => match state.entries.last_mut() {
            Some(entry) if entry.role == Role::Assistant && !entry.failed => {
                entry.text.push_str(content)
            }
            _ => state.entries.push(ChatEntry {
                role: Role::Assistant,
                text: content.clone(),
                failed: false,
            }),
        },
        StreamEvent::ToolCall { tool_call } => upsert_call(&mut state.tool_calls, tool_call),
        StreamEvent::ToolResult { tool_result } => {
            upsert_result(&mut state.tool_results, tool_result)
        }
        StreamEvent::Done {
            tool_calls,
            tool_results,
        } => {
            for call in tool_calls {
                upsert_call(&mut state.tool_calls, call);
            }
            for result in tool_results {
                upsert_result(&mut state.tool_results, result);
            }
            state.status = ReplyStatus::Complete;
        }
        StreamEvent::Error { kind, error } => {
            state.entries.push(ChatEntry {
                role: Role::Assistant,
                text: error.clone(),
                failed: true,
            });
            state.status = ReplyStatus::Failed {
                kind: kind.clone(),
                message: error.clone(),
            };
        }
    }
    state
}
