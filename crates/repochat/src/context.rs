//! Keep what the model sees within bounds.
//!
//! Tool results go to the event stream untouched, but the copy folded into
//! the model's history is shaped here: big arrays, long strings and image
//! payloads are cut down. The history itself is windowed before every model call.

use serde_json::Value;

use crate::models::content::Content;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;

pub const MAX_ARRAY_ITEMS: usize = 20;
pub const MAX_STRING_CHARS: usize = 500;
pub const MAX_RESULT_CHARS: usize = 50_000;

const MAX_INLINE_IMAGE_CHARS: usize = 1_000;
const BASE64_IMAGE_PREFIXES: [&str; 4] = ["iVBORw0KGgo", "/9j/", "R0lGOD", "data:image"];

/// Cut a tool result down to what is worth sending back to the model
pub fn shape_tool_result(content: &[Content]) -> Vec<Content> {
    content
        .iter()
        .map(|item| match item {
            Content::Image(image) => Content::text(format!(
                "[{} image omitted - {} chars]",
                image.mime_type,
                image.data.len()
            )),
            Content::Text(text) => Content::text(shape_text(&text.text)),
        })
        .collect()
}

fn shape_text(text: &str) -> String {
    let shaped = match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => shape_value(None, value).to_string(),
        _ if looks_like_image(text) => image_placeholder(text),
        _ => text.to_string(),
    };
    match truncate_chars(&shaped, MAX_RESULT_CHARS) {
        Some(head) => format!("{}... [truncated]", head),
        None => shaped,
    }
}

fn shape_value(key: Option<&str>, value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|item| shape_value(None, item))
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, value)| {
                    let shaped = shape_value(Some(&key), value);
                    (key, shaped)
                })
                .collect(),
        ),
        Value::String(text) => {
            let char_count = text.chars().count();
            if matches!(key, Some("screenshot" | "image")) && char_count > MAX_INLINE_IMAGE_CHARS {
                Value::String(format!("[{} data truncated - {} chars]", key.unwrap_or("image"), char_count))
            } else if char_count <= MAX_STRING_CHARS {
                Value::String(text)
            } else if looks_like_image(&text) {
                Value::String(image_placeholder(&text))
            } else {
                let head = truncate_chars(&text, MAX_STRING_CHARS).unwrap_or(&text);
                Value::String(format!("{}... [truncated]", head))
            }
        }
        other => other,
    }
}

fn looks_like_image(text: &str) -> bool {
    text.len() > MAX_STRING_CHARS
        && BASE64_IMAGE_PREFIXES
            .iter()
            .any(|prefix| text.starts_with(prefix))
}

fn image_placeholder(text: &str) -> String {
    format!("[Base64 image data truncated - {} chars]", text.len())
}

/// The first `max` characters of `text`, or None when it already fits
fn truncate_chars(text: &str, max: usize) -> Option<&str> {
    text.char_indices().nth(max).map(|(cut, _)| &text[..cut])
}

fn starts_tool_group(message: &Message) -> bool {
    message.role == Role::Assistant && message.has_tool_requests()
}

fn is_tool_response(message: &Message) -> bool {
    !message.content.is_empty()
        && message
            .content
            .iter()
            .all(|content| matches!(content, MessageContent::ToolResponse(_)))
}

/// Split history into groups that must be kept or dropped together: an
/// assistant message that requested tools plus the responses that follow it.
fn group_messages(messages: &[Message]) -> Vec<&[Message]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (index, message) in messages.iter().enumerate().skip(1) {
        let continues_group = is_tool_response(message) && {
            let previous = &messages[start..index];
            starts_tool_group(&previous[0])
        };
        if !continues_group {
            groups.push(&messages[start..index]);
            start = index;
        }
    }
    if start < messages.len() {
        groups.push(&messages[start..]);
    }
    groups
}

/// Window the history to at most `max_messages`, keeping the first group and
/// as many of the most recent groups as fit. Tool requests are never separated
/// from their responses. The latest group is always kept, even when that
/// overruns a limit too small to hold it.
pub fn truncate_history(messages: &[Message], max_messages: usize) -> Vec<Message> {
    if messages.len() <= max_messages {
        return messages.to_vec();
    }

    let groups = group_messages(messages);
    let Some((last, earlier)) = groups.split_last() else {
        return Vec::new();
    };
    let Some((first, middle)) = earlier.split_first() else {
        return last.to_vec();
    };

    let mut budget = max_messages.saturating_sub(last.len());
    let keep_first = first.len() <= budget;
    if keep_first {
        budget -= first.len();
    }

    let mut recent = vec![*last];
    for group in middle.iter().rev() {
        if group.len() > budget {
            break;
        }
        budget -= group.len();
        recent.push(*group);
    }

    let mut window = if keep_first { first.to_vec() } else { Vec::new() };
    for group in recent.into_iter().rev() {
        window.extend_from_slice(group);
    }
    tracing::debug!(from = messages.len(), to = window.len(), "windowed history");
    window
}
