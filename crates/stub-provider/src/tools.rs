use serde::Deserialize;
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// What to do after a request
#[derive(Debug, PartialEq)]
pub enum Reply {
    Respond(Value),
    /// Notifications get no answer
    Silent,
    /// Exit without answering, as if the process had crashed
    Exit,
}

fn tool(name: &str, description: &str, properties: Value) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {"type": "object", "properties": properties}
    })
}

/// Tools are listed two per page
fn tool_pages() -> Vec<Vec<Value>> {
    vec![
        vec![
            tool(
                "get_issues",
                "List issues of a repository",
                json!({"repo": {"type": "string"}, "state": {"type": "string"}}),
            ),
            tool(
                "get_commits",
                "List recent commits of a repository",
                json!({"repo": {"type": "string"}}),
            ),
        ],
        vec![
            tool("fail", "Always reports an error", json!({})),
            tool("exit", "Stops the provider", json!({})),
        ],
    ]
}

fn text_result(text: impl Into<String>, is_error: bool) -> Value {
    json!({
        "content": [{"type": "text", "text": text.into()}],
        "isError": is_error
    })
}

fn issues(params: &Value) -> Value {
    let repo = params
        .pointer("/arguments/repo")
        .and_then(Value::as_str)
        .unwrap_or("acme/widgets");
    let state = params
        .pointer("/arguments/state")
        .and_then(Value::as_str)
        .unwrap_or("open");
    let issues: Vec<Value> = ["Crash on start", "Typo in README", "Slow build"]
        .iter()
        .enumerate()
        .map(|(i, title)| {
            json!({
                "number": i + 1,
                "title": title,
                "state": state,
                "url": format!("https://github.com/{}/issues/{}", repo, i + 1)
            })
        })
        .collect();
    text_result(Value::Array(issues).to_string(), false)
}

fn commits() -> Value {
    let commits = json!([
        {"sha": "4f2a9c1", "message": "Fix build on nightly", "author": "dana"},
        {"sha": "81be03d", "message": "Add issue templates", "author": "sam"}
    ]);
    text_result(commits.to_string(), false)
}

fn call_tool(params: &Value) -> Result<Reply, (i64, String)> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or((INVALID_PARAMS, "missing tool name".to_string()))?;
    let result = match name {
        "get_issues" => issues(params),
        "get_commits" => commits(),
        "fail" => text_result("rate limit exceeded", true),
        "exit" => return Ok(Reply::Exit),
        other => return Err((INVALID_PARAMS, format!("unknown tool: {}", other))),
    };
    Ok(Reply::Respond(result))
}

fn list_tools(params: &Value) -> Value {
    let pages = tool_pages();
    let page = params
        .get("cursor")
        .and_then(Value::as_str)
        .and_then(|cursor| cursor.parse::<usize>().ok())
        .unwrap_or(0);
    let tools = pages.get(page).cloned().unwrap_or_default();
    if page + 1 < pages.len() {
        json!({"tools": tools, "nextCursor": (page + 1).to_string()})
    } else {
        json!({"tools": tools})
    }
}

fn initialize(instructions: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {"tools": {}},
        "serverInfo": {"name": "stub-github", "version": env!("CARGO_PKG_VERSION")},
        "instructions": instructions
    })
}

/// Answer one request. `instructions` is echoed back from `initialize`.
pub fn handle(request: &Request, instructions: &str) -> Reply {
    let Some(id) = request.id.clone() else {
        tracing::debug!(method = %request.method, "notification");
        return Reply::Silent;
    };

    let outcome = match request.method.as_str() {
        "initialize" => Ok(Reply::Respond(initialize(instructions))),
        "tools/list" => Ok(Reply::Respond(list_tools(&request.params))),
        "tools/call" => call_tool(&request.params),
        "ping" => Ok(Reply::Respond(json!({}))),
        other => Err((METHOD_NOT_FOUND, format!("method not found: {}", other))),
    };

    match outcome {
        Ok(Reply::Respond(result)) => {
            Reply::Respond(json!({"jsonrpc": "2.0", "id": id, "result": result}))
        }
        Ok(reply) => reply,
        Err((code, message)) => Reply::Respond(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: Option<u64>, method: &str, params: Value) -> Request {
        Request {
            id: id.map(Value::from),
            method: method.to_string(),
            params,
        }
    }

    fn respond(reply: Reply) -> Value {
        match reply {
            Reply::Respond(value) => value,
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[test]
    fn test_initialize_echoes_instructions() {
        let response = respond(handle(&request(Some(1), "initialize", json!({})), "be nice"));
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(response["result"]["instructions"], "be nice");
    }

    #[test]
    fn test_tools_are_paginated() {
        let first = respond(handle(&request(Some(2), "tools/list", Value::Null), ""));
        assert_eq!(first["result"]["tools"].as_array().unwrap().len(), 2);
        assert_eq!(first["result"]["nextCursor"], "1");

        let second = respond(handle(
            &request(Some(3), "tools/list", json!({"cursor": "1"})),
            "",
        ));
        assert_eq!(second["result"]["tools"][1]["name"], "exit");
        assert!(second["result"].get("nextCursor").is_none());
    }

    #[test]
    fn test_call_tool() {
        let response = respond(handle(
            &request(
                Some(4),
                "tools/call",
                json!({"name": "get_issues", "arguments": {"repo": "acme/widgets"}}),
            ),
            "",
        ));
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let issues: Value = serde_json::from_str(text).unwrap();
        assert_eq!(issues.as_array().unwrap().len(), 3);
        assert_eq!(issues[2]["url"], "https://github.com/acme/widgets/issues/3");

        let failed = respond(handle(
            &request(Some(5), "tools/call", json!({"name": "fail"})),
            "",
        ));
        assert_eq!(failed["result"]["isError"], true);

        let unknown = respond(handle(
            &request(Some(6), "tools/call", json!({"name": "delete_repo"})),
            "",
        ));
        assert_eq!(unknown["error"]["code"], INVALID_PARAMS);
    }

    #[test]
    fn test_notifications_and_unknown_methods() {
        assert_eq!(
            handle(&request(None, "notifications/initialized", Value::Null), ""),
            Reply::Silent
        );
        assert_eq!(
            handle(&request(Some(7), "tools/call", json!({"name": "exit"})), ""),
            Reply::Exit
        );
        let response = respond(handle(&request(Some(8), "resources/list", Value::Null), ""));
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }
}
