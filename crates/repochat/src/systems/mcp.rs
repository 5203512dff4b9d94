use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::system::System;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::transport::StdioTransport;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// How to launch one tool provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Tools the provider is expected to offer. They stay advertised when the
    /// provider cannot be started, and calls to them fail as unavailable.
    #[serde(default)]
    pub tools: Vec<Tool>,
}

impl SystemConfig {
    pub fn new<S: Into<String>>(command: S, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<Tool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    content: Vec<Value>,
    #[serde(default)]
    is_error: bool,
}

/// A tool provider reached over MCP on a subprocess' stdio
pub struct McpSystem {
    name: String,
    description: String,
    instructions: String,
    tools: Vec<Tool>,
    transport: StdioTransport,
}

impl McpSystem {
    /// Launch the provider and run the handshake
    pub async fn connect(name: &str, config: &SystemConfig) -> AgentResult<Self> {
        let transport = StdioTransport::spawn(&config.command, &config.args, &config.env)?;
        Self::handshake(name, transport).await
    }

    /// Initialize over an open transport and list its tools. The transport is
    /// closed if any step fails.
    pub async fn handshake(name: &str, transport: StdioTransport) -> AgentResult<Self> {
        match Self::discover(&transport).await {
            Ok((description, instructions, tools)) => {
                tracing::info!(system = name, tools = tools.len(), "connected to tool provider");
                Ok(Self {
                    name: name.to_string(),
                    description,
                    instructions,
                    tools,
                    transport,
                })
            }
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn discover(transport: &StdioTransport) -> AgentResult<(String, String, Vec<Tool>)> {
        let init = transport
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "repochat",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;
        transport.notify("notifications/initialized", None).await?;

        let description = init
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let instructions = init
            .get("instructions")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|cursor| json!({ "cursor": cursor }));
            let result = transport.request("tools/list", params).await?;
            let page: ToolsPage = serde_json::from_value(result)
                .map_err(|e| AgentError::MalformedResponse(format!("tools/list: {}", e)))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok((description, instructions, tools))
    }
}

/// Read the content items of a `tools/call` result. Item types we do not
/// model are kept as their JSON text.
fn parse_call_result(result: Value) -> AgentResult<Vec<Content>> {
    let result: CallToolResult = serde_json::from_value(result)
        .map_err(|e| AgentError::MalformedResponse(format!("tools/call: {}", e)))?;

    let content: Vec<Content> = result
        .content
        .into_iter()
        .map(|item| {
            serde_json::from_value::<Content>(item.clone())
                .unwrap_or_else(|_| Content::text(item.to_string()))
        })
        .collect();

    if result.is_error {
        let message = content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        return Err(AgentError::ExecutionError(message));
    }
    Ok(content)
}

#[async_trait]
impl System for McpSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn instructions(&self) -> &str {
        &self.instructions
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let result = self
            .transport
            .request(
                "tools/call",
                Some(json!({
                    "name": tool_call.name,
                    "arguments": tool_call.arguments,
                })),
            )
            .await?;
        parse_call_result(result)
    }

    async fn shutdown(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Answers each request with whatever `respond` returns for its method and params
    fn fake_provider<F>(respond: F) -> StdioTransport
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + 'static,
    {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(ours);
        tokio::spawn(async move {
            let (their_read, mut their_write) = tokio::io::split(theirs);
            let mut lines = BufReader::new(their_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let Some(id) = request.get("id").cloned() else {
                    continue;
                };
                let method = request["method"].as_str().unwrap_or_default();
                let reply = match respond(method, &request["params"]) {
                    Some(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    None => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "method not found"}
                    }),
                };
                let mut bytes = serde_json::to_vec(&reply).unwrap();
                bytes.push(b'\n');
                if their_write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });
        StdioTransport::from_io(read, write)
    }

    fn github_like(method: &str, params: &Value) -> Option<Value> {
        match method {
            "initialize" => Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {"name": "github-server", "version": "1.0"},
                "instructions": "Use these tools for repository data"
            })),
            "tools/list" if params.get("cursor").is_none() => Some(json!({
                "tools": [{"name": "get_issues", "description": "List issues", "inputSchema": {"type": "object"}}],
                "nextCursor": "page2"
            })),
            "tools/list" => Some(json!({
                "tools": [{"name": "get_commits", "inputSchema": {"type": "object"}}]
            })),
            "tools/call" if params["name"] == "get_issues" => Some(json!({
                "content": [
                    {"type": "text", "text": "[{\"number\": 1}]"},
                    {"type": "resource", "resource": {"uri": "repo://a/b"}}
                ]
            })),
            "tools/call" => Some(json!({
                "content": [{"type": "text", "text": "rate limited"}],
                "isError": true
            })),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_handshake_collects_all_pages() {
        let system = McpSystem::handshake("github", fake_provider(github_like))
            .await
            .unwrap();
        assert_eq!(system.name(), "github");
        assert_eq!(system.description(), "github-server");
        assert_eq!(system.instructions(), "Use these tools for repository data");
        let names: Vec<_> = system.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["get_issues", "get_commits"]);
        assert!(system.is_alive().await);
    }

    #[tokio::test]
    async fn test_call_results() {
        let system = McpSystem::handshake("github", fake_provider(github_like))
            .await
            .unwrap();

        let content = system
            .call(ToolCall::new("get_issues", json!({"repo": "a/b"})))
            .await
            .unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0].as_json(), Some(json!([{"number": 1}])));
        assert!(content[1].as_text().unwrap().contains("repo://a/b"));

        let err = system
            .call(ToolCall::new("get_commits", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::ExecutionError("rate limited".to_string()));
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_transport() {
        let err = McpSystem::handshake("broken", fake_provider(|_, _| None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::ExecutionError(_)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_calls() {
        let system = McpSystem::handshake("github", fake_provider(github_like))
            .await
            .unwrap();
        system.shutdown().await;
        assert!(!system.is_alive().await);
        let err = system
            .call(ToolCall::new("get_issues", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProviderUnavailable(_)));
    }

    #[test]
    fn test_missing_content_is_malformed() {
        let err = parse_call_result(json!({"isError": false})).unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse(_)));
    }
}
