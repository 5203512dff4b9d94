use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::base::{DeltaStream, Provider, ProviderDelta};
use super::configs::{AzureProviderConfig, OpenAiProviderConfig};
use super::utils::{messages_to_openai_spec, openai_error_message, tools_to_openai_spec, ToolCallBuffer};
use crate::errors::{AgentError, AgentResult};
use crate::framing::LineBuffer;
use crate::models::message::Message;
use crate::models::tool::Tool;

enum Endpoint {
    OpenAi {
        url: String,
        api_key: String,
        model: String,
    },
    Azure {
        url: String,
        api_key: String,
        deployment: String,
        api_version: String,
    },
}

/// Chat completions over OpenAI or an Azure OpenAI deployment, always streamed
pub struct OpenAiProvider {
    client: Client,
    endpoint: Endpoint,
    temperature: Option<f32>,
    max_tokens: Option<i32>,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let url = format!("{}/v1/chat/completions", config.host.trim_end_matches('/'));
        Ok(Self {
            client: Self::client()?,
            endpoint: Endpoint::OpenAi {
                url,
                api_key: config.api_key,
                model: config.model,
            },
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn azure(config: AzureProviderConfig) -> Result<Self> {
        let base = config.endpoint.trim_end_matches('/');
        let base = base.strip_suffix("/openai").unwrap_or(base);
        let url = format!(
            "{}/openai/deployments/{}/chat/completions",
            base, config.deployment
        );
        Ok(Self {
            client: Self::client()?,
            endpoint: Endpoint::Azure {
                url,
                api_key: config.api_key,
                deployment: config.deployment,
                api_version: config.api_version,
            },
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn client() -> Result<Client> {
        Ok(Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?)
    }

    fn model(&self) -> &str {
        match &self.endpoint {
            Endpoint::OpenAi { model, .. } => model,
            Endpoint::Azure { deployment, .. } => deployment,
        }
    }

    fn request(&self) -> RequestBuilder {
        match &self.endpoint {
            Endpoint::OpenAi { url, api_key, .. } => self.client.post(url).bearer_auth(api_key),
            Endpoint::Azure {
                url,
                api_key,
                api_version,
                ..
            } => self
                .client
                .post(url)
                .header("api-key", api_key)
                .query(&[("api-version", api_version)]),
        }
    }

    fn payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> AgentResult<Value> {
        let mut messages_array = vec![json!({
            "role": "system",
            "content": system
        })];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.model()));
        payload.insert("messages".to_string(), json!(messages_array));
        payload.insert("stream".to_string(), json!(true));

        let tools_spec = tools_to_openai_spec(tools)?;
        if !tools_spec.is_empty() {
            payload.insert("tools".to_string(), json!(tools_spec));
            payload.insert("tool_choice".to_string(), json!("auto"));
        }
        if let Some(temperature) = self.temperature {
            payload.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(tokens) = self.max_tokens {
            payload.insert("max_tokens".to_string(), json!(tokens));
        }
        Ok(Value::Object(payload))
    }
}

/// Incremental reader for a chat-completions event stream.
///
/// Text is handed out as it arrives; tool calls are only complete once the
/// stream ends, so they come out of [`SseParser::finish`].
#[derive(Debug, Default)]
pub struct SseParser {
    lines: LineBuffer,
    calls: ToolCallBuffer,
    done: bool,
}

impl SseParser {
    pub fn push(&mut self, bytes: &[u8]) -> AgentResult<Vec<ProviderDelta>> {
        self.lines.extend(bytes);
        let mut deltas = Vec::new();
        while let Some(line) = self.lines.next_line() {
            self.read_line(&line, &mut deltas)?;
        }
        Ok(deltas)
    }

    pub fn finish(mut self) -> AgentResult<Vec<ProviderDelta>> {
        let mut deltas = Vec::new();
        if let Some(line) = self.lines.take_remainder() {
            self.read_line(&line, &mut deltas)?;
        }
        deltas.extend(
            self.calls
                .finish()
                .into_iter()
                .map(ProviderDelta::ToolRequest),
        );
        Ok(deltas)
    }

    fn read_line(&mut self, line: &[u8], deltas: &mut Vec<ProviderDelta>) -> AgentResult<()> {
        if self.done {
            return Ok(());
        }
        let line = std::str::from_utf8(line)
            .map_err(|e| AgentError::ModelCallFailed(format!("stream is not UTF-8: {}", e)))?;
        // comments, event names and blank separators carry nothing we need
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: Value = serde_json::from_str(data)
            .map_err(|e| AgentError::ModelCallFailed(format!("unreadable stream chunk: {}", e)))?;
        if let Some(error) = chunk.get("error") {
            return Err(AgentError::ModelCallFailed(openai_error_message(
                &json!({ "error": error }).to_string(),
            )));
        }

        // Azure opens with a chunk that has no choices
        let Some(delta) = chunk.pointer("/choices/0/delta") else {
            return Ok(());
        };
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                deltas.push(ProviderDelta::Text(text.to_string()));
            }
        }
        if let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) {
            for fragment in fragments {
                self.calls.absorb(fragment);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> AgentResult<DeltaStream> {
        let payload = self.payload(system, messages, tools)?;
        tracing::debug!(model = self.model(), messages = messages.len(), "requesting completion");

        let response = self
            .request()
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::ModelCallFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::ModelCallFailed(format!(
                "{}: {}",
                status,
                openai_error_message(&body)
            )));
        }

        let mut body = response.bytes_stream();
        Ok(Box::pin(async_stream::stream! {
            let mut parser = SseParser::default();
            while let Some(chunk) = body.next().await {
                let parsed = chunk
                    .map_err(|e| AgentError::ModelCallFailed(e.to_string()))
                    .and_then(|bytes| parser.push(&bytes));
                match parsed {
                    Ok(deltas) => {
                        for delta in deltas {
                            yield Ok(delta);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            match parser.finish() {
                Ok(deltas) => {
                    for delta in deltas {
                        yield Ok(delta);
                    }
                }
                Err(e) => {
                    yield Err(e);
                }
            }
        }))
    }
}
