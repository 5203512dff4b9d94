//! JSON-RPC 2.0 over a pair of byte pipes, one message per line.
//!
//! A [`StdioTransport`] owns one tool provider subprocess. Requests on the same
//! transport are serialized: the I/O pair is locked for the write and the read
//! of a single exchange, so responses never have to be matched out of order.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};

use crate::errors::{AgentError, AgentResult};
use crate::framing::LineBuffer;

const READ_CHUNK: usize = 8 * 1024;

lazy_static! {
    static ref ENV_REFERENCE: Regex = Regex::new(r"\$\{([^}]+)\}").unwrap();
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Anything the provider writes: responses, and notifications we ignore
#[derive(Debug, Deserialize)]
struct JsonRpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    fn into_result(self) -> AgentResult<Value> {
        if let Some(error) = self.error {
            return Err(AgentError::ExecutionError(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        self.result.ok_or_else(|| {
            AgentError::MalformedResponse("response has neither result nor error".to_string())
        })
    }
}

struct Pipes {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    buffer: LineBuffer,
}

impl Pipes {
    async fn send(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Read until the response carrying `id` arrives.
    async fn receive(&mut self, id: u64) -> AgentResult<Value> {
        loop {
            while let Some(line) = self.buffer.next_line() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let message: JsonRpcMessage = serde_json::from_slice(&line).map_err(|e| {
                    AgentError::MalformedResponse(format!(
                        "{}: {}",
                        e,
                        String::from_utf8_lossy(&line)
                    ))
                })?;
                match message.id.as_ref().and_then(Value::as_u64) {
                    Some(received) if received == id => return message.into_result(),
                    Some(stale) => {
                        tracing::debug!(expected = id, received = stale, "skipping stale response")
                    }
                    None => tracing::debug!(method = ?message.method, "skipping notification"),
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let read = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;
            if read == 0 {
                return Err(AgentError::ProviderUnavailable(
                    "provider closed its output".to_string(),
                ));
            }
            self.buffer.extend(&chunk[..read]);
        }
    }
}

/// Connection to one tool provider
pub struct StdioTransport {
    label: String,
    pipes: Mutex<Pipes>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    exited: AtomicBool,
    closed: watch::Sender<bool>,
}

impl StdioTransport {
    /// Start `command` with piped stdin/stdout. `${VAR}` references in `env`
    /// values are filled in from our own environment.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> AgentResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, expand_env_vars(value));
        }

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::ProviderUnavailable(format!("failed to start '{}': {}", command, e))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Internal("child stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Internal("child stdout was not piped".to_string()))?;

        tracing::debug!(command, pid = ?child.id(), "spawned tool provider");
        let mut transport = Self::from_io(stdout, stdin);
        transport.label = command.to_string();
        transport.child = Mutex::new(Some(child));
        Ok(transport)
    }

    /// Build a transport over an existing pipe pair, with no process attached
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            label: "pipe".to_string(),
            pipes: Mutex::new(Pipes {
                reader: Box::new(reader),
                writer: Box::new(writer),
                buffer: LineBuffer::new(),
            }),
            child: Mutex::new(None),
            next_id: AtomicU64::new(1),
            exited: AtomicBool::new(false),
            closed,
        }
    }

    /// Send a request and wait for its response.
    ///
    /// Fails with `ProviderUnavailable` if the transport is closed while the
    /// request is in flight; a response arriving after that is discarded.
    pub async fn request(&self, method: &str, params: Option<Value>) -> AgentResult<Value> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(self.unavailable());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_vec(&JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        })
        .map_err(|e| AgentError::Internal(e.to_string()))?;

        let exchange = async {
            let mut pipes = self.pipes.lock().await;
            tracing::debug!(provider = %self.label, id, method, "sending request");
            pipes.send(&line).await.map_err(|e| {
                self.exited.store(true, Ordering::SeqCst);
                AgentError::ProviderUnavailable(e.to_string())
            })?;
            let result = pipes.receive(id).await;
            if let Err(AgentError::ProviderUnavailable(_)) = &result {
                self.exited.store(true, Ordering::SeqCst);
            }
            result
        };

        tokio::select! {
            result = exchange => result,
            _ = closed.wait_for(|closed| *closed) => Err(self.unavailable()),
        }
    }

    /// Send a notification, which gets no response
    pub async fn notify(&self, method: &str, params: Option<Value>) -> AgentResult<()> {
        if *self.closed.borrow() {
            return Err(self.unavailable());
        }
        let line = serde_json::to_vec(&JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        })
        .map_err(|e| AgentError::Internal(e.to_string()))?;

        let mut pipes = self.pipes.lock().await;
        pipes.send(&line).await.map_err(|e| {
            self.exited.store(true, Ordering::SeqCst);
            AgentError::ProviderUnavailable(e.to_string())
        })
    }

    pub async fn is_alive(&self) -> bool {
        if *self.closed.borrow() || self.exited.load(Ordering::SeqCst) {
            return false;
        }
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Stop the provider. In-flight requests fail, and the child is killed and reaped.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(provider = %self.label, error = %e, "failed to stop tool provider");
            }
        }
        tracing::debug!(provider = %self.label, "transport closed");
    }

    fn unavailable(&self) -> AgentError {
        AgentError::ProviderUnavailable(format!("connection to '{}' is closed", self.label))
    }
}

/// Expand `${VAR}` references from the process environment. Unset variables are left as is.
pub fn expand_env_vars(input: &str) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
