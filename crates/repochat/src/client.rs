//! Consumer side of the reply stream: reassembly, state and an HTTP client.

pub mod assembler;
pub mod display;
pub mod state;

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;

use crate::protocol::{ChatRequest, ChatTurn, HealthReport, StreamDecodeError, StreamEvent};
use assembler::try_assemble;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Decode(#[from] StreamDecodeError),
}

/// Talks to a running chat server
pub struct ChatClient {
    client: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Ask a question. Events arrive as the server produces them; an
    /// undecodable record shows up as an error item and the stream goes on.
    pub async fn chat(
        &self,
        messages: Vec<ChatTurn>,
    ) -> Result<BoxStream<'static, Result<StreamEvent, ClientError>>, ClientError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&ChatRequest { messages })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let events = try_assemble(response.bytes_stream()).map(|item| match item {
            Ok(decoded) => decoded.map_err(ClientError::from),
            Err(e) => Err(ClientError::from(e)),
        });
        Ok(Box::pin(events))
    }

    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }
}
