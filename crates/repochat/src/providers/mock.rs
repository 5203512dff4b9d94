use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, MessageContent};
use crate::models::tool::Tool;
use crate::providers::base::{DeltaStream, Provider, ProviderDelta};

/// A provider that replays scripted replies, for tests and local runs
pub struct MockProvider {
    responses: Mutex<VecDeque<AgentResult<Message>>>,
    fallback: Option<AgentResult<Message>>,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            histories: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every call fails with `error`
    pub fn failing(error: AgentError) -> Self {
        Self::new(Vec::new()).with_fallback(Err(error))
    }

    /// Reply used once the script runs out
    pub fn with_fallback(mut self, fallback: AgentResult<Message>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Queue a failed call after the scripted messages
    pub fn with_error(self, error: AgentError) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
        self
    }

    /// The message histories of every call so far
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Text is split at word boundaries so consumers see more than one token
fn deltas(message: Message) -> Vec<AgentResult<ProviderDelta>> {
    let mut deltas = Vec::new();
    let mut requests = Vec::new();
    for content in message.content {
        match content {
            MessageContent::Text(text) => deltas.extend(
                text.text
                    .split_inclusive(' ')
                    .map(|token| Ok(ProviderDelta::Text(token.to_string()))),
            ),
            MessageContent::ToolRequest(request) => {
                requests.push(Ok(ProviderDelta::ToolRequest(request)))
            }
            _ => {}
        }
    }
    deltas.extend(requests);
    deltas
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> AgentResult<DeltaStream> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let reply = match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .unwrap_or_else(|| Ok(Message::assistant().with_text(""))),
        };

        Ok(Box::pin(stream::iter(deltas(reply?))))
    }
}
