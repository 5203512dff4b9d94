use std::sync::Arc;

use repochat::agent::Agent;
use repochat::providers::base::Provider;
use repochat::registry::ToolRegistry;

use crate::configuration::AgentSettings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn Provider>,
    pub registry: Arc<ToolRegistry>,
    pub agent: AgentSettings,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        agent: AgentSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            agent,
        }
    }

    /// A driver for one request, sharing the provider and the tool registry
    pub fn agent(&self) -> Agent {
        let agent = Agent::new(self.provider.clone(), self.registry.clone())
            .with_max_turns(self.agent.max_turns)
            .with_max_messages(self.agent.max_messages);
        match &self.agent.prompt_file {
            Some(path) => agent.with_prompt_file(path),
            None => agent,
        }
    }
}
