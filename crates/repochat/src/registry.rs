//! One namespace of tools over every connected provider.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::errors::{AgentError, AgentResult, RegistryError};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::systems::{McpSystem, System, SystemConfig};

/// Stands in for a provider that could not be started. Its configured tools
/// keep their routes so calls to them fail as unavailable.
struct DownSystem {
    name: String,
    reason: String,
    tools: Vec<Tool>,
}

#[async_trait]
impl System for DownSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        ""
    }

    fn instructions(&self) -> &str {
        ""
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn is_alive(&self) -> bool {
        false
    }

    async fn call(&self, _tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        Err(AgentError::ProviderUnavailable(format!(
            "'{}' failed to start: {}",
            self.name, self.reason
        )))
    }
}

pub struct ToolRegistry {
    systems: Vec<Arc<dyn System>>,
    routes: HashMap<String, usize>,
    tools: Vec<Tool>,
}

impl ToolRegistry {
    /// Launch every configured provider concurrently and build the registry.
    /// A provider that fails to start is logged and kept as down; the tools
    /// its config declares are still advertised.
    pub async fn init(configs: &BTreeMap<String, SystemConfig>) -> Result<Self, RegistryError> {
        let attempts = join_all(configs.iter().map(|(name, config)| async move {
            (name.clone(), config, McpSystem::connect(name, config).await)
        }))
        .await;

        let mut systems: Vec<Arc<dyn System>> = Vec::new();
        for (name, config, attempt) in attempts {
            match attempt {
                Ok(system) => systems.push(Arc::new(system)),
                Err(e) => {
                    tracing::warn!(system = %name, error = %e, "tool provider failed to start");
                    systems.push(Arc::new(DownSystem {
                        name,
                        reason: e.to_string(),
                        tools: config.tools.clone(),
                    }));
                }
            }
        }

        let connected = systems.clone();
        match Self::discover(systems) {
            Ok(registry) => Ok(registry),
            Err(e) => {
                join_all(connected.iter().map(|system| system.shutdown())).await;
                Err(e)
            }
        }
    }

    /// Merge the tools of `systems` into one namespace. A tool name offered by
    /// two systems is an error and no registry is built.
    pub fn discover(systems: Vec<Arc<dyn System>>) -> Result<Self, RegistryError> {
        let mut routes = HashMap::new();
        let mut tools = Vec::new();
        let mut seen = HashMap::new();

        for (index, system) in systems.iter().enumerate() {
            if seen.insert(system.name().to_string(), index).is_some() {
                return Err(RegistryError::DuplicateSystem(system.name().to_string()));
            }
            for tool in system.tools() {
                if let Some(first) = routes.insert(tool.name.clone(), index) {
                    return Err(RegistryError::DuplicateTool {
                        tool: tool.name.clone(),
                        first: systems[first].name().to_string(),
                        second: system.name().to_string(),
                    });
                }
                tools.push(tool.clone());
            }
        }

        tracing::debug!(systems = systems.len(), tools = tools.len(), "tool registry built");
        Ok(Self {
            systems,
            routes,
            tools,
        })
    }

    /// Every tool, in provider order
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn systems(&self) -> &[Arc<dyn System>] {
        &self.systems
    }

    /// Name of the system that owns `tool`
    pub fn owner(&self, tool: &str) -> Option<&str> {
        self.routes
            .get(tool)
            .map(|index| self.systems[*index].name())
    }

    /// Route a call to the owning system. A dead system is not retried.
    pub async fn invoke(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let system = self
            .routes
            .get(&tool_call.name)
            .map(|index| &self.systems[*index])
            .ok_or_else(|| AgentError::UnknownTool(tool_call.name.clone()))?;

        if !system.is_alive().await {
            return Err(AgentError::ProviderUnavailable(format!(
                "'{}' is not running",
                system.name()
            )));
        }

        tracing::debug!(tool = %tool_call.name, system = system.name(), "invoking tool");
        let result = system.call(tool_call).await;
        if let Err(e) = &result {
            tracing::debug!(system = system.name(), error = %e, "tool call failed");
        }
        result
    }

    /// Up/down for every configured system, including ones that never started
    pub async fn status(&self) -> BTreeMap<String, bool> {
        let alive = join_all(self.systems.iter().map(|system| system.is_alive())).await;
        self.systems
            .iter()
            .zip(alive)
            .map(|(system, alive)| (system.name().to_string(), alive))
            .collect()
    }

    pub async fn shutdown(&self) {
        join_all(self.systems.iter().map(|system| system.shutdown())).await;
        tracing::info!("tool providers shut down");
    }
}
