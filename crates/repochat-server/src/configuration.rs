use std::collections::BTreeMap;
use std::path::Path;

use config::{Config, Environment, File};
use repochat::agent::{DEFAULT_MAX_MESSAGES, DEFAULT_MAX_TURNS};
use repochat::models::tool::Tool;
use repochat::providers::configs::ProviderConfig;
use repochat::systems::SystemConfig;
use serde::Deserialize;
use serde_json::json;

use crate::error::{to_env_var, ConfigError, ENV_PREFIX};

pub const CONFIG_FILE: &str = "repochat.toml";

const GITHUB_TOKEN_VAR: &str = "GITHUB_PERSONAL_ACCESS_TOKEN";

/// Room for the first message and the current question
const MIN_MAX_MESSAGES: usize = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed by CORS; any origin when empty
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Template replacing the bundled system prompt
    #[serde(default)]
    pub prompt_file: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_messages: default_max_messages(),
            prompt_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub systems: BTreeMap<String, SystemConfig>,
}

impl Settings {
    /// Defaults, then `repochat.toml` if present, then `REPOCHAT_*` variables
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(Path::new(CONFIG_FILE))
    }

    pub fn load(file: &Path) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("server.allowed_origins", Vec::<String>::new())?
            .set_default("provider.type", "openai")?
            .set_default("agent.max_turns", default_max_turns() as i64)?
            .set_default("agent.max_messages", default_max_messages() as i64)?
            .set_default("systems.github.command", "npx")?
            .set_default(
                "systems.github.args",
                vec!["-y", "@modelcontextprotocol/server-github"],
            )?
            .set_default("systems.screenshot.command", "npx")?
            .set_default("systems.screenshot.args", vec!["@playwright/mcp"])?
            .add_source(File::from(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .with_list_parse_key("systems.github.args")
                    .with_list_parse_key("systems.screenshot.args"),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(mut settings) => {
                if let Some(github) = settings.systems.get_mut("github") {
                    github
                        .env
                        .entry(GITHUB_TOKEN_VAR.to_string())
                        .or_insert_with(|| "${GITHUB_TOKEN}".to_string());
                }
                if let Some(screenshot) = settings.systems.get_mut("screenshot") {
                    if screenshot.tools.is_empty() {
                        screenshot.tools = screenshot_tools();
                    }
                }
                if settings.agent.max_messages < MIN_MAX_MESSAGES {
                    return Err(ConfigError::OutOfRange {
                        key: "agent.max_messages".to_string(),
                        min: MIN_MAX_MESSAGES,
                        value: settings.agent.max_messages,
                    });
                }
                Ok(settings)
            }
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // "missing field `api_key`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .split('`')
                        .next()
                        .unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

/// What the Playwright server is expected to offer, advertised even when it
/// cannot be launched
fn screenshot_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            "browser_navigate",
            "Navigate to a URL",
            json!({
                "type": "object",
                "properties": {"url": {"type": "string", "description": "The URL to navigate to"}},
                "required": ["url"]
            }),
        ),
        Tool::new(
            "browser_take_screenshot",
            "Take a screenshot of the current page",
            json!({
                "type": "object",
                "properties": {"fullPage": {"type": "boolean"}}
            }),
        ),
    ]
}
