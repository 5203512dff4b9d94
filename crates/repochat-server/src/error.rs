use thiserror::Error;

pub const ENV_PREFIX: &str = "REPOCHAT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: set {env_var} or add it to repochat.toml")]
    MissingEnvVar { env_var: String },

    #[error("{key} must be at least {min}, got {value}")]
    OutOfRange { key: String, min: usize, value: usize },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a settings key, e.g. `provider.api_key`
/// becomes `REPOCHAT_PROVIDER__API_KEY`. A bare field name is looked up in
/// the provider table, the only one with required fields.
pub fn to_env_var(field: &str) -> String {
    let path = if field.contains('.') {
        field.to_string()
    } else {
        format!("provider.{}", field)
    };
    format!("{}_{}", ENV_PREFIX, path.replace('.', "__").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("api_key"), "REPOCHAT_PROVIDER__API_KEY");
        assert_eq!(to_env_var("provider.type"), "REPOCHAT_PROVIDER__TYPE");
        assert_eq!(
            to_env_var("systems.github.command"),
            "REPOCHAT_SYSTEMS__GITHUB__COMMAND"
        );
    }
}
