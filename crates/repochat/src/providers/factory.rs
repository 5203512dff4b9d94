use std::sync::Arc;

use anyhow::Result;

use super::{base::Provider, configs::ProviderConfig, openai::OpenAiProvider};

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Azure(azure_config) => Ok(Arc::new(OpenAiProvider::azure(azure_config)?)),
    }
}
