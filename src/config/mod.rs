//! Application configuration

pub mod catalog;
pub mod prompts;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use catalog::{CatalogConfig, ConfigError, EndpointConfig, InferenceParams, ModelOption};
pub use prompts::PromptLibrary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub aws_region: Option<String>,
    #[serde(skip_serializing)]
    pub bedrock_api_key: Option<String>,
    pub bedrock_endpoint: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            aws_region: env::var("AWS_REGION")
                .or_else(|_| env::var("AWS_DEFAULT_REGION"))
                .ok(),
            bedrock_api_key: env::var("AWS_BEARER_TOKEN_BEDROCK").ok(),
            bedrock_endpoint: env::var("BEDROCK_ENDPOINT").ok(),
            catalog_path: env::var("CHAT_CONFIG").ok().map(PathBuf::from),
            prompts_dir: env::var("CHAT_PROMPTS_DIR").ok().map(PathBuf::from),
        })
    }

    /// Load the model catalog, falling back to the built-in one
    pub fn load_catalog(&self) -> Result<CatalogConfig, ConfigError> {
        let mut catalog = match &self.catalog_path {
            Some(path) => CatalogConfig::from_file(path)?,
            None => CatalogConfig::default(),
        };

        if let Some(region) = &self.aws_region {
            catalog.endpoint.region = region.clone();
        }
        if let Some(endpoint) = &self.bedrock_endpoint {
            catalog.endpoint.url = Some(endpoint.clone());
        }

        catalog.validate()?;
        Ok(catalog)
    }
}
