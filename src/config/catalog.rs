//! Model catalog and inference defaults loaded from TOML
//!
//! Every deployment has a catalog that defines:
//! - Which models can be selected, and which one is selected by default
//! - Default inference parameters for new sessions
//! - Endpoint region, timeouts and retry count
//!
//! All sections are optional; a missing file means the built-in catalog.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Selectable models
    #[serde(default = "default_models")]
    pub models: Vec<ModelOption>,

    /// Label or id of the model new sessions start with
    #[serde(default = "default_model_label")]
    pub default_model: String,

    /// Inference parameters new sessions start with
    #[serde(default)]
    pub inference: InferenceParams,

    /// Endpoint settings
    #[serde(default)]
    pub endpoint: EndpointConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            default_model: default_model_label(),
            inference: InferenceParams::default(),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl CatalogConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: CatalogConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::Validation("no models configured".into()));
        }
        if self.resolve_model(&self.default_model).is_none() {
            return Err(ConfigError::Validation(format!(
                "default model '{}' is not in the catalog",
                self.default_model
            )));
        }
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.endpoint.max_attempts) {
            return Err(ConfigError::Validation(format!(
                "endpoint.max_attempts must be in [1, {}], got {}",
                MAX_ATTEMPTS_LIMIT, self.endpoint.max_attempts
            )));
        }
        self.inference.validate()
    }

    /// Find a model by label or id.
    ///
    /// Bedrock ARNs (provisioned or imported deployments) are accepted even
    /// when they are not listed.
    pub fn resolve_model(&self, selector: &str) -> Option<ModelOption> {
        self.models
            .iter()
            .find(|m| m.label == selector || m.id == selector)
            .cloned()
            .or_else(|| {
                selector.starts_with("arn:aws:bedrock:").then(|| ModelOption {
                    label: selector.to_string(),
                    id: selector.to_string(),
                })
            })
    }

    pub fn default_model(&self) -> Option<ModelOption> {
        self.resolve_model(&self.default_model)
    }
}

/// A selectable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    /// Display label
    pub label: String,

    /// Model id or deployment ARN sent to the endpoint
    pub id: String,
}

fn default_models() -> Vec<ModelOption> {
    [
        ("Nova Micro", "us.amazon.nova-micro-v1:0"),
        ("Nova Lite", "us.amazon.nova-lite-v1:0"),
        ("Nova Pro", "us.amazon.nova-pro-v1:0"),
        (
            "Nova Lite Reasoning",
            "arn:aws:bedrock:us-east-1:963067361214:provisioned-model/dx9g06qbz7f6",
        ),
    ]
    .into_iter()
    .map(|(label, id)| ModelOption {
        label: label.to_string(),
        id: id.to_string(),
    })
    .collect()
}

fn default_model_label() -> String {
    "Nova Lite Reasoning".to_string()
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceParams {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Sent as a vendor extension field
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

pub const MAX_TOKENS_LIMIT: u32 = 32_000;
pub const TOP_K_LIMIT: u32 = 100;
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

fn default_max_tokens() -> u32 {
    5120
}

fn default_top_p() -> f32 {
    0.95
}

fn default_temperature() -> f32 {
    0.6
}

fn default_top_k() -> u32 {
    10
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            temperature: default_temperature(),
            top_k: default_top_k(),
        }
    }
}

impl InferenceParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TOKENS_LIMIT).contains(&self.max_tokens) {
            return Err(ConfigError::Validation(format!(
                "max_tokens must be between 1 and {}, got {}",
                MAX_TOKENS_LIMIT, self.max_tokens
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::Validation(format!(
                "top_p must be between 0 and 1, got {}",
                self.top_p
            )));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Validation(format!(
                "temperature must be between 0 and 1, got {}",
                self.temperature
            )));
        }
        if !(1..=TOP_K_LIMIT).contains(&self.top_k) {
            return Err(ConfigError::Validation(format!(
                "top_k must be between 1 and {}, got {}",
                TOP_K_LIMIT, self.top_k
            )));
        }
        Ok(())
    }
}

/// Endpoint connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// AWS region of the runtime endpoint
    #[serde(default = "default_region")]
    pub region: String,

    /// Full base URL override (proxies, local emulators)
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Attempts per request, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_connect_timeout() -> u64 {
    600
}

fn default_read_timeout() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            url: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl EndpointConfig {
    pub fn base_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", self.region))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
default_model = "Nova Pro"

[[models]]
label = "Nova Pro"
id = "us.amazon.nova-pro-v1:0"

[[models]]
label = "Nova Micro"
id = "us.amazon.nova-micro-v1:0"

[inference]
max_tokens = 4096
top_p = 0.1
temperature = 0.3
top_k = 20

[endpoint]
region = "eu-west-1"
max_attempts = 5
"#;

    #[test]
    fn test_parse_config() {
        let config = CatalogConfig::from_str(SAMPLE_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.models.len(), 2);
        assert_eq!(config.default_model().unwrap().id, "us.amazon.nova-pro-v1:0");
        assert_eq!(config.inference.max_tokens, 4096);
        assert_eq!(config.inference.top_k, 20);
        assert_eq!(config.endpoint.region, "eu-west-1");
        assert_eq!(config.endpoint.max_attempts, 5);
        assert_eq!(config.endpoint.connect_timeout_secs, 600); // Default
        assert_eq!(
            config.endpoint.base_url(),
            "https://bedrock-runtime.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn test_minimal_config() {
        let config = CatalogConfig::from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.models.len(), 4);
        assert_eq!(config.inference, InferenceParams::default());
        assert_eq!(config.endpoint.max_attempts, 3);
    }

    #[test]
    fn test_resolve_model() {
        let config = CatalogConfig::default();

        assert_eq!(
            config.resolve_model("Nova Lite").unwrap().id,
            "us.amazon.nova-lite-v1:0"
        );
        assert_eq!(
            config.resolve_model("us.amazon.nova-micro-v1:0").unwrap().label,
            "Nova Micro"
        );

        let arn = "arn:aws:bedrock:us-west-2:111111111111:imported-model/abc";
        assert_eq!(config.resolve_model(arn).unwrap().id, arn);
        assert!(config.resolve_model("gpt-4o").is_none());
    }

    #[test]
    fn test_max_attempts_bounds() {
        for attempts in [0, MAX_ATTEMPTS_LIMIT + 1, 100] {
            let config =
                CatalogConfig::from_str(&format!("[endpoint]\nmax_attempts = {}", attempts)).unwrap();
            assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
        }

        let config =
            CatalogConfig::from_str(&format!("[endpoint]\nmax_attempts = {}", MAX_ATTEMPTS_LIMIT)).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_default_model_rejected() {
        let config = CatalogConfig::from_str(r#"default_model = "Nope""#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_param_bounds() {
        let ok = InferenceParams {
            max_tokens: 32_000,
            top_p: 0.0,
            temperature: 1.0,
            top_k: 100,
        };
        assert!(ok.validate().is_ok());

        let cases = [
            InferenceParams { max_tokens: 0, ..ok },
            InferenceParams { max_tokens: 32_001, ..ok },
            InferenceParams { top_p: 1.5, ..ok },
            InferenceParams { temperature: -0.1, ..ok },
            InferenceParams { top_k: 0, ..ok },
            InferenceParams { top_k: 101, ..ok },
        ];
        for params in cases {
            assert!(params.validate().is_err(), "{params:?} should be rejected");
        }
    }
}
