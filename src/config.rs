//! Service configuration for the roundtable evaluation pipeline
//!
//! Configuration is a TOML file with four sections. Only `[llm]` is required;
//! the rest fall back to defaults. Secrets never live in the file: the LLM API
//! key is read at runtime from the environment variable named by `api_key_env`.

use crate::llm::{ApiFlavor, OpenAiConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundtableConfig {
    #[serde(default)]
    pub server: ServerSection,
    pub llm: LlmSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub store: StoreSection,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7071
}

/// LLM backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// "openai" or "azure"
    pub provider: String,
    /// Model name, or the deployment's model label for Azure
    pub model: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    /// API root. Required for Azure (the resource endpoint).
    pub base_url: Option<String>,
    /// Azure deployment name
    pub deployment: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "2024-06-01".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

/// Retry policy for model calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Run document storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory for the file backend
    pub path: Option<PathBuf>,
    /// Retention hint written into every run document
    #[serde(default = "default_run_ttl")]
    pub run_ttl_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            run_ttl_secs: default_run_ttl(),
        }
    }
}

fn default_run_ttl() -> u64 {
    2_592_000 // 30 days
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RoundtableConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RoundtableConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.llm.provider.as_str() {
            "openai" => {}
            "azure" => {
                if self.llm.base_url.is_none() {
                    return Err(ConfigError::InvalidConfig(
                        "azure provider requires llm.base_url (resource endpoint)".to_string(),
                    ));
                }
                if self.llm.deployment.is_none() {
                    return Err(ConfigError::InvalidConfig(
                        "azure provider requires llm.deployment".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::InvalidConfig(format!(
                    "unsupported llm.provider '{other}', expected 'openai' or 'azure'"
                )))
            }
        }

        if let Some(base_url) = &self.llm.base_url {
            url::Url::parse(base_url).map_err(|e| {
                ConfigError::InvalidConfig(format!("llm.base_url '{base_url}' is not a URL: {e}"))
            })?;
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::File && self.store.path.is_none() {
            return Err(ConfigError::InvalidConfig(
                "file store backend requires store.path".to_string(),
            ));
        }

        Ok(())
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.llm.api_key_env)
            .map_err(|_| ConfigError::EnvVarNotFound(self.llm.api_key_env.clone()))
    }

    /// Provider settings for the configured backend, given the API key
    pub fn provider_config(&self, api_key: String) -> OpenAiConfig {
        let defaults = OpenAiConfig::default();
        let flavor = match (self.llm.provider.as_str(), &self.llm.deployment) {
            ("azure", Some(deployment)) => ApiFlavor::Azure {
                deployment: deployment.clone(),
                api_version: self.llm.api_version.clone(),
            },
            _ => ApiFlavor::OpenAi,
        };

        OpenAiConfig {
            api_key,
            base_url: self.llm.base_url.clone().unwrap_or(defaults.base_url),
            timeout: self.llm_timeout(),
            flavor,
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn listen_addr(&self) -> Result<std::net::SocketAddr, ConfigError> {
        format!("{}:{}", self.server.bind, self.server.port)
            .parse()
            .map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "invalid listen address {}:{}: {e}",
                    self.server.bind, self.server.port
                ))
            })
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
