use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::errors::ConfigError;
use crate::llm_client::LlmProvider;

pub const CONFIG_FILE_ENV: &str = "STUDIO_CONFIG_FILE";

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Provider connection settings. Built once at startup and read-only after.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            api_key: None,
            base_url: None,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LlmConfig {
    pub fn resolved_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn resolved_model(&self) -> &str {
        self.model.as_deref().unwrap_or_else(|| self.provider.default_model())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
        }
    }
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StudioConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
}

impl StudioConfig {
    /// Load from the file named by `STUDIO_CONFIG_FILE` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`StudioConfig::load`] with an explicit variable lookup
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_FILE_ENV) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        Ok(config)
    }

    /// Read a JSON config file. A missing file yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let config_str = fs::read_to_string(path)?;
        let config: StudioConfig = serde_json::from_str(&config_str)?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("STUDIO_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var(lookup, "STUDIO_PORT")? {
            self.server.port = port;
        }

        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = LlmProvider::from_str(&provider).map_err(|_| ConfigError::Invalid {
                key: "LLM_PROVIDER".to_string(),
                value: provider.clone(),
            })?;
        }
        if let Some(key) = lookup("LLM_API_KEY").or_else(|| lookup(self.llm.provider.api_key_env())) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(max_tokens) = parse_var(lookup, "LLM_MAX_TOKENS")? {
            self.llm.max_tokens = max_tokens;
        }
        if let Some(timeout) = parse_var(lookup, "LLM_TIMEOUT_SECS")? {
            self.llm.timeout_secs = timeout;
        }

        if let Some(max_retries) = parse_var(lookup, "LLM_MAX_RETRIES")? {
            self.retry.max_retries = max_retries;
        }
        if let Some(backoff) = parse_var(lookup, "LLM_BACKOFF_BASE_SECS")? {
            self.retry.backoff_base_secs = backoff;
        }

        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(None),
    }
}
