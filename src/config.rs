//! Configuration management for tq.
//!
//! Provider selection comes from the environment (which API key is set);
//! model and prompt defaults come from `~/.config/tq/config.toml` when it
//! exists, with the `QMODEL` variable overriding the model.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Supported LLM providers.
///
/// Resolved once at startup; every provider-specific branch in the crate
/// matches exhaustively on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Perplexity,
    Anthropic,
}

/// Credential environment variables, scanned in priority order.
pub const CREDENTIAL_VARS: [(&str, Provider); 3] = [
    ("OPENAI_API_KEY", Provider::OpenAi),
    ("PERPLEXITY_API_KEY", Provider::Perplexity),
    ("ANTHROPIC_API_KEY", Provider::Anthropic),
];

impl Provider {
    /// Map a credential variable name to its provider by marker substring.
    pub fn from_credential_var(name: &str) -> Option<Provider> {
        if name.contains("OPENAI") {
            Some(Provider::OpenAi)
        } else if name.contains("PERPLEXITY") {
            Some(Provider::Perplexity)
        } else if name.contains("ANTHROPIC") {
            Some(Provider::Anthropic)
        } else {
            None
        }
    }

    /// Get the provider name.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Perplexity => "perplexity",
            Provider::Anthropic => "anthropic",
        }
    }

    /// Base URL for the provider's API.
    /// Perplexity speaks the OpenAI wire format on its own host.
    pub fn base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Perplexity => "https://api.perplexity.ai",
            Provider::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

/// A provider plus the API key found for it.
///
/// The key is read from the environment as-is; validation is deferred to
/// the first request.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub provider: Provider,
    pub api_key: String,
}

impl Credentials {
    /// Detect which credential is configured.
    ///
    /// `QPROVIDER` may name a specific credential variable; otherwise the
    /// known variables are scanned in priority order. Returns `Ok(None)`
    /// when nothing is set. An unrecognized `QPROVIDER` value is a fatal
    /// configuration error, reported before any provider is contacted.
    pub fn detect() -> Result<Option<Credentials>> {
        if let Ok(name) = std::env::var("QPROVIDER") {
            let provider = Provider::from_credential_var(&name)
                .with_context(|| format!("Unrecognized API: {name}"))?;
            let api_key = std::env::var(&name)
                .with_context(|| format!("QPROVIDER names {name}, but it is not set"))?;
            return Ok(Some(Credentials { provider, api_key }));
        }

        for (name, provider) in CREDENTIAL_VARS {
            if let Ok(api_key) = std::env::var(name) {
                return Ok(Some(Credentials { provider, api_key }));
            }
        }
        Ok(None)
    }
}

/// File-backed settings with environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Model identifier sent to the provider (default: gpt-4o).
    #[serde(default = "default_model")]
    pub model: String,
    /// System prompt for the first turn.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Completion budget for providers that require one (Anthropic).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("tq"))
            .context("Could not determine config directory")
    }

    /// Get the config file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, using defaults if not found, then
    /// apply the `QMODEL` override.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(model) = std::env::var("QMODEL") {
            config.model = model;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_credential_var() {
        assert_eq!(
            Provider::from_credential_var("OPENAI_API_KEY"),
            Some(Provider::OpenAi)
        );
        assert_eq!(
            Provider::from_credential_var("PERPLEXITY_API_KEY"),
            Some(Provider::Perplexity)
        );
        assert_eq!(
            Provider::from_credential_var("ANTHROPIC_API_KEY"),
            Some(Provider::Anthropic)
        );
        assert_eq!(Provider::from_credential_var("MISTRAL_API_KEY"), None);
    }

    #[test]
    fn test_credential_table_matches_substring_markers() {
        for (name, provider) in CREDENTIAL_VARS {
            assert_eq!(Provider::from_credential_var(name), Some(provider));
        }
    }

    #[test]
    fn test_perplexity_uses_alternate_base_url() {
        assert_eq!(Provider::Perplexity.base_url(), "https://api.perplexity.ai");
        assert_ne!(Provider::Perplexity.base_url(), Provider::OpenAi.base_url());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.system_prompt, "You are a helpful assistant.");
        assert_eq!(config.max_tokens, 2048);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
model = "claude-3-5-haiku-latest"
max_tokens = 1024
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.model, "claude-3-5-haiku-latest");
        assert_eq!(config.max_tokens, 1024);
        // Missing keys fall back to defaults.
        assert_eq!(config.system_prompt, "You are a helpful assistant.");
    }
}
