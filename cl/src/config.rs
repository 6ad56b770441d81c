//! Configuration for chatloom

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::orchestrator::ArchitectureKeywords;

/// Default agent id recorded on exchanges
pub const DEFAULT_AGENT_ID: &str = "AppBuilder";

/// Agent id used by older configurations, migrated on load
pub const LEGACY_DEFAULT_AGENT_ID: &str = "Coder";

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider dialect: openai, openai-compatible, ollama, lmstudio
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Request streamed responses
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_provider() -> String {
    "openai-compatible".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_stream() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_timeout_ms(),
            stream: default_stream(),
        }
    }
}

impl ModelConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| eyre::eyre!("API key environment variable '{}' is not set", self.api_key_env))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    /// Agent id stamped onto recorded exchanges
    #[serde(default = "default_agent")]
    pub default_agent: String,

    /// Keyword lists for architecture-line classification
    #[serde(default)]
    pub keywords: ArchitectureKeywords,
}

fn default_agent() -> String {
    DEFAULT_AGENT_ID.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            default_agent: default_agent(),
            keywords: ArchitectureKeywords::default(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("chatloom").join("config.yml")),
            Some(PathBuf::from("chatloom.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The agent id to record exchanges under, with legacy-id migration.
    ///
    /// Older configurations named the default agent `Coder`; that id maps
    /// to the current default with a warning. The migration never fails.
    pub fn resolved_default_agent(&self) -> String {
        if self.default_agent == LEGACY_DEFAULT_AGENT_ID {
            warn!(
                legacy = LEGACY_DEFAULT_AGENT_ID,
                current = DEFAULT_AGENT_ID,
                "resolved_default_agent: migrating legacy default agent id"
            );
            return DEFAULT_AGENT_ID.to_string();
        }
        self.default_agent.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_agent, "AppBuilder");
        assert_eq!(config.model.provider, "openai-compatible");
        assert!(config.model.stream);
        assert!(!config.keywords.state.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "model:\n  model: llama3\n  base_url: http://localhost:11434\ndefault_agent: Custom\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.model.model, "llama3");
        assert_eq!(config.model.base_url, "http://localhost:11434");
        assert_eq!(config.default_agent, "Custom");
        // Unspecified fields keep their defaults
        assert_eq!(config.model.max_tokens, 8192);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");

        let mut config = Config::default();
        config.default_agent = "Reviewer".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.default_agent, "Reviewer");
    }

    #[test]
    fn test_legacy_agent_migration() {
        let mut config = Config::default();
        config.default_agent = LEGACY_DEFAULT_AGENT_ID.to_string();
        assert_eq!(config.resolved_default_agent(), DEFAULT_AGENT_ID);

        config.default_agent = "Custom".to_string();
        assert_eq!(config.resolved_default_agent(), "Custom");
    }
}
