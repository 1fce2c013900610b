use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Provider binding for each model identifier that may be dispatched.
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,
}

/// Which provider API dialect a model is reached through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderDialect {
    #[default]
    LmStudio,
    OpenAI,
    Anthropic,
    Ollama,
}

/// Image detail hint forwarded to providers that understand it.
/// Also bounds the resize applied before upload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetailHint {
    Low,
    High,
    #[default]
    Auto,
}

impl DetailHint {
    /// Maximum image dimension sent to the provider for this hint.
    pub fn max_dimension(&self) -> u32 {
        match self {
            DetailHint::Low => 512,
            DetailHint::High => 2048,
            DetailHint::Auto => 1024,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetailHint::Low => "low",
            DetailHint::High => "high",
            DetailHint::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier as used in enqueue requests and the allowlist.
    pub id: String,

    #[serde(default)]
    pub provider: ProviderDialect,

    /// Base URL the model is served at. When unset, the provider factory
    /// fills in the dialect's conventional endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Model identifiers permitted to receive provider calls. Anything not
    /// listed here is skipped by the dispatcher, never invoked.
    #[serde(default = "default_allowlist")]
    pub allowlist: Vec<String>,

    /// Ordered fallback list used when an enqueue request names no models.
    #[serde(default = "default_allowlist")]
    pub default_models: Vec<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// How long a claimed job may sit in_progress before the reaper reclaims
    /// it. Defaults to twice the provider timeout when unset.
    #[serde(default)]
    pub lease_timeout_secs: Option<u64>,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Worker sleep between queue polls when no job is eligible.
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,

    #[serde(default)]
    pub detail: DetailHint,

    /// Optional context prepended to the analysis prompt.
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

fn default_allowlist() -> Vec<String> {
    vec!["gemma-3-4b".to_string()]
}

fn default_models() -> Vec<ModelConfig> {
    vec![ModelConfig {
        id: "gemma-3-4b".to_string(),
        provider: ProviderDialect::LmStudio,
        endpoint: None,
        api_key: None,
    }]
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    2
}

fn default_backoff_cap_secs() -> u64 {
    300
}

fn default_provider_timeout_secs() -> u64 {
    120
}

fn default_worker_count() -> usize {
    2
}

fn default_idle_poll_secs() -> u64 {
    2
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            allowlist: default_allowlist(),
            default_models: default_allowlist(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            lease_timeout_secs: None,
            worker_count: default_worker_count(),
            idle_poll_secs: default_idle_poll_secs(),
            detail: DetailHint::default(),
            custom_prompt: None,
        }
    }
}

impl AnalysisConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(
            self.lease_timeout_secs
                .unwrap_or(self.provider_timeout_secs * 2),
        )
    }

    /// Backoff delay before a job with the given retry count becomes
    /// eligible again: base * 2^retries, capped.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exp = retry_count.min(16);
        let delay = self
            .backoff_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_secs);
        Duration::from_secs(delay)
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photoscribe")
        .join("photoscribe.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            analysis: AnalysisConfig::default(),
            models: default_models(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(path: PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, path: &std::path::Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PHOTOSCRIBE_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photoscribe")
            .join("config.toml")
    }

    /// Provider binding for a model identifier, if configured.
    pub fn model_config(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.analysis.max_retries, 3);
        assert_eq!(config.analysis.worker_count, 2);
        assert_eq!(config.analysis.detail, DetailHint::Auto);
        assert!(config.analysis.lease_timeout_secs.is_none());
    }

    #[test]
    fn test_lease_defaults_to_twice_provider_timeout() {
        let analysis = AnalysisConfig::default();
        assert_eq!(
            analysis.lease_timeout(),
            Duration::from_secs(analysis.provider_timeout_secs * 2)
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let analysis = AnalysisConfig {
            backoff_base_secs: 2,
            backoff_cap_secs: 10,
            ..Default::default()
        };
        assert_eq!(analysis.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(analysis.backoff_delay(1), Duration::from_secs(4));
        assert_eq!(analysis.backoff_delay(2), Duration::from_secs(8));
        assert_eq!(analysis.backoff_delay(3), Duration::from_secs(10));
        assert_eq!(analysis.backoff_delay(30), Duration::from_secs(10));
    }

    #[test]
    fn test_model_binding_parse() {
        let toml_src = r#"
            [analysis]
            allowlist = ["gpt-vision-a", "local-llava"]
            max_retries = 5

            [[models]]
            id = "gpt-vision-a"
            provider = "openai"
            endpoint = "https://api.openai.com/v1"
            api_key = "sk-test"

            [[models]]
            id = "local-llava"
            provider = "ollama"
            endpoint = "http://localhost:11434"
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.analysis.max_retries, 5);
        let m = config.model_config("gpt-vision-a").unwrap();
        assert_eq!(m.provider, ProviderDialect::OpenAI);
        assert_eq!(m.endpoint.as_deref(), Some("https://api.openai.com/v1"));
        assert!(config.model_config("unknown").is_none());
    }
}
