//! Service configuration loaded from `config.yaml`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP gateway binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Text-generation backend settings.
    #[serde(default)]
    pub model: ModelConfig,
    /// Run budgets.
    #[serde(default)]
    pub budgets: BudgetConfig,
    /// Directory for persisted project snapshots.  Defaults to a
    /// `codecanvas` subdirectory of the OS data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            model: ModelConfig::default(),
            budgets: BudgetConfig::default(),
            data_dir: None,
        }
    }
}

/// Backend selection and credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Backend kind. Only "anthropic" is wired up; anything else (or a
    /// missing key) falls back to the deterministic mock.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name sent in the request body.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key, or a `$VAR` reference resolved from the environment.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Endpoint override for tests and proxies.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            endpoint: None,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: config value, `$VAR` env reference, or the
    /// `ANTHROPIC_API_KEY` environment variable.  `None` means run
    /// without credentials.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if let Some(var) = key.strip_prefix('$') {
                return std::env::var(var).ok().filter(|v| !v.is_empty());
            }
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
    }
}

/// Hard ceilings on a single run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Maximum assistant turns per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Tighter turn ceiling applied when running on the mock backend.
    #[serde(default = "default_fallback_max_steps")]
    pub fallback_max_steps: usize,
    /// Output-token ceiling per turn, forwarded to the backend.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_max_steps() -> usize {
    40
}

fn default_fallback_max_steps() -> usize {
    4
}

fn default_max_output_tokens() -> u32 {
    10_000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            fallback_max_steps: default_fallback_max_steps(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl Config {
    /// Read and parse a YAML configuration file.  A missing file yields
    /// the defaults so the service starts with zero setup.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                let config = Config::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        let config: Config =
            serde_yaml_ng::from_str(&contents).context("failed to parse config YAML")?;
        config.validate()?;

        tracing::debug!(
            listen_addr = %config.listen_addr,
            model = %config.model.model,
            max_steps = config.budgets.max_steps,
            "configuration loaded"
        );

        Ok(config)
    }

    /// Validate semantic constraints that serde cannot enforce.
    fn validate(&self) -> anyhow::Result<()> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("config: listen_addr is not a valid socket address");
        }
        if self.budgets.max_steps == 0 || self.budgets.fallback_max_steps == 0 {
            anyhow::bail!("config: step budgets must be at least 1");
        }
        if self.budgets.fallback_max_steps > self.budgets.max_steps {
            anyhow::bail!("config: fallback_max_steps cannot exceed max_steps");
        }
        if self.budgets.max_output_tokens == 0 {
            anyhow::bail!("config: max_output_tokens must be at least 1");
        }
        Ok(())
    }

    /// Directory for persisted projects, configured or OS default.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("codecanvas")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.budgets.max_steps, 40);
        assert_eq!(config.budgets.fallback_max_steps, 4);
        assert_eq!(config.budgets.max_output_tokens, 10_000);
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let yaml = r#"
listen_addr: "0.0.0.0:9000"
model:
  model: "claude-opus-4-20250514"
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.model.model, "claude-opus-4-20250514");
        assert_eq!(config.budgets.max_steps, 40);
    }

    #[test]
    fn api_key_env_reference() {
        std::env::set_var("TEST_CANVAS_KEY_1", "from-env");
        let model = ModelConfig {
            api_key: Some("$TEST_CANVAS_KEY_1".to_string()),
            ..ModelConfig::default()
        };
        assert_eq!(model.resolve_api_key().as_deref(), Some("from-env"));
        std::env::remove_var("TEST_CANVAS_KEY_1");
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut config = Config::default();
        config.budgets.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "listen_addr: \"127.0.0.1:8787\"\nunknown_key: true\n";
        assert!(serde_yaml_ng::from_str::<Config>(yaml).is_err());
    }
}
