//! Workspace file parser.
//!
//! This module handles loading the workspace from YAML files and
//! environment variables, with proper precedence and error handling.

use crate::error::{ConfigError, ProviderError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::WorkspaceConfig;

/// Parser for workspace files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a workspace from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
        let path = path.as_ref();
        info!("Loading workspace from: {}", path.display());

        if !path.exists() {
            return Err(ProviderError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a workspace from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<WorkspaceConfig> {
        debug!("Parsing YAML workspace");

        let config: WorkspaceConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ProviderError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed {} resource(s) and {} data source(s)",
            config.resources.len(),
            config.data.len()
        );
        Ok(config)
    }

    /// Loads a workspace and applies environment overrides.
    ///
    /// Environment variables are checked in the format
    /// `DATADOG_TF_STATE_<KEY>` (e.g., `DATADOG_TF_STATE_BUCKET`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies state backend overrides from `env`.
    pub fn apply_env_overrides<F>(config: &mut WorkspaceConfig, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = env("DATADOG_TF_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = env("DATADOG_TF_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(region) = env("DATADOG_TF_STATE_REGION") {
            debug!("Overriding state.region from environment");
            config.state.region = Some(region);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ProviderError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default workspace file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "datadog.tf.yaml",
    "datadog.tf.yml",
    "provider.yaml",
    "provider.yml",
];

/// Finds the workspace file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no workspace file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found workspace file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ProviderError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateBackend;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
resources: []
";
        let parser = ConfigParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let config = result.unwrap();
        assert_eq!(config.state.backend, StateBackend::Local);
        assert!(config.provider.api_url.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
provider:
  api_url: https://api.datadoghq.eu
  validate: false
  http_client_retry_max_retries: 2
  default_tags:
    team: core

state:
  backend: s3
  bucket: dd-state
  prefix: monitors/prod

resources:
  - type: datadog_monitor
    name: cpu
    attributes:
      name: High CPU
      type: metric alert
      query: "avg(last_5m):avg:system.cpu.user{*} > 90"
      message: "CPU is high @ops"
      monitor_thresholds:
        critical: 90
  - type: datadog_downtime
    name: cpu_mute
    attributes:
      scope: ["*"]
      monitor_id: "${datadog_monitor.cpu.id}"

data:
  - type: datadog_team
    name: core
    attributes:
      filter_keyword: core
"#;
        let parser = ConfigParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let config = result.unwrap();
        assert_eq!(config.provider.validate, Some(false));
        assert_eq!(config.state.backend, StateBackend::S3);
        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.resources[0].block_type, "datadog_monitor");
        assert_eq!(config.resources[0].attributes["monitor_thresholds"]["critical"], 90);
        assert_eq!(config.data[0].name, "core");
    }

    #[test]
    fn test_unknown_provider_field_is_rejected() {
        let yaml = "provider:\n  api_token: x\n";
        assert!(ConfigParser::new().parse_yaml(yaml, None).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = WorkspaceConfig::default();
        ConfigParser::apply_env_overrides(&mut config, |name| {
            (name == "DATADOG_TF_STATE_BUCKET").then(|| "from-env".to_string())
        });
        assert_eq!(config.state.bucket.as_deref(), Some("from-env"));
        assert!(config.state.prefix.is_none());
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("datadog.tf.yaml"), "resources: []\n").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("datadog.tf.yaml"));
    }
}
