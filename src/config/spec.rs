//! Workspace configuration types.
//!
//! This module defines the structs that map to the `datadog.tf.yaml` file:
//! provider settings, the state backend and the resource and data source
//! blocks describing the desired Datadog objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use validator::Validate;

/// The root of a workspace file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    /// Provider settings.
    #[serde(default)]
    pub provider: ProviderSettings,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Managed resources.
    #[serde(default)]
    pub resources: Vec<BlockConfig>,
    /// Data sources.
    #[serde(default)]
    pub data: Vec<BlockConfig>,
}

impl WorkspaceConfig {
    /// Every block with its kind, data sources first.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockKind, &BlockConfig)> {
        self.data
            .iter()
            .map(|b| (BlockKind::Data, b))
            .chain(self.resources.iter().map(|b| (BlockKind::Resource, b)))
    }

    /// Finds a resource block by address.
    #[must_use]
    pub fn resource(&self, address: &str) -> Option<&BlockConfig> {
        self.resources
            .iter()
            .find(|b| BlockKind::Resource.address(&b.block_type, &b.name) == address)
    }
}

/// Provider settings.
///
/// Every field is optional here; unset fields fall back to environment
/// variables and then to defaults when the provider is configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    /// Datadog API key.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Datadog application key.
    #[serde(default, skip_serializing)]
    pub app_key: Option<String>,
    /// API URL, for example `https://api.datadoghq.eu`.
    #[serde(default)]
    #[validate(url)]
    pub api_url: Option<String>,
    /// Check the keys against the API before doing anything.
    #[serde(default)]
    pub validate: Option<bool>,
    /// Retry 429 and 5xx responses.
    #[serde(default)]
    pub http_client_retry_enabled: Option<bool>,
    /// Total retry budget in seconds.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub http_client_retry_timeout: Option<u64>,
    /// Backoff growth factor.
    #[serde(default)]
    #[validate(range(min = 1.0))]
    pub http_client_retry_backoff_multiplier: Option<f64>,
    /// First backoff interval in seconds.
    #[serde(default)]
    #[validate(range(min = 1.0))]
    pub http_client_retry_backoff_base: Option<f64>,
    /// Retries after the first attempt.
    #[serde(default)]
    #[validate(range(min = 1, max = 5))]
    pub http_client_retry_max_retries: Option<u32>,
    /// Tags added to every taggable resource unless already present.
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// A resource or data source block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockConfig {
    /// Registered type name, such as `datadog_monitor`.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Local name, unique per type.
    pub name: String,
    /// Attribute values as written.
    #[serde(default)]
    pub attributes: Value,
    /// Extra ordering edges, as addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Whether a block is managed or read-only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// A managed resource.
    Resource,
    /// A data source.
    Data,
}

impl BlockKind {
    /// Address of a block: `type.name` or `data.type.name`.
    #[must_use]
    pub fn address(self, block_type: &str, name: &str) -> String {
        match self {
            Self::Resource => format!("{block_type}.{name}"),
            Self::Data => format!("data.{block_type}.{name}"),
        }
    }

    /// Address of `block` under this kind.
    #[must_use]
    pub fn address_of(self, block: &BlockConfig) -> String {
        self.address(&block.block_type, &block.name)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => write!(f, "resource"),
            Self::Data => write!(f, "data source"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses() {
        assert_eq!(
            BlockKind::Resource.address("datadog_monitor", "cpu"),
            "datadog_monitor.cpu"
        );
        assert_eq!(
            BlockKind::Data.address("datadog_team", "core"),
            "data.datadog_team.core"
        );
    }

    #[test]
    fn test_settings_validation() {
        let settings = ProviderSettings {
            http_client_retry_max_retries: Some(9),
            ..ProviderSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = ProviderSettings {
            api_url: Some("https://api.datadoghq.eu".to_string()),
            http_client_retry_max_retries: Some(3),
            ..ProviderSettings::default()
        };
        assert!(settings.validate().is_ok());
    }
}
