//! Registry of resource and data source types.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::BlockKind;
use crate::data_sources;
use crate::resources;
use crate::schema::{Attribute, AttributeType, Schema, Validator};

use super::resource::{DataSource, Resource};

/// The provider: its own settings schema plus every registered type.
#[derive(Clone, Default)]
pub struct Provider {
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DataSource>>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Provider {
    /// Creates a provider with every built-in type registered.
    #[must_use]
    pub fn new() -> Self {
        let mut provider = Self::default();
        provider.register_resource(Arc::new(resources::MonitorResource));
        provider.register_resource(Arc::new(resources::DowntimeResource));
        provider.register_resource(Arc::new(resources::TeamResource));
        provider.register_resource(Arc::new(resources::WebhookResource::default()));
        provider.register_resource(Arc::new(resources::DashboardJsonResource));
        provider.register_resource(Arc::new(resources::RoleResource::default()));
        provider.register_resource(Arc::new(resources::SlackChannelResource::default()));
        provider.register_resource(Arc::new(resources::LogsCustomPipelineResource::default()));
        provider.register_resource(Arc::new(resources::SecurityMonitoringRuleResource));
        provider.register_data_source(Arc::new(data_sources::IpRangesDataSource));
        provider.register_data_source(Arc::new(data_sources::MonitorDataSource));
        provider.register_data_source(Arc::new(data_sources::SecurityMonitoringRulesDataSource));
        provider.register_data_source(Arc::new(data_sources::TeamDataSource));
        provider
    }

    /// Registers a resource type, replacing any with the same name.
    pub fn register_resource(&mut self, resource: Arc<dyn Resource>) {
        self.resources.insert(resource.type_name(), resource);
    }

    /// Registers a data source type, replacing any with the same name.
    pub fn register_data_source(&mut self, data_source: Arc<dyn DataSource>) {
        self.data_sources.insert(data_source.type_name(), data_source);
    }

    /// Looks up a resource type.
    #[must_use]
    pub fn resource(&self, type_name: &str) -> Option<Arc<dyn Resource>> {
        self.resources.get(type_name).cloned()
    }

    /// Looks up a data source type.
    #[must_use]
    pub fn data_source(&self, type_name: &str) -> Option<Arc<dyn DataSource>> {
        self.data_sources.get(type_name).cloned()
    }

    /// Registered resource type names, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<&'static str> {
        self.resources.keys().copied().collect()
    }

    /// Registered data source type names, sorted.
    #[must_use]
    pub fn data_source_types(&self) -> Vec<&'static str> {
        self.data_sources.keys().copied().collect()
    }

    /// Schema of a block type, if registered.
    #[must_use]
    pub fn schema_for(&self, kind: BlockKind, type_name: &str) -> Option<Schema> {
        match kind {
            BlockKind::Resource => self.resource(type_name).map(|r| r.schema()),
            BlockKind::Data => self.data_source(type_name).map(|d| d.schema()),
        }
    }

    /// Schema of the provider block itself.
    #[must_use]
    pub fn provider_schema() -> Schema {
        Schema::v0()
            .describe("Datadog provider settings")
            .with_attribute(
                "api_key",
                Attribute::optional_string()
                    .sensitive()
                    .describe("Datadog API key. Also read from DD_API_KEY or DATADOG_API_KEY."),
            )
            .with_attribute(
                "app_key",
                Attribute::optional_string()
                    .sensitive()
                    .describe("Datadog application key. Also read from DD_APP_KEY or DATADOG_APP_KEY."),
            )
            .with_attribute(
                "api_url",
                Attribute::optional_string()
                    .describe("API URL. Also read from DD_HOST or DATADOG_HOST."),
            )
            .with_attribute(
                "validate",
                Attribute::optional_bool()
                    .describe("Check the keys on startup. Defaults to true."),
            )
            .with_attribute(
                "http_client_retry_enabled",
                Attribute::optional_bool().describe("Retry 429 and 5xx responses. Defaults to true."),
            )
            .with_attribute(
                "http_client_retry_timeout",
                Attribute::optional_int()
                    .validate(Validator::IntAtLeast(1))
                    .describe("Retry budget in seconds. Defaults to 60."),
            )
            .with_attribute(
                "http_client_retry_backoff_multiplier",
                Attribute::optional(AttributeType::Float)
                    .describe("Backoff growth factor. Defaults to 2."),
            )
            .with_attribute(
                "http_client_retry_backoff_base",
                Attribute::optional(AttributeType::Float)
                    .describe("First backoff in seconds. Defaults to 2."),
            )
            .with_attribute(
                "http_client_retry_max_retries",
                Attribute::optional_int()
                    .validate(Validator::IntBetween(1, 5))
                    .describe("Retries after the first attempt. Defaults to 3."),
            )
            .with_attribute(
                "default_tags",
                Attribute::optional(AttributeType::string_map())
                    .describe("Tags added to taggable resources unless already set."),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types_registered() {
        let provider = Provider::new();
        assert_eq!(
            provider.resource_types(),
            vec![
                "datadog_dashboard_json",
                "datadog_downtime",
                "datadog_integration_slack_channel",
                "datadog_integration_webhook",
                "datadog_logs_custom_pipeline",
                "datadog_monitor",
                "datadog_role",
                "datadog_security_monitoring_rule",
                "datadog_team",
            ]
        );
        assert_eq!(
            provider.data_source_types(),
            vec![
                "datadog_ip_ranges",
                "datadog_monitor",
                "datadog_security_monitoring_rules",
                "datadog_team"
            ]
        );
        assert!(provider.resource("datadog_nope").is_none());
    }

    #[test]
    fn test_schema_lookup_by_kind() {
        let provider = Provider::new();
        let schema = provider.schema_for(BlockKind::Data, "datadog_ip_ranges").unwrap();
        assert!(schema.attribute("agents_ipv4").is_some());
        assert!(provider.schema_for(BlockKind::Resource, "datadog_ip_ranges").is_none());
    }

    #[test]
    fn test_provider_schema_marks_keys_sensitive() {
        let schema = Provider::provider_schema();
        assert_eq!(schema.sensitive_attributes(), vec!["api_key", "app_key"]);
    }
}
