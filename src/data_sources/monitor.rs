//! `datadog_monitor` data source: looks up exactly one monitor by name and tags.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::form_urlencoded;

use crate::error::{translate_client_error, ConfigError, Result};
use crate::provider::{DataSource, ProviderConfiguration, Resource};
use crate::resources::{update_monitor_state, MonitorResource, MONITOR_PATH};
use crate::schema::{Attribute, AttributeType, ResourceData, Schema};

/// Monitor attributes that only steer resource behaviour.
const RESOURCE_ONLY: &[&str] = &["force_delete", "validate"];

/// Monitor lookup.
#[derive(Debug, Default)]
pub struct MonitorDataSource;

fn query_string(data: &ResourceData) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(name) = data.get_str("name_filter").filter(|s| !s.is_empty()) {
        query.append_pair("name", name);
    }
    let tags = data.get_strings("tags_filter");
    if !tags.is_empty() {
        query.append_pair("tags", &tags.join(","));
    }
    let monitor_tags = data.get_strings("monitor_tags_filter");
    if !monitor_tags.is_empty() {
        query.append_pair("monitor_tags", &monitor_tags.join(","));
    }
    query.finish()
}

#[async_trait]
impl DataSource for MonitorDataSource {
    fn type_name(&self) -> &'static str {
        "datadog_monitor"
    }

    fn schema(&self) -> Schema {
        let mut schema = Schema::v0()
            .describe("Use this data source to retrieve information about an existing monitor for use in other resources.")
            .with_attribute(
                "name_filter",
                Attribute::optional_string().describe("A monitor name to limit the search."),
            )
            .with_attribute(
                "tags_filter",
                Attribute::optional(AttributeType::string_list())
                    .describe("A list of tags to limit the search. This filters on the monitor scope."),
            )
            .with_attribute(
                "monitor_tags_filter",
                Attribute::optional(AttributeType::string_list())
                    .describe("A list of monitor tags to limit the search. This filters on the tags set on the monitor itself."),
            );

        for (name, attr) in MonitorResource.schema().attributes {
            if RESOURCE_ONLY.contains(&name.as_str()) {
                continue;
            }
            schema = schema.with_attribute(&name, Attribute::computed(attr.ty).describe(attr.description));
        }
        schema
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let query = query_string(data);
        let path = if query.is_empty() {
            MONITOR_PATH.to_string()
        } else {
            format!("{MONITOR_PATH}?{query}")
        };
        debug!("Searching monitors: {path}");

        let monitors: Vec<Value> = meta
            .client
            .get_json(&path)
            .await
            .map_err(|e| translate_client_error(e, "error querying monitors"))?;

        let monitor = match monitors.as_slice() {
            [monitor] => monitor,
            [] => {
                return Err(ConfigError::validation_general(
                    "your query returned no result, please try a less specific search criteria",
                )
                .into());
            }
            _ => {
                return Err(ConfigError::validation_general(
                    "your query returned more than one result, please try a more specific search criteria",
                )
                .into());
            }
        };

        update_monitor_state(data, monitor, &BTreeMap::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, MockTransport};
    use crate::provider::ProviderConfiguration;
    use serde_json::json;
    use std::sync::Arc;

    fn meta_returning(body: &'static str) -> ProviderConfiguration {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| {
                req.url
                    == "https://api.datadoghq.com/api/v1/monitor?name=High+CPU&tags=env%3Aprod%2Cteam%3Acore"
            })
            .times(1)
            .returning(move |_| Ok(ApiResponse::new(200, body)));
        ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com")
    }

    fn filters() -> ResourceData {
        ResourceData::new(json!({"name_filter": "High CPU", "tags_filter": ["env:prod", "team:core"]}))
    }

    #[tokio::test]
    async fn test_single_match() {
        let meta = meta_returning(
            r#"[{"id": 42, "name": "High CPU", "type": "metric alert", "query": "q", "message": "m",
                 "tags": ["b", "a"], "options": {"thresholds": {"critical": 90}}}]"#,
        );
        let mut data = filters();
        MonitorDataSource.read(&meta, &mut data).await.unwrap();
        assert_eq!(data.id(), "42");
        assert_eq!(data.get_strings("tags"), vec!["a", "b"]);
        assert_eq!(data.get_str("monitor_thresholds.0.critical"), Some("90"));
    }

    #[tokio::test]
    async fn test_no_match() {
        let meta = meta_returning("[]");
        let err = MonitorDataSource.read(&meta, &mut filters()).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("your query returned no result, please try a less specific search criteria"));
    }

    #[tokio::test]
    async fn test_many_matches() {
        let meta = meta_returning(r#"[{"id": 1}, {"id": 2}]"#);
        let err = MonitorDataSource.read(&meta, &mut filters()).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("your query returned more than one result, please try a more specific search criteria"));
    }

    #[test]
    fn test_schema_mirrors_resource() {
        let schema = MonitorDataSource.schema();
        let query = schema.attribute("query").unwrap();
        assert!(query.computed && !query.optional);
        assert!(schema.attribute("force_delete").is_none());
    }
}
