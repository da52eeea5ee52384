//! `datadog_dashboard_json`: dashboards managed from their raw JSON definition.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::HttpMethod;
use crate::error::{translate_client_error, ApiError, ConfigError, ProviderError, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{Attribute, AttributeType, DiffSuppress, ResourceData, Schema, Validator};
use crate::utils::json::{convert_response_bytes_to_map, delete_key_in_map};
use crate::utils::retry::{retry, Deadline, RetryError};

const DASHBOARD_PATH: &str = "/api/v1/dashboard";

/// Fields the API adds to a dashboard that never belong in configuration.
const COMPUTED_FIELDS: &[&str] = &["id", "author_handle", "author_name", "created_at", "modified_at", "url"];

const CREATE_TIMEOUT: Duration = Duration::from_secs(60);
const CREATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Dashboard from a JSON definition.
#[derive(Debug, Default)]
pub struct DashboardJsonResource;

fn dashboard_path(id: &str) -> String {
    format!("{DASHBOARD_PATH}/{id}")
}

fn delete_widget_ids(widgets: &mut [Value]) {
    for widget in widgets.iter_mut().filter_map(Value::as_object_mut) {
        if let Some(Value::Object(definition)) = widget.get_mut("definition") {
            if definition.get("type").and_then(Value::as_str) == Some("group") {
                if let Some(Value::Array(children)) = definition.get_mut("widgets") {
                    delete_widget_ids(children);
                }
            }
        }
        widget.remove("id");
    }
}

/// Strips computed fields so configuration and API responses compare equal.
pub fn normalize_dashboard(dashboard: &mut Map<String, Value>) {
    for field in COMPUTED_FIELDS {
        delete_key_in_map(dashboard, &[*field]);
    }
    if let Some(Value::Array(widgets)) = dashboard.get_mut("widgets") {
        delete_widget_ids(widgets);
    }
    if dashboard.get("restricted_roles").is_some_and(Value::is_array) {
        dashboard.remove("is_read_only");
    }
    if let Some(Value::Array(notify_list)) = dashboard.get_mut("notify_list") {
        notify_list.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    }
}

/// Normalises a dashboard JSON string. Invalid JSON is returned unchanged.
#[must_use]
pub fn normalize_dashboard_json(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut map)) => {
            normalize_dashboard(&mut map);
            Value::Object(map).to_string()
        }
        _ => raw.to_string(),
    }
}

/// Dashboard list item type for a layout.
fn list_item_type(layout_type: &str) -> &'static str {
    if layout_type == "ordered" {
        "custom_timeboard"
    } else {
        "custom_screenboard"
    }
}

fn list_ids(value: Option<&Value>) -> BTreeSet<i64> {
    value
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Adds the dashboard to the configured lists and removes it from lists
/// dropped since the prior state. Failures are logged, not returned.
async fn update_dashboard_lists(
    meta: &ProviderConfiguration,
    data: &mut ResourceData,
    id: &str,
    layout_type: &str,
) {
    let desired = list_ids(data.get("dashboard_lists"));
    let previous = list_ids(data.prior("dashboard_lists"));
    let removed: BTreeSet<i64> = previous.difference(&desired).copied().collect();
    let items = json!({ "dashboards": [{ "id": id, "type": list_item_type(layout_type) }] });

    for list_id in &desired {
        let path = format!("/api/v2/dashboard/lists/manual/{list_id}/dashboards");
        if let Err(e) = meta.client.post_json::<_, Value>(&path, &items).await {
            debug!("Got error adding to dashboard list {list_id}: {e}");
        }
    }
    for list_id in &removed {
        let path = format!("/api/v2/dashboard/lists/manual/{list_id}/dashboards");
        if let Err(e) = meta.client.delete_with_body(&path, &items).await {
            debug!("Got error removing from dashboard list {list_id}: {e}");
        }
    }
    data.set("dashboard_lists_removed", json!(removed));
}

fn update_dashboard_state(data: &mut ResourceData, mut dashboard: Map<String, Value>) {
    if let Some(url) = dashboard.get("url").and_then(Value::as_str) {
        data.set("url", url);
    }
    normalize_dashboard(&mut dashboard);
    data.set("dashboard", Value::Object(dashboard).to_string());
}

/// Sends the JSON definition as is and parses the dashboard in the response.
async fn send_definition(
    meta: &ProviderConfiguration,
    method: HttpMethod,
    path: &str,
    definition: &str,
) -> Result<Map<String, Value>> {
    let response = meta.client.request(method, path, Some(definition)).await?;
    convert_response_bytes_to_map(response.body.as_bytes())
}

fn layout_type(dashboard: &Map<String, Value>) -> Result<String> {
    dashboard
        .get("layout_type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_response("error retrieving layout_type from response").into())
}

#[async_trait]
impl Resource for DashboardJsonResource {
    fn type_name(&self) -> &'static str {
        "datadog_dashboard_json"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .describe("Provides a Datadog dashboard JSON resource. This can be used to create and manage Datadog dashboards using the JSON definition.")
            .with_attribute(
                "dashboard",
                Attribute::required_string()
                    .validate(Validator::Json)
                    .suppress_diff(DiffSuppress::JsonEquivalent)
                    .describe("The JSON formatted definition of the Dashboard."),
            )
            .with_attribute(
                "url",
                Attribute::optional_string()
                    .also_computed()
                    .describe("The URL of the dashboard."),
            )
            .with_attribute(
                "dashboard_lists",
                Attribute::optional(AttributeType::Set(Box::new(AttributeType::Int)))
                    .describe("The list of dashboard lists this dashboard belongs to."),
            )
            .with_attribute(
                "dashboard_lists_removed",
                Attribute::computed(AttributeType::Set(Box::new(AttributeType::Int)))
                    .describe("The list of dashboard lists this dashboard should be removed from. Internal only."),
            )
    }

    fn normalize_config(&self, config: &mut Value) {
        if let Some(raw) = config.get("dashboard").and_then(Value::as_str) {
            let normalized = normalize_dashboard_json(raw);
            config["dashboard"] = Value::String(normalized);
        }
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let definition = data.get_string("dashboard");
        let created = send_definition(meta, HttpMethod::Post, DASHBOARD_PATH, &definition)
            .await
            .map_err(|e| translate_client_error(e, "error creating resource"))?;

        let id = created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::invalid_response("error retrieving id from response"))?;
        data.set_id(&id);
        let layout = layout_type(&created)?;

        // New dashboards take a moment to become readable.
        let path = dashboard_path(&id);
        let path = &path;
        retry(Deadline::Timeout(CREATE_TIMEOUT), CREATE_POLL_INTERVAL, || async move {
            match meta.client.get(path).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => Err(RetryError::Retryable(
                    ApiError::invalid_response("dashboard not created yet").into(),
                )),
                Err(e) => Err(RetryError::Fatal(e)),
            }
        })
        .await?;

        update_dashboard_lists(meta, data, &id, &layout).await;
        info!("Created dashboard {id}");
        update_dashboard_state(data, created);
        Ok(())
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        match meta.client.get(&dashboard_path(data.id())).await {
            Ok(response) => {
                let dashboard = convert_response_bytes_to_map(response.body.as_bytes())?;
                update_dashboard_state(data, dashboard);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                data.clear_id();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let id = data.id().to_string();
        let definition = data.get_string("dashboard");
        let updated = send_definition(meta, HttpMethod::Put, &dashboard_path(&id), &definition)
            .await
            .map_err(|e| translate_client_error(e, "error updating dashboard"))?;
        let layout = layout_type(&updated)?;

        update_dashboard_lists(meta, data, &id, &layout).await;
        update_dashboard_state(data, updated);
        Ok(())
    }

    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        meta.client
            .delete(&dashboard_path(data.id()))
            .await
            .map_err(|e| translate_client_error(e, "error deleting dashboard"))
    }

    async fn validate_plan(&self, _meta: &ProviderConfiguration, data: &ResourceData) -> Result<()> {
        let raw = data.get_string("dashboard");
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(_)) => Ok(()),
            _ => Err(ProviderError::from(ConfigError::validation(
                "dashboard must be a JSON object",
                "dashboard",
            ))),
        }
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        Some(dashboard_path(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, MockTransport};
    use std::sync::Arc;

    #[test]
    fn test_normalize_removes_computed_fields() {
        let raw = json!({
            "id": "abc-def-ghi",
            "title": "Ops",
            "layout_type": "ordered",
            "author_handle": "me@example.com",
            "url": "/dashboard/abc-def-ghi/ops",
            "restricted_roles": ["r1"],
            "is_read_only": false,
            "notify_list": ["b@example.com", "a@example.com"],
            "widgets": [
                {"id": 1, "definition": {"type": "note", "content": "x"}},
                {"id": 2, "definition": {"type": "group", "widgets": [
                    {"id": 3, "definition": {"type": "note", "content": "y"}}
                ]}}
            ]
        })
        .to_string();

        let normalized: Value = serde_json::from_str(&normalize_dashboard_json(&raw)).unwrap();
        assert_eq!(
            normalized,
            json!({
                "title": "Ops",
                "layout_type": "ordered",
                "restricted_roles": ["r1"],
                "notify_list": ["a@example.com", "b@example.com"],
                "widgets": [
                    {"definition": {"type": "note", "content": "x"}},
                    {"definition": {"type": "group", "widgets": [
                        {"definition": {"type": "note", "content": "y"}}
                    ]}}
                ]
            })
        );
        assert_eq!(normalize_dashboard_json("not json"), "not json");
    }

    #[test]
    fn test_list_item_type() {
        assert_eq!(list_item_type("ordered"), "custom_timeboard");
        assert_eq!(list_item_type("free"), "custom_screenboard");
    }

    #[test]
    fn test_normalized_config_matches_state() {
        let mut config = json!({"dashboard": r#"{"id":"x","title":"T","layout_type":"free","widgets":[]}"#});
        DashboardJsonResource.normalize_config(&mut config);
        let schema = DashboardJsonResource.schema();
        let changes = schema.diff(
            &json!({"dashboard": r#"{"layout_type":"free","title":"T","widgets":[]}"#, "url": "/dashboard/x"}),
            &config,
        );
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_create_polls_until_visible() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(ApiResponse::new(
                    200,
                    r#"{"id":"abc","title":"T","layout_type":"ordered","url":"/dashboard/abc/t","widgets":[]}"#,
                ))
            });
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ApiResponse::new(404, "")));
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ApiResponse::new(200, r#"{"id":"abc"}"#)));
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");

        let mut data = ResourceData::new(json!({
            "dashboard": r#"{"title":"T","layout_type":"ordered","widgets":[]}"#
        }));
        DashboardJsonResource.create(&meta, &mut data).await.unwrap();

        assert_eq!(data.id(), "abc");
        assert_eq!(data.get_str("url"), Some("/dashboard/abc/t"));
        let stored: Value = serde_json::from_str(data.get_str("dashboard").unwrap()).unwrap();
        assert!(stored.get("id").is_none());
    }
}
