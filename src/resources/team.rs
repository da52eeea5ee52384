//! `datadog_team`: teams through the v2 Teams API.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{translate_client_error, ApiError, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{Attribute, AttributeType, ResourceData, Schema};

pub(crate) const TEAM_PATH: &str = "/api/v2/team";

/// Datadog team.
#[derive(Debug, Default)]
pub struct TeamResource;

fn team_path(id: &str) -> String {
    format!("{TEAM_PATH}/{id}")
}

/// Builds the create or update body.
fn build_team_body(data: &ResourceData) -> Value {
    let mut attributes = serde_json::Map::new();
    if let Some(description) = data.get_str("description") {
        attributes.insert("description".into(), json!(description));
    }
    attributes.insert("handle".into(), json!(data.get_string("handle")));
    attributes.insert("name".into(), json!(data.get_string("name")));

    json!({
        "data": {
            "type": "team",
            "attributes": attributes,
        }
    })
}

/// Copies a team response into `data`.
pub(crate) fn update_team_state(data: &mut ResourceData, response: &Value) -> Result<()> {
    let team = response
        .get("data")
        .ok_or_else(|| ApiError::invalid_response("team response has no data"))?;
    if let Some(id) = team.get("id").and_then(Value::as_str) {
        data.set_id(id);
    }

    let attributes = &team["attributes"];
    if let Some(description) = attributes.get("description").filter(|v| !v.is_null()) {
        data.set("description", description.clone());
    }
    if let Some(handle) = attributes.get("handle") {
        data.set("handle", handle.clone());
    }
    if let Some(count) = attributes.get("link_count") {
        data.set("link_count", count.clone());
    }
    if let Some(name) = attributes.get("name") {
        data.set("name", name.clone());
    }
    data.set(
        "summary",
        attributes.get("summary").cloned().unwrap_or(Value::Null),
    );
    if let Some(count) = attributes.get("user_count") {
        data.set("user_count", count.clone());
    }
    Ok(())
}

#[async_trait]
impl Resource for TeamResource {
    fn type_name(&self) -> &'static str {
        "datadog_team"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .describe("Provides a Datadog Team resource. This can be used to create and manage Datadog team.")
            .with_attribute(
                "description",
                Attribute::required_string()
                    .describe("Free-form markdown description/content for the team's homepage."),
            )
            .with_attribute(
                "handle",
                Attribute::required_string().describe("The team's identifier"),
            )
            .with_attribute(
                "link_count",
                Attribute::computed(AttributeType::Int)
                    .describe("The number of links belonging to the team."),
            )
            .with_attribute(
                "summary",
                Attribute::computed(AttributeType::String)
                    .describe("A brief summary of the team, derived from the `description`."),
            )
            .with_attribute(
                "user_count",
                Attribute::computed(AttributeType::Int)
                    .describe("The number of users belonging to the team."),
            )
            .with_attribute(
                "name",
                Attribute::required_string().describe("The name of the team."),
            )
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let body = build_team_body(data);
        let response: Value = meta
            .client
            .post_json(TEAM_PATH, &body)
            .await
            .map_err(|e| translate_client_error(e, "error creating team"))?;
        update_team_state(data, &response)?;
        info!("Created team {}", data.id());
        Ok(())
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        match meta.client.get_json::<Value>(&team_path(data.id())).await {
            Ok(response) => update_team_state(data, &response),
            Err(e) if e.is_not_found() => {
                debug!("Team {} is gone", data.id());
                data.clear_id();
                Ok(())
            }
            Err(e) => Err(translate_client_error(e, "error retrieving Team")),
        }
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let body = build_team_body(data);
        let response: Value = meta
            .client
            .patch_json(&team_path(data.id()), &body)
            .await
            .map_err(|e| translate_client_error(e, "error updating team"))?;
        update_team_state(data, &response)
    }

    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        match meta.client.delete(&team_path(data.id())).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(translate_client_error(e, "error deleting team")),
        }
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        Some(team_path(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_body() {
        let data = ResourceData::new(json!({
            "name": "Core",
            "handle": "core",
            "description": "Core team"
        }));
        assert_eq!(
            build_team_body(&data),
            json!({
                "data": {
                    "type": "team",
                    "attributes": {"description": "Core team", "handle": "core", "name": "Core"}
                }
            })
        );
    }

    #[test]
    fn test_update_state_maps_computed() {
        let mut data = ResourceData::new(json!({"name": "Core", "handle": "core"}));
        let response = json!({
            "data": {
                "id": "9c7a-11",
                "type": "team",
                "attributes": {
                    "description": "Core team",
                    "handle": "core",
                    "name": "Core",
                    "link_count": 2,
                    "summary": null,
                    "user_count": 5
                }
            }
        });
        update_team_state(&mut data, &response).unwrap();
        assert_eq!(data.id(), "9c7a-11");
        assert_eq!(data.get_i64("user_count"), Some(5));
        assert_eq!(data.get_i64("link_count"), Some(2));
        assert!(data.get("summary").is_none());
    }

    #[test]
    fn test_update_state_requires_data() {
        let mut data = ResourceData::new(json!({}));
        assert!(update_team_state(&mut data, &json!({"errors": []})).is_err());
    }
}
