//! `datadog_team` data source: one team, by id or by keyword.

use async_trait::async_trait;
use serde_json::{json, Value};
use url::form_urlencoded;

use crate::error::{translate_client_error, ApiError, ConfigError, Result};
use crate::provider::{DataSource, ProviderConfiguration};
use crate::resources::{update_team_state, TEAM_PATH};
use crate::schema::{Attribute, AttributeType, ResourceData, Schema};

const LOOKUP_KEYS: &[&str] = &["team_id", "filter_keyword"];

/// Team lookup.
#[derive(Debug, Default)]
pub struct TeamDataSource;

#[async_trait]
impl DataSource for TeamDataSource {
    fn type_name(&self) -> &'static str {
        "datadog_team"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .describe("Use this data source to retrieve information about an existing Datadog team.")
            .with_attribute(
                "team_id",
                Attribute::optional_string()
                    .also_computed()
                    .exactly_one_of(LOOKUP_KEYS)
                    .describe("The team's identifier."),
            )
            .with_attribute(
                "filter_keyword",
                Attribute::optional_string()
                    .exactly_one_of(LOOKUP_KEYS)
                    .describe("Search query. Can be team name, team handle, or email of team member."),
            )
            .with_attribute(
                "description",
                Attribute::computed(AttributeType::String).describe("Free-form markdown description/content for the team's homepage."),
            )
            .with_attribute(
                "handle",
                Attribute::computed(AttributeType::String).describe("The team's handle."),
            )
            .with_attribute(
                "link_count",
                Attribute::computed(AttributeType::Int).describe("The number of links belonging to the team."),
            )
            .with_attribute(
                "name",
                Attribute::computed(AttributeType::String).describe("The name of the team."),
            )
            .with_attribute(
                "summary",
                Attribute::computed(AttributeType::String)
                    .describe("A brief summary of the team, derived from the `description`."),
            )
            .with_attribute(
                "user_count",
                Attribute::computed(AttributeType::Int).describe("The number of users belonging to the team."),
            )
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let team = if let Some(id) = data.get_str("team_id").filter(|s| !s.is_empty()) {
            let response: Value = meta
                .client
                .get_json(&format!("{TEAM_PATH}/{id}"))
                .await
                .map_err(|e| translate_client_error(e, "error getting team"))?;
            response
                .get("data")
                .cloned()
                .ok_or_else(|| ApiError::invalid_response("team response has no data"))?
        } else if let Some(keyword) = data.get_str("filter_keyword").filter(|s| !s.is_empty()) {
            let query: String = form_urlencoded::Serializer::new(String::new())
                .append_pair("filter[keyword]", keyword)
                .finish();
            let response: Value = meta
                .client
                .get_json(&format!("{TEAM_PATH}?{query}"))
                .await
                .map_err(|e| translate_client_error(e, "error searching teams"))?;
            let mut teams = response
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            match teams.len() {
                1 => teams.remove(0),
                0 => {
                    return Err(
                        ConfigError::validation_general("filter keyword returned no result").into(),
                    );
                }
                _ => {
                    return Err(ConfigError::validation_general(
                        "filter keyword returned more than one result, use more specific search criteria",
                    )
                    .into());
                }
            }
        } else {
            return Err(ConfigError::validation_general(
                "couldn't find a team: either team_id or filter_keyword must be set",
            )
            .into());
        };

        update_team_state(data, &json!({ "data": team }))?;
        let id = data.id().to_string();
        data.set("team_id", json!(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, MockTransport};
    use std::sync::Arc;

    const TEAM: &str = r#"{"id": "abc-123", "type": "team",
        "attributes": {"name": "Core", "handle": "core", "link_count": 2, "user_count": 5, "summary": null}}"#;

    fn meta_for(url: &'static str, body: String) -> ProviderConfiguration {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(move |req| req.url == url)
            .times(1)
            .returning(move |_| Ok(ApiResponse::new(200, body.clone())));
        ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com")
    }

    #[tokio::test]
    async fn test_lookup_by_id() {
        let meta = meta_for(
            "https://api.datadoghq.com/api/v2/team/abc-123",
            format!(r#"{{"data": {TEAM}}}"#),
        );
        let mut data = ResourceData::new(json!({"team_id": "abc-123"}));
        TeamDataSource.read(&meta, &mut data).await.unwrap();
        assert_eq!(data.id(), "abc-123");
        assert_eq!(data.get_str("handle"), Some("core"));
        assert_eq!(data.get_i64("user_count"), Some(5));
    }

    #[tokio::test]
    async fn test_lookup_by_keyword() {
        let meta = meta_for(
            "https://api.datadoghq.com/api/v2/team?filter%5Bkeyword%5D=core+team",
            format!(r#"{{"data": [{TEAM}]}}"#),
        );
        let mut data = ResourceData::new(json!({"filter_keyword": "core team"}));
        TeamDataSource.read(&meta, &mut data).await.unwrap();
        assert_eq!(data.get_str("team_id"), Some("abc-123"));
        assert_eq!(data.get_str("name"), Some("Core"));
    }

    #[tokio::test]
    async fn test_keyword_must_match_one_team() {
        let meta = meta_for(
            "https://api.datadoghq.com/api/v2/team?filter%5Bkeyword%5D=c",
            format!(r#"{{"data": [{TEAM}, {TEAM}]}}"#),
        );
        let mut data = ResourceData::new(json!({"filter_keyword": "c"}));
        let err = TeamDataSource.read(&meta, &mut data).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("filter keyword returned more than one result, use more specific search criteria"));

        let meta = meta_for(
            "https://api.datadoghq.com/api/v2/team?filter%5Bkeyword%5D=zz",
            r#"{"data": []}"#.to_string(),
        );
        let mut data = ResourceData::new(json!({"filter_keyword": "zz"}));
        let err = TeamDataSource.read(&meta, &mut data).await.unwrap_err();
        assert!(err.to_string().contains("filter keyword returned no result"));
    }

    #[tokio::test]
    async fn test_lookup_needs_id_or_keyword() {
        let meta = ProviderConfiguration::unvalidated(
            Arc::new(MockTransport::new()),
            "https://api.datadoghq.com",
        );
        let mut data = ResourceData::new(json!({"filter_keyword": ""}));
        let err = TeamDataSource.read(&meta, &mut data).await.unwrap_err();
        assert!(err.to_string().contains("either team_id or filter_keyword must be set"));
    }

    #[test]
    fn test_schema_requires_exactly_one_lookup_key() {
        let schema = TeamDataSource.schema();
        assert_eq!(schema.validate(&json!({})).len(), 1);
        assert_eq!(
            schema.validate(&json!({"team_id": "abc", "filter_keyword": "core"})).len(),
            1
        );
        assert!(schema.validate(&json!({"filter_keyword": "core"})).is_empty());
    }
}
