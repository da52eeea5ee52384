//! `datadog_integration_webhook`: the account-wide webhooks integration.
//!
//! The integration is a single object holding every hook, so there is no
//! server-side id: a random UUID identifies the resource in state. Every
//! attribute forces a new resource.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{translate_client_error, ConfigError, ProviderError, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{Attribute, AttributeType, NestedBlock, ResourceData, Schema};

const WEBHOOKS_PATH: &str = "/api/v1/integration/webhooks";

/// Webhooks integration.
#[derive(Debug, Default)]
pub struct WebhookResource {
    /// Create and delete replace the whole integration, so they must not interleave.
    lock: Mutex<()>,
}

/// Renders headers as sorted `key: value` lines.
#[must_use]
pub fn build_datadog_headers(headers: &Map<String, Value>) -> String {
    let sorted: BTreeMap<&String, &Value> = headers.iter().collect();
    sorted
        .into_iter()
        .map(|(key, value)| format!("{key}: {}", value.as_str().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses `key: value` lines back into a map.
///
/// # Errors
///
/// Returns a validation error for a line without `:`.
pub fn parse_datadog_headers(raw: &str) -> Result<Map<String, Value>> {
    let mut headers = Map::new();
    if raw.trim_matches([' ', '\t', '\n']).is_empty() {
        return Ok(headers);
    }
    for line in raw.split('\n') {
        let (key, value) = line.split_once(':').ok_or_else(|| {
            ProviderError::from(ConfigError::validation(
                format!("header not correctly formatted, expected ':' in '{line}'"),
                "hook.headers",
            ))
        })?;
        headers.insert(key.to_string(), json!(value.trim_start_matches(' ')));
    }
    Ok(headers)
}

fn build_hook(hook: &Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert("name".into(), hook.get("name").cloned().unwrap_or(Value::Null));
    body.insert("url".into(), hook.get("url").cloned().unwrap_or(Value::Null));
    if let Some(v) = hook.get("use_custom_payload").and_then(Value::as_bool) {
        body.insert("use_custom_payload".into(), json!(v.to_string()));
    }
    if let Some(v) = hook.get("custom_payload").and_then(Value::as_str) {
        body.insert("custom_payload".into(), json!(v));
    }
    if let Some(v) = hook.get("encode_as_form").and_then(Value::as_bool) {
        body.insert("encode_as_form".into(), json!(v.to_string()));
    }
    if let Some(headers) = hook.get("headers").and_then(Value::as_object) {
        body.insert("headers".into(), json!(build_datadog_headers(headers)));
    }
    Value::Object(body)
}

fn build_webhooks_body(data: &ResourceData) -> Value {
    let hooks: Vec<Value> = data
        .get_list("hook")
        .iter()
        .filter_map(Value::as_object)
        .map(build_hook)
        .collect();
    json!({ "hooks": hooks })
}

fn parse_bool_string(raw: &str, field: &str) -> Result<bool> {
    raw.parse::<bool>().map_err(|_| {
        ConfigError::validation(format!("{field} must be \"true\" or \"false\", got {raw:?}"), field)
            .into()
    })
}

/// Maps the API's hooks back to the `hook` block.
fn hooks_to_state(response: &Value) -> Result<Vec<Value>> {
    let hooks = response
        .get("hooks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    hooks
        .iter()
        .map(|hook| {
            let mut state = Map::new();
            state.insert("name".into(), hook.get("name").cloned().unwrap_or(Value::Null));
            state.insert("url".into(), hook.get("url").cloned().unwrap_or(Value::Null));
            if let Some(raw) = hook.get("use_custom_payload").and_then(Value::as_str).filter(|s| !s.is_empty()) {
                state.insert(
                    "use_custom_payload".into(),
                    json!(parse_bool_string(raw, "use_custom_payload")?),
                );
            }
            if let Some(payload) = hook.get("custom_payload").filter(|v| !v.is_null()) {
                state.insert("custom_payload".into(), payload.clone());
            }
            if let Some(raw) = hook.get("encode_as_form").and_then(Value::as_str).filter(|s| !s.is_empty()) {
                state.insert(
                    "encode_as_form".into(),
                    json!(parse_bool_string(raw, "encode_as_form")?),
                );
            }
            if let Some(raw) = hook.get("headers").and_then(Value::as_str) {
                state.insert("headers".into(), Value::Object(parse_datadog_headers(raw)?));
            }
            Ok(Value::Object(state))
        })
        .collect()
}

#[async_trait]
impl Resource for WebhookResource {
    fn type_name(&self) -> &'static str {
        "datadog_integration_webhook"
    }

    fn schema(&self) -> Schema {
        let hook = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("url", Attribute::required_string())
            .with_attribute("use_custom_payload", Attribute::optional_bool())
            .with_attribute("custom_payload", Attribute::optional_string())
            .with_attribute("encode_as_form", Attribute::optional_bool())
            .with_attribute("headers", Attribute::optional(AttributeType::string_map()));

        Schema::v0()
            .describe("Provides a Datadog webhooks integration resource.")
            .with_attribute(
                "hook",
                Attribute::required(AttributeType::Block(Box::new(NestedBlock {
                    min_items: 1,
                    ..NestedBlock::set(hook)
                })))
                .force_new(),
            )
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let guard = self.lock.lock().await;
        let body = build_webhooks_body(data);
        meta.client
            .post_json::<_, Value>(WEBHOOKS_PATH, &body)
            .await
            .map_err(|e| translate_client_error(e, "error creating a Webhook integration"))?;

        data.set_id(Uuid::new_v4().to_string());
        info!("Created webhooks integration {}", data.id());
        drop(guard);
        self.read(meta, data).await
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let response: Value = match meta.client.get_json(WEBHOOKS_PATH).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                debug!("Webhooks integration not found");
                data.clear_id();
                return Ok(());
            }
            Err(e) => return Err(translate_client_error(e, "error reading the Webhook integration")),
        };

        let hooks = hooks_to_state(&response)?;
        if hooks.is_empty() {
            data.clear_id();
            return Ok(());
        }
        data.set("hook", Value::Array(hooks));
        Ok(())
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        // Every attribute forces replacement; an update only refreshes.
        self.read(meta, data).await
    }

    async fn delete(&self, meta: &ProviderConfiguration, _data: &mut ResourceData) -> Result<()> {
        let _guard = self.lock.lock().await;
        meta.client
            .delete(WEBHOOKS_PATH)
            .await
            .map_err(|e| translate_client_error(e, "error deleting a Webhook integration"))
    }

    fn destroy_check_path(&self, _id: &str) -> Option<String> {
        Some(WEBHOOKS_PATH.to_string())
    }

    fn is_gone(&self, body: &Value) -> bool {
        body.get("hooks")
            .and_then(Value::as_array)
            .is_none_or(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, MockTransport};
    use std::sync::Arc;

    #[test]
    fn test_headers_sorted_lines() {
        let headers = json!({"X-B": "2", "Content-Type": "application/json", "X-A": "a:b"});
        let rendered = build_datadog_headers(headers.as_object().unwrap());
        assert_eq!(rendered, "Content-Type: application/json\nX-A: a:b\nX-B: 2");

        let parsed = parse_datadog_headers(&rendered).unwrap();
        assert_eq!(parsed["X-A"], "a:b");
        assert_eq!(parsed["Content-Type"], "application/json");
    }

    #[test]
    fn test_header_without_colon_is_rejected() {
        let err = parse_datadog_headers("Authorization Bearer x").unwrap_err();
        assert!(err
            .to_string()
            .contains("header not correctly formatted, expected ':' in 'Authorization Bearer x'"));
        assert!(parse_datadog_headers(" \n").unwrap().is_empty());
    }

    #[test]
    fn test_body_uses_string_booleans() {
        let data = ResourceData::new(json!({
            "hook": [{
                "name": "alerts",
                "url": "https://example.com/hook",
                "use_custom_payload": true,
                "custom_payload": "{\"a\": 1}",
                "encode_as_form": false,
                "headers": {"X-Token": "abc"}
            }]
        }));
        let body = build_webhooks_body(&data);
        assert_eq!(
            body,
            json!({"hooks": [{
                "name": "alerts",
                "url": "https://example.com/hook",
                "use_custom_payload": "true",
                "custom_payload": "{\"a\": 1}",
                "encode_as_form": "false",
                "headers": "X-Token: abc"
            }]})
        );
    }

    #[test]
    fn test_hooks_to_state_parses_flags() {
        let hooks = hooks_to_state(&json!({"hooks": [{
            "name": "alerts", "url": "u", "use_custom_payload": "false",
            "encode_as_form": "", "headers": "A: 1"
        }]}))
        .unwrap();
        assert_eq!(hooks[0]["use_custom_payload"], false);
        assert!(hooks[0].get("encode_as_form").is_none());
        assert_eq!(hooks[0]["headers"], json!({"A": "1"}));

        assert!(hooks_to_state(&json!({"hooks": [{"name": "x", "url": "u", "encode_as_form": "yes"}]})).is_err());
    }

    #[tokio::test]
    async fn test_create_sets_uuid_and_reads_back() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.body.as_deref().is_some_and(|b| b.contains("\"hooks\"")))
            .times(1)
            .returning(|_| Ok(ApiResponse::new(200, "{}")));
        transport
            .expect_send()
            .withf(|req| req.body.is_none())
            .times(1)
            .returning(|_| {
                Ok(ApiResponse::new(200, r#"{"hooks":[{"name":"alerts","url":"https://example.com"}]}"#))
            });
        let meta = ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com");

        let resource = WebhookResource::default();
        let mut data = ResourceData::new(json!({"hook": [{"name": "alerts", "url": "https://example.com"}]}));
        resource.create(&meta, &mut data).await.unwrap();

        assert!(Uuid::parse_str(data.id()).is_ok());
        assert_eq!(data.get_str("hook.0.name"), Some("alerts"));
    }
}
