//! `datadog_integration_slack_channel`: one channel of a Slack integration
//! account. The id is `<account_name>:<channel_name>`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::error::{translate_client_error, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{Attribute, AttributeType, NestedBlock, ResourceData, Schema};
use crate::utils::ids::account_name_and_channel_name_from_id;

const SLACK_ACCOUNTS_PATH: &str = "/api/v1/integration/slack/configuration/accounts";

const DISPLAY_FLAGS: &[&str] = &["message", "notified", "snapshot", "tags"];

/// Slack integration channel.
#[derive(Debug, Default)]
pub struct SlackChannelResource {
    /// The integration rejects concurrent channel writes.
    lock: Mutex<()>,
}

fn encode(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

fn channels_path(account: &str) -> String {
    format!("{SLACK_ACCOUNTS_PATH}/{}/channels", encode(account))
}

fn channel_path(account: &str, channel: &str) -> String {
    format!("{}/{}", channels_path(account), encode(channel))
}

fn build_channel_body(data: &ResourceData) -> Value {
    let mut display = serde_json::Map::new();
    for flag in DISPLAY_FLAGS {
        let value = data.get_bool(&format!("display.0.{flag}")).unwrap_or(true);
        display.insert((*flag).to_string(), json!(value));
    }
    json!({
        "name": data.get_string("channel_name"),
        "display": display,
    })
}

/// Copies a channel response into `data`; the account comes from the id.
fn update_channel_state(data: &mut ResourceData, channel: &Value) -> Result<()> {
    let (account, _) = account_name_and_channel_name_from_id(data.id())?;
    if let Some(name) = channel.get("name") {
        data.set("channel_name", name.clone());
    }
    data.set("account_name", json!(account));

    let mut display = serde_json::Map::new();
    for flag in DISPLAY_FLAGS {
        let value = channel["display"].get(*flag).cloned().unwrap_or(json!(true));
        display.insert((*flag).to_string(), value);
    }
    data.set("display", json!([display]));
    Ok(())
}

#[async_trait]
impl Resource for SlackChannelResource {
    fn type_name(&self) -> &'static str {
        "datadog_integration_slack_channel"
    }

    fn schema(&self) -> Schema {
        let display = DISPLAY_FLAGS.iter().fold(Schema::v0(), |schema, flag| {
            let description = match *flag {
                "message" => "Show the main body of the alert event.",
                "notified" => "Show the list of @-handles in the alert event.",
                "snapshot" => "Show the alert event's snapshot image.",
                _ => "Show the scopes on which the monitor alerted.",
            };
            schema.with_attribute(
                *flag,
                Attribute::optional_bool().with_default(true).describe(description),
            )
        });

        Schema::v0()
            .describe("Resource for interacting with the Datadog Slack channel API")
            .with_attribute(
                "account_name",
                Attribute::required_string()
                    .force_new()
                    .describe("Slack account name."),
            )
            .with_attribute(
                "channel_name",
                Attribute::required_string()
                    .describe("Slack channel name."),
            )
            .with_attribute(
                "display",
                Attribute::required(AttributeType::Block(Box::new(NestedBlock {
                    min_items: 1,
                    ..NestedBlock::single(display)
                })))
                .describe("Configuration options for what is shown in an alert event message."),
            )
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let _guard = self.lock.lock().await;
        let account = data.get_string("account_name");
        let body = build_channel_body(data);
        let created: Value = meta
            .client
            .post_json(&channels_path(&account), &body)
            .await
            .map_err(|e| translate_client_error(e, "error creating slack channel"))?;

        data.set_id(format!("{account}:{}", data.get_string("channel_name")));
        info!("Created slack channel {}", data.id());
        update_channel_state(data, &created)
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let (account, channel) = account_name_and_channel_name_from_id(data.id())?;
        match meta.client.get_json::<Value>(&channel_path(&account, &channel)).await {
            Ok(found) => update_channel_state(data, &found),
            Err(e) if e.is_not_found() => {
                debug!("Slack channel {} is gone", data.id());
                data.clear_id();
                Ok(())
            }
            Err(e) => Err(translate_client_error(e, "error getting slack channel")),
        }
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let _guard = self.lock.lock().await;
        let (account, channel) = account_name_and_channel_name_from_id(data.id())?;
        let body = build_channel_body(data);
        let updated: Value = meta
            .client
            .patch_json(&channel_path(&account, &channel), &body)
            .await
            .map_err(|e| translate_client_error(e, "error updating slack channel"))?;

        // A renamed channel gets a new id.
        let name = updated
            .get("name")
            .and_then(Value::as_str)
            .map_or(channel, str::to_string);
        data.set_id(format!("{account}:{name}"));
        update_channel_state(data, &updated)
    }

    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let _guard = self.lock.lock().await;
        let (account, channel) = account_name_and_channel_name_from_id(data.id())?;
        meta.client
            .delete(&channel_path(&account, &channel))
            .await
            .map_err(|e| translate_client_error(e, "error deleting slack channel"))
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        account_name_and_channel_name_from_id(id)
            .ok()
            .map(|(account, channel)| channel_path(&account, &channel))
    }
}
