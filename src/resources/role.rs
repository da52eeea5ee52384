//! `datadog_role`: custom roles and their permissions through the v2 Roles API.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::client::HttpMethod;
use crate::error::{translate_client_error, ApiError, ConfigError, ProviderError, Result};
use crate::provider::{ProviderConfiguration, Resource};
use crate::schema::{Attribute, AttributeType, NestedBlock, ResourceData, Schema, Validator};

const ROLES_PATH: &str = "/api/v2/roles";
const PERMISSIONS_PATH: &str = "/api/v2/permissions";

/// Datadog role.
#[derive(Debug, Default)]
pub struct RoleResource {
    /// Unrestricted permissions by id, fetched once per provider.
    permissions: OnceCell<BTreeMap<String, String>>,
}

fn role_path(id: &str) -> String {
    format!("{ROLES_PATH}/{id}")
}

fn role_permissions_path(id: &str) -> String {
    format!("{ROLES_PATH}/{id}/permissions")
}

/// Keeps the unrestricted permissions of a `/api/v2/permissions` response.
fn manageable_permissions(response: &Value) -> BTreeMap<String, String> {
    response
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|perm| perm["attributes"]["restricted"].as_bool() != Some(true))
        .filter_map(|perm| {
            let id = perm.get("id")?.as_str()?;
            let name = perm["attributes"]["name"].as_str().unwrap_or_default();
            Some((id.to_string(), name.to_string()))
        })
        .collect()
}

/// Permission ids in a `permission` block value.
fn permission_ids(value: &Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|perms| {
            perms
                .iter()
                .filter_map(|p| p.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn build_role_create_body(data: &ResourceData) -> Value {
    let permissions: Vec<Value> = permission_ids(data.get("permission").unwrap_or(&Value::Null))
        .into_iter()
        .map(|id| json!({ "type": "permissions", "id": id }))
        .collect();

    json!({
        "data": {
            "type": "roles",
            "attributes": { "name": data.get_string("name") },
            "relationships": { "permissions": { "data": permissions } }
        }
    })
}

fn build_role_update_body(data: &ResourceData) -> Value {
    json!({
        "data": {
            "type": "roles",
            "id": data.id(),
            "attributes": { "name": data.get_string("name") }
        }
    })
}

fn permission_relation(id: &str) -> Value {
    json!({ "data": { "type": "permissions", "id": id } })
}

impl RoleResource {
    async fn valid_permissions(
        &self,
        meta: &ProviderConfiguration,
    ) -> Result<&BTreeMap<String, String>> {
        self.permissions
            .get_or_try_init(|| async {
                debug!("Listing permissions");
                let response: Value = meta
                    .client
                    .get_json(PERMISSIONS_PATH)
                    .await
                    .map_err(|e| translate_client_error(e, "error listing permissions"))?;
                Ok::<_, ProviderError>(manageable_permissions(&response))
            })
            .await
    }

    /// Writes the permissions of a role response, dropping unknown ones.
    async fn set_permissions(
        &self,
        meta: &ProviderConfiguration,
        data: &mut ResourceData,
        ids: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        let known = self.valid_permissions(meta).await?;
        let perms: Vec<Value> = ids
            .into_iter()
            .filter_map(|id| known.get(&id).map(|name| json!({ "id": id, "name": name })))
            .collect();
        data.set("permission", Value::Array(perms));
        Ok(())
    }

    async fn update_state(
        &self,
        meta: &ProviderConfiguration,
        data: &mut ResourceData,
        response: &Value,
    ) -> Result<()> {
        let role = response
            .get("data")
            .ok_or_else(|| ApiError::invalid_response("role response has no data"))?;
        if let Some(id) = role.get("id").and_then(Value::as_str) {
            data.set_id(id);
        }
        let attributes = &role["attributes"];
        if let Some(name) = attributes.get("name").filter(|v| !v.is_null()) {
            data.set("name", name.clone());
        }
        if let Some(count) = attributes.get("user_count").filter(|v| !v.is_null()) {
            data.set("user_count", count.clone());
        }

        let ids = permission_ids(&role["relationships"]["permissions"]["data"]);
        self.set_permissions(meta, data, ids).await
    }
}

#[async_trait]
impl Resource for RoleResource {
    fn type_name(&self) -> &'static str {
        "datadog_role"
    }

    fn schema(&self) -> Schema {
        let permission = Schema::v0()
            .with_attribute(
                "id",
                Attribute::required_string()
                    .validate(Validator::NotEmpty)
                    .describe("ID of the permission to assign."),
            )
            .with_attribute(
                "name",
                Attribute::computed(AttributeType::String).describe("Name of the permission."),
            );

        Schema::v0()
            .describe("Provides a Datadog role resource. This can be used to create and manage Datadog roles.")
            .with_attribute("name", Attribute::required_string().describe("Name of the role."))
            .with_attribute(
                "permission",
                Attribute::optional(AttributeType::Block(Box::new(NestedBlock::set(permission))))
                    .describe("Set of objects containing the permission ID and the name of the permissions granted to this role."),
            )
            .with_attribute(
                "user_count",
                Attribute::computed(AttributeType::Int).describe("Number of users that have this role."),
            )
    }

    async fn validate_plan(&self, meta: &ProviderConfiguration, data: &ResourceData) -> Result<()> {
        let requested = permission_ids(data.get("permission").unwrap_or(&Value::Null));
        if requested.is_empty() {
            return Ok(());
        }
        let valid = self.valid_permissions(meta).await?;
        if let Some(id) = requested.iter().find(|id| !valid.contains_key(*id)) {
            return Err(ConfigError::validation(
                format!(
                    "permission with ID {id} is restricted and cannot be managed by terraform or does not exist, remove it from your configuration"
                ),
                "permission",
            )
            .into());
        }
        Ok(())
    }

    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let body = build_role_create_body(data);
        let created: Value = meta
            .client
            .post_json(ROLES_PATH, &body)
            .await
            .map_err(|e| translate_client_error(e, "error creating role"))?;
        self.update_state(meta, data, &created).await?;
        info!("Created role {}", data.id());
        Ok(())
    }

    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        match meta.client.get_json::<Value>(&role_path(data.id())).await {
            Ok(role) => self.update_state(meta, data, &role).await,
            Err(e) if e.is_not_found() => {
                data.clear_id();
                Ok(())
            }
            Err(e) => Err(translate_client_error(e, "error getting role")),
        }
    }

    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let id = data.id().to_string();

        if data.has_change("name") {
            let body = build_role_update_body(data);
            let updated: Value = meta
                .client
                .patch_json(&role_path(&id), &body)
                .await
                .map_err(|e| translate_client_error(e, "error updating role"))?;
            if let Some(name) = updated["data"]["attributes"].get("name").filter(|v| !v.is_null()) {
                data.set("name", name.clone());
            }
        }

        if data.has_change("permission") {
            let (old, new) = data.get_change("permission");
            let old = permission_ids(&old);
            let new = permission_ids(&new);
            let path = role_permissions_path(&id);

            let mut current: Option<Value> = None;
            for perm in old.difference(&new) {
                let response: Value = meta
                    .client
                    .send_raw(
                        HttpMethod::Delete,
                        &path,
                        &permission_relation(perm).to_string(),
                    )
                    .await
                    .map_err(|e| translate_client_error(e, "error removing permission from role"))?;
                current = Some(response);
            }
            for perm in new.difference(&old) {
                let response: Value = meta
                    .client
                    .post_json(&path, &permission_relation(perm))
                    .await
                    .map_err(|e| translate_client_error(e, "error adding permission to role"))?;
                current = Some(response);
            }

            // Each call answers with the role's full permission list.
            if let Some(response) = current {
                let ids = permission_ids(&response["data"]);
                self.set_permissions(meta, data, ids).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        meta.client
            .delete(&role_path(data.id()))
            .await
            .map_err(|e| translate_client_error(e, "error deleting role"))
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        Some(role_path(id))
    }
}
