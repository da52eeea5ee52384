//! The resource and data source contracts.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ApiError, ProviderError, Result};
use crate::schema::{ResourceData, Schema};

use super::configure::ProviderConfiguration;

/// A managed Datadog object type.
///
/// Implementations marshal [`ResourceData`] into API bodies, call the
/// Datadog API through `meta.client`, and write the response back.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Registered type name, such as `datadog_monitor`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Creates the object and sets the id.
    async fn create(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()>;

    /// Refreshes `data` from the API. Clears the id when the object is gone.
    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()>;

    /// Applies changed attributes.
    async fn update(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()>;

    /// Deletes the object.
    async fn delete(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()>;

    /// Imports an existing object by id. The default passes the id through
    /// and reads the object.
    async fn import(&self, meta: &ProviderConfiguration, id: &str) -> Result<ResourceData> {
        let mut data = ResourceData::for_import(id);
        self.read(meta, &mut data).await?;
        if data.id().is_empty() {
            return Err(ApiError::NotFound {
                path: format!("{} {id}", self.type_name()),
            }
            .into());
        }
        Ok(data)
    }

    /// Rewrites prepared configuration into the form stored in state, before
    /// it is diffed or sent.
    fn normalize_config(&self, _config: &mut Value) {}

    /// Plan-time check against the API, run before create and update.
    async fn validate_plan(&self, _meta: &ProviderConfiguration, _data: &ResourceData) -> Result<()> {
        Ok(())
    }

    /// Path polled by the destroy check; `None` skips the check.
    fn destroy_check_path(&self, _id: &str) -> Option<String> {
        None
    }

    /// True when a successful read body still means the object is gone
    /// (soft deletes such as cancelled downtimes).
    fn is_gone(&self, _body: &Value) -> bool {
        false
    }

    /// True when a failed destroy check read means the object is gone.
    fn is_gone_error(&self, err: &ProviderError) -> bool {
        err.is_not_found()
    }
}

/// A read-only lookup.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Registered type name, such as `datadog_ip_ranges`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Queries the API and fills `data`, including the id.
    async fn read(&self, meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()>;
}
