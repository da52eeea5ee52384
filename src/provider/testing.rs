//! In-memory resource used by the planner and reconciler tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{ApiError, Result};
use crate::schema::{Attribute, AttributeType, ResourceData, Schema};

use super::configure::ProviderConfiguration;
use super::resource::Resource;

/// `test_widget`: stores objects in a shared map instead of calling the API.
/// A widget named `broken` fails to create.
#[derive(Debug, Default, Clone)]
pub struct WidgetResource {
    pub objects: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl WidgetResource {
    pub fn stored(&self, id: &str) -> Option<Value> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl Resource for WidgetResource {
    fn type_name(&self) -> &'static str {
        "test_widget"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("size", Attribute::optional_int().with_default(1))
            .with_attribute("kind", Attribute::optional_string().force_new())
            .with_attribute("parent", Attribute::optional_string())
            .with_attribute("serial", Attribute::computed(AttributeType::Int))
    }

    async fn create(&self, _meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let name = data.get_string("name");
        if name == "broken" {
            return Err(ApiError::api_error(400, "widget rejected").into());
        }
        let id = format!("w-{name}");
        data.set("serial", 1);
        data.set_id(id.clone());
        self.objects
            .lock()
            .unwrap()
            .insert(id, Value::Object(data.values().clone()));
        Ok(())
    }

    async fn read(&self, _meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        match self.stored(data.id()) {
            Some(Value::Object(values)) => {
                for (key, value) in values {
                    data.set(&key, value);
                }
            }
            _ => data.clear_id(),
        }
        Ok(())
    }

    async fn update(&self, _meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let serial = data.prior("serial").and_then(Value::as_i64).unwrap_or(0);
        data.set("serial", serial + 1);
        self.objects
            .lock()
            .unwrap()
            .insert(data.id().to_string(), Value::Object(data.values().clone()));
        Ok(())
    }

    async fn delete(&self, _meta: &ProviderConfiguration, data: &mut ResourceData) -> Result<()> {
        let removed = self.objects.lock().unwrap().remove(data.id());
        match removed {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound {
                path: format!("/api/v1/widget/{}", data.id()),
            }
            .into()),
        }
    }

    fn destroy_check_path(&self, id: &str) -> Option<String> {
        Some(format!("/api/v1/widget/{id}"))
    }
}
