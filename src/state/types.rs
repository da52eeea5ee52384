//! State types.
//!
//! The state records, per address, the object id and the attributes last
//! read from Datadog. It is what plans diff against and what references
//! resolve from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::config::{address_kind, BlockKind};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// History entries kept in state.
pub const MAX_HISTORY: usize = 100;

/// Everything the provider knows about managed objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderState {
    /// State format version.
    pub version: String,
    /// Incremented on every save of changed state.
    pub serial: u64,
    /// Random id fixed when the state is created.
    pub lineage: String,
    /// Managed resources by address.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Data source results by address.
    #[serde(default)]
    pub data_sources: BTreeMap<String, ResourceState>,
    /// When the state last changed.
    pub last_updated: DateTime<Utc>,
    /// Recent operations, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// One object in state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// Registered type name.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Local name from the workspace.
    pub name: String,
    /// Datadog id.
    pub id: String,
    /// Attribute values, a JSON object.
    pub attributes: Value,
    /// Hash of the block configuration that produced this state.
    #[serde(default)]
    pub config_hash: String,
    /// Addresses this object depended on when it was written, used to
    /// order deletes once its block is gone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// First recorded.
    pub created_at: DateTime<Utc>,
    /// Last written.
    pub updated_at: DateTime<Utc>,
}

/// A recorded operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When it ran.
    pub timestamp: DateTime<Utc>,
    /// What ran.
    pub operation: Operation,
    /// Addresses touched.
    pub addresses: Vec<String>,
    /// Whether every step succeeded.
    pub success: bool,
    /// First error, when it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Operations recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Plan executed.
    Apply,
    /// Everything deleted.
    Destroy,
    /// State re-read from the API.
    Refresh,
    /// Existing object adopted.
    Import,
    /// Address dropped from state without touching the API.
    Remove,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderState {
    /// An empty state with a fresh lineage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            serial: 0,
            lineage: Uuid::new_v4().to_string(),
            resources: BTreeMap::new(),
            data_sources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Looks up a resource or data source by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&ResourceState> {
        match address_kind(address) {
            BlockKind::Resource => self.resources.get(address),
            BlockKind::Data => self.data_sources.get(address),
        }
    }

    /// Reads `attribute` of the object at `address`; `id` is the object id.
    #[must_use]
    pub fn attribute(&self, address: &str, attribute: &str) -> Option<Value> {
        let object = self.get(address)?;
        if attribute == "id" {
            return Some(Value::String(object.id.clone()));
        }
        let mut current = &object.attributes;
        for part in attribute.split('.') {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        (!current.is_null()).then(|| current.clone())
    }

    /// Stores an object under `address`, keeping its creation time.
    pub fn insert(&mut self, address: &str, mut object: ResourceState) {
        let map = match address_kind(address) {
            BlockKind::Resource => &mut self.resources,
            BlockKind::Data => &mut self.data_sources,
        };
        if let Some(existing) = map.get(address) {
            object.created_at = existing.created_at;
        }
        map.insert(address.to_string(), object);
        self.last_updated = Utc::now();
    }

    /// Drops `address` from state.
    pub fn remove(&mut self, address: &str) -> Option<ResourceState> {
        let removed = match address_kind(address) {
            BlockKind::Resource => self.resources.remove(address),
            BlockKind::Data => self.data_sources.remove(address),
        };
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Every tracked address, resources then data sources.
    #[must_use]
    pub fn addresses(&self) -> Vec<&str> {
        self.resources
            .keys()
            .chain(self.data_sources.keys())
            .map(String::as_str)
            .collect()
    }

    /// Marks the state as changed before a save.
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    /// Appends a history entry, dropping the oldest past [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }
}

impl ResourceState {
    /// A fresh state entry.
    #[must_use]
    pub fn new(resource_type: &str, name: &str, id: &str, attributes: Value) -> Self {
        let now = Utc::now();
        Self {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            id: id.to_string(),
            attributes,
            config_hash: String::new(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the configuration hash.
    #[must_use]
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Sets the recorded dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

impl HistoryEntry {
    /// A successful entry.
    #[must_use]
    pub fn new(operation: Operation, addresses: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            addresses,
            success: true,
            error: None,
        }
    }

    /// A failed entry.
    #[must_use]
    pub fn failed(operation: Operation, addresses: Vec<String>, error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, addresses)
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
            Self::Import => "import",
            Self::Remove => "remove",
        };
        write!(f, "{op}")
    }
}
