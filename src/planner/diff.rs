//! Diff engine for comparing the workspace with state.
//!
//! Each block is prepared through its schema (defaults, coercion,
//! normalisation), references that state can already answer are resolved,
//! and the result is compared attribute by attribute with what state holds.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::config::{
    dependency_graph, has_references, topological_order, BlockConfig, BlockKind, ConfigHasher,
    Reference, WorkspaceConfig,
};
use crate::error::{ConfigError, Result};
use crate::provider::Provider;
use crate::schema::{is_zero, AttributeChange, Schema};
use crate::state::ProviderState;

/// Shown for values that depend on objects not created yet.
pub const KNOWN_AFTER_APPLY: &str = "(known after apply)";

/// Shown instead of sensitive values.
pub const SENSITIVE: &str = "(sensitive)";

/// Engine for computing diffs between the workspace and state.
#[derive(Debug)]
pub struct DiffEngine<'a> {
    provider: &'a Provider,
    hasher: ConfigHasher,
}

/// Difference for a single address.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Block address.
    pub address: String,
    /// Managed resource or data source.
    pub kind: BlockKind,
    /// Registered type name.
    pub block_type: String,
    /// Local name.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Attribute level differences.
    pub details: Vec<DiffDetail>,
    /// Object id from state.
    pub id: Option<String>,
    /// Prepared desired configuration; `None` for deletes.
    pub config: Option<Value>,
    /// Addresses this block depends on.
    pub dependencies: Vec<String>,
    /// Hash of the block configuration.
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Not in state yet.
    Create,
    /// Changed in place.
    Update,
    /// A `force_new` attribute changed.
    Replace,
    /// In state but gone from the workspace.
    Delete,
    /// Up to date.
    NoChange,
    /// Data source, read on every run.
    Read,
}

/// One attribute that differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Attribute name.
    pub field: String,
    /// Value in state.
    pub old_value: Option<String>,
    /// Desired value.
    pub new_value: Option<String>,
    /// Changing it replaces the object.
    pub force_new: bool,
}

/// Complete diff result, in dependency order with deletes last.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// All diffs.
    pub diffs: Vec<ResourceDiff>,
    /// Objects to create.
    pub creates: usize,
    /// Objects to update in place.
    pub updates: usize,
    /// Objects to replace.
    pub replaces: usize,
    /// Objects to delete.
    pub deletes: usize,
    /// Unchanged objects.
    pub unchanged: usize,
    /// Data sources to read.
    pub reads: usize,
}

/// Renders a value for plan output.
#[must_use]
pub fn display_value(value: &Value, sensitive: bool) -> Option<String> {
    if value.is_null() {
        return None;
    }
    if sensitive {
        return Some(SENSITIVE.to_string());
    }
    if has_references(value) {
        return Some(KNOWN_AFTER_APPLY.to_string());
    }
    Some(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Replaces references `lookup` can answer and leaves the others in place.
pub fn resolve_known<F>(value: &mut Value, lookup: &F)
where
    F: Fn(&Reference) -> Option<Value>,
{
    if let Some(reference) = value.as_str().and_then(Reference::parse) {
        if let Some(resolved) = lookup(&reference) {
            *value = resolved;
        }
        return;
    }
    match value {
        Value::Array(items) => items.iter_mut().for_each(|v| resolve_known(v, lookup)),
        Value::Object(map) => map.values_mut().for_each(|v| resolve_known(v, lookup)),
        _ => {}
    }
}

impl From<AttributeChange> for DiffDetail {
    fn from(change: AttributeChange) -> Self {
        Self {
            old_value: display_value(&change.old, change.sensitive),
            new_value: display_value(&change.new, change.sensitive),
            field: change.name,
            force_new: change.force_new,
        }
    }
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine over the registered types.
    #[must_use]
    pub const fn new(provider: &'a Provider) -> Self {
        Self {
            provider,
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between the workspace and state.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown block types and dependency cycles.
    pub fn compute_diff(&self, config: &WorkspaceConfig, state: &ProviderState) -> Result<DiffResult> {
        let graph = dependency_graph(config);
        let order = topological_order(&graph)?;
        let blocks: BTreeMap<String, (BlockKind, &BlockConfig)> = config
            .blocks()
            .map(|(kind, block)| (kind.address_of(block), (kind, block)))
            .collect();

        let mut result = DiffResult::default();
        // Addresses whose attributes will only be known after apply.
        let mut pending: HashSet<String> = HashSet::new();

        for address in &order {
            let Some((kind, block)) = blocks.get(address) else {
                continue;
            };
            let dependencies: Vec<String> = graph
                .get(address)
                .map(|deps| deps.iter().cloned().collect())
                .unwrap_or_default();

            let lookup = |r: &Reference| {
                if pending.contains(&r.address) {
                    None
                } else {
                    state.attribute(&r.address, &r.attribute)
                }
            };

            let diff = match kind {
                BlockKind::Data => self.diff_data_source(address, block, &lookup)?,
                BlockKind::Resource => self.diff_resource(address, block, state, &lookup)?,
            };
            if matches!(diff.diff_type, DiffType::Create | DiffType::Replace) {
                pending.insert(address.clone());
            }
            result.push(ResourceDiff { dependencies, ..diff });
        }

        let stale = state
            .resources
            .iter()
            .chain(&state.data_sources)
            .filter(|(address, _)| !blocks.contains_key(*address));
        for (address, object) in stale {
            debug!("{address} is no longer in the workspace");
            result.push(ResourceDiff {
                address: address.clone(),
                kind: crate::config::address_kind(address),
                block_type: object.resource_type.clone(),
                name: object.name.clone(),
                diff_type: DiffType::Delete,
                details: Vec::new(),
                id: Some(object.id.clone()),
                config: None,
                dependencies: object.dependencies.clone(),
                new_hash: None,
            });
        }

        Ok(result)
    }

    fn diff_data_source<F>(&self, address: &str, block: &BlockConfig, lookup: &F) -> Result<ResourceDiff>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        let data_source = self.provider.data_source(&block.block_type).ok_or_else(|| {
            ConfigError::UnknownType {
                block_kind: BlockKind::Data.to_string(),
                type_name: block.block_type.clone(),
            }
        })?;
        let mut desired = block.attributes.clone();
        resolve_known(&mut desired, lookup);
        data_source.schema().prepare(&mut desired);

        Ok(ResourceDiff {
            address: address.to_string(),
            kind: BlockKind::Data,
            block_type: block.block_type.clone(),
            name: block.name.clone(),
            diff_type: DiffType::Read,
            details: Vec::new(),
            id: None,
            config: Some(desired),
            dependencies: Vec::new(),
            new_hash: Some(self.hasher.hash_block(block)),
        })
    }

    fn diff_resource<F>(
        &self,
        address: &str,
        block: &BlockConfig,
        state: &ProviderState,
        lookup: &F,
    ) -> Result<ResourceDiff>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        let resource = self.provider.resource(&block.block_type).ok_or_else(|| {
            ConfigError::UnknownType {
                block_kind: BlockKind::Resource.to_string(),
                type_name: block.block_type.clone(),
            }
        })?;
        let schema = resource.schema();
        let mut desired = block.attributes.clone();
        resolve_known(&mut desired, lookup);
        schema.prepare(&mut desired);
        resource.normalize_config(&mut desired);

        let existing = state.resources.get(address);
        let (diff_type, details) = match existing {
            None => {
                debug!("{address} needs to be created");
                (DiffType::Create, creation_details(&schema, &desired))
            }
            Some(object) => {
                let details: Vec<DiffDetail> = schema
                    .diff(&object.attributes, &desired)
                    .into_iter()
                    .map(DiffDetail::from)
                    .collect();
                let diff_type = if details.is_empty() {
                    DiffType::NoChange
                } else if details.iter().any(|d| d.force_new) {
                    DiffType::Replace
                } else {
                    DiffType::Update
                };
                debug!("{address}: {diff_type}");
                (diff_type, details)
            }
        };

        Ok(ResourceDiff {
            address: address.to_string(),
            kind: BlockKind::Resource,
            block_type: block.block_type.clone(),
            name: block.name.clone(),
            diff_type,
            details,
            id: existing.map(|o| o.id.clone()),
            config: Some(desired),
            dependencies: Vec::new(),
            new_hash: Some(self.hasher.hash_block(block)),
        })
    }
}

fn creation_details(schema: &Schema, desired: &Value) -> Vec<DiffDetail> {
    schema
        .attributes
        .iter()
        .filter_map(|(name, attr)| {
            let value = desired.get(name).filter(|v| !is_zero(v))?;
            Some(DiffDetail {
                field: name.clone(),
                old_value: None,
                new_value: display_value(value, attr.sensitive),
                force_new: false,
            })
        })
        .collect()
}

impl DiffResult {
    fn push(&mut self, diff: ResourceDiff) {
        match diff.diff_type {
            DiffType::Create => self.creates += 1,
            DiffType::Update => self.updates += 1,
            DiffType::Replace => self.replaces += 1,
            DiffType::Delete => self.deletes += 1,
            DiffType::NoChange => self.unchanged += 1,
            DiffType::Read => self.reads += 1,
        }
        self.diffs.push(diff);
    }

    /// True when any managed object changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Number of objects created, updated, replaced or deleted.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Diffs that require an action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }

    /// Looks up the diff of an address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.address == address)
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
            Self::Read => "read",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.address, self.diff_type)?;
        if !self.details.is_empty() {
            let fields: Vec<&str> = self.details.iter().map(|d| d.field.as_str()).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use serde_json::json;

    fn workspace(yaml: &str) -> WorkspaceConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const TEAM_AND_MONITOR: &str = r#"
resources:
  - type: datadog_monitor
    name: cpu
    attributes:
      name: High CPU
      type: metric alert
      query: "avg(last_5m):avg:system.cpu.user{*} > 90"
      message: "CPU is high"
      monitor_thresholds: { critical: 90 }
  - type: datadog_downtime
    name: maintenance
    attributes:
      scope: ["*"]
      monitor_id: "${datadog_monitor.cpu.id}"
"#;

    #[test]
    fn test_creates_in_dependency_order() {
        let provider = Provider::new();
        let config = workspace(TEAM_AND_MONITOR);
        let diff = DiffEngine::new(&provider)
            .compute_diff(&config, &ProviderState::new())
            .unwrap();

        assert_eq!(diff.creates, 2);
        let order: Vec<&str> = diff.diffs.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(order, vec!["datadog_monitor.cpu", "datadog_downtime.maintenance"]);

        let downtime = diff.get("datadog_downtime.maintenance").unwrap();
        assert_eq!(downtime.dependencies, vec!["datadog_monitor.cpu"]);
        let monitor_id = downtime.details.iter().find(|d| d.field == "monitor_id").unwrap();
        assert_eq!(monitor_id.new_value.as_deref(), Some(KNOWN_AFTER_APPLY));

        let monitor = diff.get("datadog_monitor.cpu").unwrap();
        let config = monitor.config.as_ref().unwrap();
        assert_eq!(config["monitor_thresholds"][0]["critical"], "90");
    }

    #[test]
    fn test_no_change_update_and_replace() {
        let provider = Provider::new();
        let config = workspace(TEAM_AND_MONITOR);
        let engine = DiffEngine::new(&provider);

        let first = engine.compute_diff(&config, &ProviderState::new()).unwrap();
        let mut state = ProviderState::new();
        for d in &first.diffs {
            let mut attributes = d.config.clone().unwrap();
            resolve_known(&mut attributes, &|_: &Reference| Some(json!(42)));
            state.insert(
                &d.address,
                ResourceState::new(&d.block_type, &d.name, "42", attributes),
            );
        }
        let second = engine.compute_diff(&config, &state).unwrap();
        assert!(!second.has_changes(), "{:?}", second.actionable_diffs());

        let mut changed = config.clone();
        changed.resources[0].attributes["message"] = json!("CPU is very high");
        let third = engine.compute_diff(&changed, &state).unwrap();
        assert_eq!(third.updates, 1);
        assert_eq!(third.get("datadog_monitor.cpu").unwrap().diff_type, DiffType::Update);

        changed.resources[0].attributes["type"] = json!("query alert");
        let fourth = engine.compute_diff(&changed, &state).unwrap();
        assert_eq!(fourth.updates, 1, "query alert and metric alert are equivalent");

        changed.resources[0].attributes["type"] = json!("log alert");
        let fifth = engine.compute_diff(&changed, &state).unwrap();
        assert_eq!(fifth.get("datadog_monitor.cpu").unwrap().diff_type, DiffType::Replace);
    }

    #[test]
    fn test_removed_blocks_are_deleted() {
        let provider = Provider::new();
        let mut state = ProviderState::new();
        state.insert(
            "datadog_team.old",
            ResourceState::new("datadog_team", "old", "abc", json!({"name": "Old"})),
        );
        let diff = DiffEngine::new(&provider)
            .compute_diff(&WorkspaceConfig::default(), &state)
            .unwrap();
        assert_eq!(diff.deletes, 1);
        assert_eq!(diff.diffs[0].id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_unknown_type() {
        let provider = Provider::new();
        let config = workspace("resources: [{type: datadog_nope, name: x}]");
        let err = DiffEngine::new(&provider)
            .compute_diff(&config, &ProviderState::new())
            .unwrap_err();
        assert!(err.to_string().contains("Unknown resource type: datadog_nope"));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("x"), false).as_deref(), Some("x"));
        assert_eq!(display_value(&json!("x"), true).as_deref(), Some(SENSITIVE));
        assert_eq!(display_value(&json!(5), false).as_deref(), Some("5"));
        assert_eq!(display_value(&Value::Null, false), None);
    }
}
