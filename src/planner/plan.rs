//! Execution plan types and construction.
//!
//! A plan turns a [`DiffResult`] into ordered actions. Deletes run first,
//! dependents before the objects they depend on. Creates, updates and
//! data source reads follow in dependency order. A replace becomes a
//! delete followed by a create that depends on it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{topological_order, BlockKind};

use super::diff::{DiffResult, DiffType, ResourceDiff};

/// An ordered set of actions.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Workspace hash this plan is based on.
    pub config_hash: String,
    /// Actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// What to do.
    pub action_type: ActionType,
    /// Block address.
    pub address: String,
    /// Managed resource or data source.
    pub kind: BlockKind,
    /// Registered type name.
    pub block_type: String,
    /// Local name.
    pub name: String,
    /// Object id, for updates and deletes.
    pub id: Option<String>,
    /// Desired configuration, references not yet resolved.
    pub config: Option<Value>,
    /// Addresses recorded in state as dependencies.
    pub depends_on: Vec<String>,
    /// Why the action is planned.
    pub reason: String,
    /// Block hash written to state.
    pub new_hash: Option<String>,
    /// Indices of actions that must succeed first.
    pub dependencies: Vec<usize>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create an object.
    Create,
    /// Update an object in place.
    Update,
    /// Delete an object.
    Delete,
    /// Read a data source.
    Read,
}

fn action_for(diff: &ResourceDiff, action_type: ActionType, reason: impl Into<String>) -> PlannedAction {
    PlannedAction {
        action_type,
        address: diff.address.clone(),
        kind: diff.kind,
        block_type: diff.block_type.clone(),
        name: diff.name.clone(),
        id: diff.id.clone(),
        config: diff.config.clone(),
        depends_on: diff.dependencies.clone(),
        reason: reason.into(),
        new_hash: diff.new_hash.clone(),
        dependencies: Vec::new(),
    }
}

impl ExecutionPlan {
    /// Builds a plan from a diff.
    #[must_use]
    pub fn from_diff(diff: &DiffResult, config_hash: &str) -> Self {
        let mut actions: Vec<PlannedAction> = Vec::new();

        // Deletes, dependents first.
        let deleted: BTreeMap<&str, &ResourceDiff> = diff
            .diffs
            .iter()
            .filter(|d| matches!(d.diff_type, DiffType::Delete | DiffType::Replace))
            .map(|d| (d.address.as_str(), d))
            .collect();
        let delete_graph: BTreeMap<String, BTreeSet<String>> = deleted
            .iter()
            .map(|(address, d)| {
                let deps = d
                    .dependencies
                    .iter()
                    .filter(|dep| deleted.contains_key(dep.as_str()))
                    .cloned()
                    .collect();
                ((*address).to_string(), deps)
            })
            .collect();
        let mut delete_order =
            topological_order(&delete_graph).unwrap_or_else(|_| delete_graph.keys().cloned().collect());
        delete_order.reverse();

        let mut delete_index: HashMap<String, usize> = HashMap::new();
        for address in &delete_order {
            let Some(d) = deleted.get(address.as_str()) else {
                continue;
            };
            let reason = if d.diff_type == DiffType::Replace {
                "replaced: forced by a changed attribute"
            } else {
                "removed from the workspace"
            };
            let mut action = action_for(d, ActionType::Delete, reason);
            action.config = None;
            // Anything depending on this object is deleted before it.
            action.dependencies = delete_graph
                .iter()
                .filter(|(_, deps)| deps.contains(address))
                .filter_map(|(dependent, _)| delete_index.get(dependent).copied())
                .collect();
            delete_index.insert(address.clone(), actions.len());
            actions.push(action);
        }

        // Creates, updates and reads in dependency order.
        let mut apply_index: HashMap<String, usize> = HashMap::new();
        for d in &diff.diffs {
            let (action_type, reason) = match d.diff_type {
                DiffType::Create => (ActionType::Create, "defined in the workspace"),
                DiffType::Replace => (ActionType::Create, "replacement"),
                DiffType::Update => (ActionType::Update, "configuration changed"),
                DiffType::Read => (ActionType::Read, "data source"),
                DiffType::Delete | DiffType::NoChange => continue,
            };
            let mut action = action_for(d, action_type, reason);
            if d.diff_type == DiffType::Replace {
                action.id = None;
            }
            action.dependencies = d
                .dependencies
                .iter()
                .filter_map(|dep| apply_index.get(dep).copied())
                .chain(delete_index.get(&d.address).copied())
                .collect();
            apply_index.insert(d.address.clone(), actions.len());
            actions.push(action);
        }

        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
        }
    }

    /// True when the plan has no actions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True when the plan changes a managed object.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action_type != ActionType::Read)
    }

    /// Number of actions of one type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Actions that can run immediately.
    #[must_use]
    pub fn ready_actions(&self) -> Vec<&PlannedAction> {
        self.actions
            .iter()
            .filter(|a| a.dependencies.is_empty())
            .collect()
    }

    /// Actions that depend on `action_idx`.
    #[must_use]
    pub fn dependent_actions(&self, action_idx: usize) -> Vec<(usize, &PlannedAction)> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.dependencies.contains(&action_idx))
            .collect()
    }
}

impl PlannedAction {
    /// Human readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.address),
            ActionType::Update => format!("Update {}", self.address),
            ActionType::Delete => format!("Delete {}", self.address),
            ActionType::Read => format!("Read {}", self.address),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.address)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes. Datadog objects match the workspace.");
        }
        writeln!(f, "Execution plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::diff::DiffDetail;

    fn diff(address: &str, diff_type: DiffType, deps: &[&str]) -> ResourceDiff {
        let (block_type, name) = address.split_once('.').unwrap();
        ResourceDiff {
            address: address.to_string(),
            kind: BlockKind::Resource,
            block_type: block_type.to_string(),
            name: name.to_string(),
            diff_type,
            details: vec![DiffDetail {
                field: "name".into(),
                old_value: None,
                new_value: Some("x".into()),
                force_new: diff_type == DiffType::Replace,
            }],
            id: (diff_type != DiffType::Create).then(|| "1".to_string()),
            config: Some(serde_json::json!({})),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            new_hash: Some("h".into()),
        }
    }

    fn result(diffs: Vec<ResourceDiff>) -> DiffResult {
        DiffResult {
            diffs,
            ..DiffResult::default()
        }
    }

    #[test]
    fn test_deletes_run_dependents_first() {
        let plan = ExecutionPlan::from_diff(
            &result(vec![
                diff("datadog_role.ops", DiffType::Delete, &[]),
                diff("datadog_monitor.cpu", DiffType::Delete, &["datadog_role.ops"]),
            ]),
            "hash",
        );
        let order: Vec<&str> = plan.actions.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(order, vec!["datadog_monitor.cpu", "datadog_role.ops"]);
        assert_eq!(plan.actions[1].dependencies, vec![0]);
        assert_eq!(plan.count(ActionType::Delete), 2);
    }

    #[test]
    fn test_replace_is_delete_then_create() {
        let plan = ExecutionPlan::from_diff(
            &result(vec![
                diff("datadog_role.ops", DiffType::Create, &[]),
                diff("datadog_monitor.cpu", DiffType::Replace, &["datadog_role.ops"]),
                diff("datadog_team.core", DiffType::NoChange, &[]),
            ]),
            "hash",
        );
        let summary: Vec<String> = plan
            .actions
            .iter()
            .map(|a| format!("{} {}", a.action_type, a.address))
            .collect();
        assert_eq!(
            summary,
            vec![
                "delete datadog_monitor.cpu",
                "create datadog_role.ops",
                "create datadog_monitor.cpu"
            ]
        );
        assert_eq!(plan.actions[2].dependencies, vec![1, 0]);
        assert!(plan.actions[2].id.is_none());
        assert!(plan.actions[0].config.is_none());
        assert_eq!(plan.dependent_actions(0).len(), 1);
    }

    #[test]
    fn test_reads_only_plan_has_no_changes() {
        let mut read = diff("datadog_team.core", DiffType::Read, &[]);
        read.kind = BlockKind::Data;
        let plan = ExecutionPlan::from_diff(&result(vec![read]), "hash");
        assert!(!plan.is_empty());
        assert!(!plan.has_changes());
        assert!(plan.to_string().starts_with("No changes"));
    }
}
