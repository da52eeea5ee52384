//! Plan executor.
//!
//! Runs the actions of an [`ExecutionPlan`] in order against the provider,
//! resolving references from the state as it is updated, and records the
//! outcome of each action.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::config::{resolve_references, BlockKind, Reference};
use crate::error::{ApplyError, ConfigError, PlanError, ProviderError, Result, StateError};
use crate::provider::{Provider, ProviderConfiguration, Resource};
use crate::schema::{ResourceData, Schema};
use crate::state::{HistoryEntry, Operation, ProviderState, ResourceState};

use super::plan::{ActionType, ExecutionPlan, PlannedAction};

const SKIPPED: &str = "Skipped due to dependency failure";

/// Executor for execution plans.
#[derive(Debug)]
pub struct PlanExecutor<'a> {
    provider: &'a Provider,
    meta: &'a ProviderConfiguration,
    continue_on_error: bool,
    operation: Operation,
}

/// Result of executing a single action.
#[derive(Debug)]
pub struct ActionResult {
    /// Action index.
    pub index: usize,
    /// Action that was executed.
    pub action: PlannedAction,
    /// Whether the action succeeded.
    pub success: bool,
    /// Object id after the action.
    pub id: Option<String>,
    /// Error message (if failed).
    pub error: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Individual action results.
    pub results: Vec<ActionResult>,
    /// Total actions executed.
    pub total_executed: usize,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of skipped actions (due to dependency failures).
    pub skipped: usize,
    /// Whether the entire plan succeeded.
    pub success: bool,
}

impl ActionResult {
    fn succeeded(index: usize, action: &PlannedAction, id: Option<String>) -> Self {
        Self {
            index,
            action: action.clone(),
            success: true,
            id,
            error: None,
        }
    }

    fn failed(index: usize, action: &PlannedAction, error: impl Into<String>) -> Self {
        Self {
            index,
            action: action.clone(),
            success: false,
            id: action.id.clone(),
            error: Some(error.into()),
        }
    }

    /// True when the action never ran because a dependency failed.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.error.as_deref() == Some(SKIPPED)
    }
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(provider: &'a Provider, meta: &'a ProviderConfiguration) -> Self {
        Self {
            provider,
            meta,
            continue_on_error: false,
            operation: Operation::Apply,
        }
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Sets the operation recorded in history.
    #[must_use]
    pub const fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    /// Executes a plan, updating `state` as actions succeed.
    ///
    /// Failed actions are reported in the result, not as an error.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for aborting checks.
    pub async fn execute(&self, plan: &ExecutionPlan, state: &mut ProviderState) -> Result<ExecutionResult> {
        info!("Executing plan with {} actions", plan.actions.len());

        let mut results = Vec::new();
        let mut failed_indices: HashSet<usize> = HashSet::new();

        for (idx, action) in plan.actions.iter().enumerate() {
            if action.dependencies.iter().any(|dep| failed_indices.contains(dep)) {
                warn!("Skipping {} due to failed dependencies", action.address);
                results.push(ActionResult::failed(idx, action, SKIPPED));
                failed_indices.insert(idx);
                continue;
            }

            info!("Executing action {idx}: {}", action.description());
            let result = match self.execute_action(action, state).await {
                Ok(id) => ActionResult::succeeded(idx, action, id),
                Err(e) => {
                    error!("{} failed: {e}", action.description());
                    ActionResult::failed(idx, action, e.to_string())
                }
            };

            let success = result.success;
            results.push(result);
            if !success {
                failed_indices.insert(idx);
                if !self.continue_on_error {
                    break;
                }
            }
        }

        let successful = results.iter().filter(|r| r.success).count();
        let skipped = results.iter().filter(|r| r.is_skipped()).count();
        let failed = results.len() - successful - skipped;

        let execution_result = ExecutionResult {
            total_executed: results.len(),
            successful,
            failed,
            skipped,
            success: failed == 0 && skipped == 0,
            results,
        };

        if !plan.is_empty() {
            let addresses: Vec<String> = plan.actions.iter().map(|a| a.address.clone()).collect();
            let entry = match execution_result.results.iter().find_map(|r| r.error.as_deref()) {
                None => HistoryEntry::new(self.operation, addresses),
                Some(first) => HistoryEntry::failed(self.operation, addresses, first),
            };
            state.add_history(entry);
            state.touch();
        }

        Ok(execution_result)
    }

    async fn execute_action(&self, action: &PlannedAction, state: &mut ProviderState) -> Result<Option<String>> {
        match (action.kind, action.action_type) {
            (BlockKind::Data, ActionType::Delete) => {
                state.remove(&action.address);
                Ok(None)
            }
            (BlockKind::Data, _) => self.execute_read(action, state).await.map(Some),
            (BlockKind::Resource, ActionType::Create) => self.execute_create(action, state).await.map(Some),
            (BlockKind::Resource, ActionType::Update) => self.execute_update(action, state).await.map(Some),
            (BlockKind::Resource, ActionType::Delete) => self.execute_delete(action, state).await,
            (BlockKind::Resource, ActionType::Read) => Err(ProviderError::internal(format!(
                "read planned for managed resource {}",
                action.address
            ))),
        }
    }

    fn resource(&self, action: &PlannedAction) -> Result<std::sync::Arc<dyn Resource>> {
        self.provider.resource(&action.block_type).ok_or_else(|| {
            ConfigError::UnknownType {
                block_kind: BlockKind::Resource.to_string(),
                type_name: action.block_type.clone(),
            }
            .into()
        })
    }

    async fn execute_create(&self, action: &PlannedAction, state: &mut ProviderState) -> Result<String> {
        let resource = self.resource(action)?;
        let schema = resource.schema();
        let mut config = resolved_config(action, &schema, state)?;
        resource.normalize_config(&mut config);

        let mut data = ResourceData::new(config);
        resource.validate_plan(self.meta, &data).await?;
        resource.create(self.meta, &mut data).await?;

        let id = data.id().to_string();
        if id.is_empty() {
            return Err(ApplyError::ResourceFailed {
                address: action.address.clone(),
                operation: "create".to_string(),
                reason: "the API returned no id".to_string(),
            }
            .into());
        }
        info!("Created {} (id {id})", action.address);
        store(state, action, &schema, &id, data.into_attributes());
        Ok(id)
    }

    async fn execute_update(&self, action: &PlannedAction, state: &mut ProviderState) -> Result<String> {
        let resource = self.resource(action)?;
        let schema = resource.schema();
        let existing = state
            .get(&action.address)
            .cloned()
            .ok_or_else(|| StateError::ResourceNotInState {
                address: action.address.clone(),
            })?;

        let mut config = resolved_config(action, &schema, state)?;
        resource.normalize_config(&mut config);

        let mut data = ResourceData::with_prior(&existing.id, existing.attributes.clone(), config);
        resource.validate_plan(self.meta, &data).await?;
        resource.update(self.meta, &mut data).await?;

        let id = if data.id().is_empty() {
            existing.id.clone()
        } else {
            data.id().to_string()
        };
        let mut attributes = data.into_attributes();
        carry_computed(&schema, &mut attributes, &existing.attributes);
        info!("Updated {} (id {id})", action.address);
        store(state, action, &schema, &id, attributes);
        Ok(id)
    }

    async fn execute_delete(&self, action: &PlannedAction, state: &mut ProviderState) -> Result<Option<String>> {
        let resource = self.resource(action)?;
        let Some(existing) = state.get(&action.address).cloned() else {
            debug!("{} is not in state, nothing to delete", action.address);
            return Ok(None);
        };

        let mut data = ResourceData::from_state(&existing.id, existing.attributes);
        match resource.delete(self.meta, &mut data).await {
            Ok(()) => info!("Deleted {} (id {})", action.address, existing.id),
            Err(e) if e.is_not_found() => info!("{} was already deleted", action.address),
            Err(e) => return Err(e),
        }
        state.remove(&action.address);
        Ok(Some(existing.id))
    }

    async fn execute_read(&self, action: &PlannedAction, state: &mut ProviderState) -> Result<String> {
        let data_source = self.provider.data_source(&action.block_type).ok_or_else(|| {
            ConfigError::UnknownType {
                block_kind: BlockKind::Data.to_string(),
                type_name: action.block_type.clone(),
            }
        })?;
        let schema = data_source.schema();
        let config = resolved_config(action, &schema, state)?;

        let mut data = ResourceData::new(config);
        data_source.read(self.meta, &mut data).await?;
        let id = data.id().to_string();
        debug!("Read {} (id {id})", action.address);
        store(state, action, &schema, &id, data.into_attributes());
        Ok(id)
    }
}

/// The action's configuration with every reference answered from state.
fn resolved_config(action: &PlannedAction, schema: &Schema, state: &ProviderState) -> Result<Value> {
    let mut config = action
        .config
        .clone()
        .unwrap_or_else(|| Value::Object(Map::new()));
    resolve_references(&mut config, &|r: &Reference| {
        state.attribute(&r.address, &r.attribute)
    })
    .map_err(|reference| PlanError::UnresolvedReference {
        address: action.address.clone(),
        reference: reference.to_string(),
    })?;
    schema.prepare(&mut config);
    Ok(config)
}

/// Keeps computed values the CRUD call did not write back.
fn carry_computed(schema: &Schema, attributes: &mut Value, prior: &Value) {
    let (Value::Object(attributes), Value::Object(prior)) = (attributes, prior) else {
        return;
    };
    for (name, value) in prior {
        let computed = schema.attribute(name).is_none_or(|attr| attr.computed);
        if computed && !attributes.contains_key(name) {
            attributes.insert(name.clone(), value.clone());
        }
    }
}

fn store(state: &mut ProviderState, action: &PlannedAction, schema: &Schema, id: &str, mut attributes: Value) {
    schema.normalize(&mut attributes);
    let object = ResourceState::new(&action.block_type, &action.name, id, attributes)
        .with_config_hash(action.new_hash.clone().unwrap_or_default())
        .with_dependencies(action.depends_on.clone());
    state.insert(&action.address, object);
}

impl ExecutionResult {
    /// Returns true if all actions succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.success && self.failed == 0 && self.skipped == 0
    }

    /// Indices of actions that failed or were skipped.
    #[must_use]
    pub fn failed_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.index)
            .collect()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.total_executed, self.successful, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockTransport;
    use crate::config::WorkspaceConfig;
    use crate::planner::DiffEngine;
    use crate::provider::testing::WidgetResource;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Provider, WidgetResource, ProviderConfiguration) {
        let widgets = WidgetResource::default();
        let mut provider = Provider::new();
        provider.register_resource(Arc::new(widgets.clone()));
        let meta = ProviderConfiguration::unvalidated(Arc::new(MockTransport::new()), "https://api.datadoghq.com");
        (provider, widgets, meta)
    }

    fn workspace(yaml: &str) -> WorkspaceConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    async fn apply(
        provider: &Provider,
        meta: &ProviderConfiguration,
        config: &WorkspaceConfig,
        state: &mut ProviderState,
        continue_on_error: bool,
    ) -> ExecutionResult {
        let diff = DiffEngine::new(provider).compute_diff(config, state).unwrap();
        let plan = ExecutionPlan::from_diff(&diff, "hash");
        PlanExecutor::new(provider, meta)
            .with_continue_on_error(continue_on_error)
            .execute(&plan, state)
            .await
            .unwrap()
    }

    const PARENT_AND_CHILD: &str = r#"
resources:
  - type: test_widget
    name: child
    attributes:
      name: child
      parent: "${test_widget.parent.id}"
  - type: test_widget
    name: parent
    attributes:
      name: parent
"#;

    #[tokio::test]
    async fn test_create_resolves_references() {
        let (provider, widgets, meta) = setup();
        let mut state = ProviderState::new();

        let result = apply(&provider, &meta, &workspace(PARENT_AND_CHILD), &mut state, false).await;
        assert!(result.all_successful(), "{result}");
        assert_eq!(widgets.count(), 2);

        let child = &state.resources["test_widget.child"];
        assert_eq!(child.id, "w-child");
        assert_eq!(child.attributes["parent"], "w-parent");
        assert_eq!(child.attributes["size"], 1);
        assert_eq!(child.dependencies, vec!["test_widget.parent"]);
        assert!(!child.config_hash.is_empty());
        assert_eq!(state.serial, 1);
        assert!(state.history[0].success);
    }

    #[tokio::test]
    async fn test_update_keeps_computed_values() {
        let (provider, widgets, meta) = setup();
        let mut state = ProviderState::new();
        let config = workspace(PARENT_AND_CHILD);
        apply(&provider, &meta, &config, &mut state, false).await;

        let mut changed = config.clone();
        changed.resources[1].attributes["size"] = json!(3);
        let result = apply(&provider, &meta, &changed, &mut state, false).await;
        assert_eq!(result.total_executed, 1);

        let parent = &state.resources["test_widget.parent"];
        assert_eq!(parent.attributes["size"], 3);
        assert_eq!(parent.attributes["serial"], 2);
        assert_eq!(widgets.stored("w-parent").unwrap()["size"], 3);

        let again = apply(&provider, &meta, &changed, &mut state, false).await;
        assert_eq!(again.total_executed, 0);
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let (provider, widgets, meta) = setup();
        let mut state = ProviderState::new();
        let config = workspace(PARENT_AND_CHILD);
        apply(&provider, &meta, &config, &mut state, false).await;

        let mut replaced = config.clone();
        replaced.resources[1].attributes["kind"] = json!("large");
        let result = apply(&provider, &meta, &replaced, &mut state, false).await;
        assert!(result.all_successful(), "{result}");
        let kinds: Vec<ActionType> = result.results.iter().map(|r| r.action.action_type).collect();
        assert_eq!(kinds, vec![ActionType::Delete, ActionType::Create, ActionType::Update]);
        assert_eq!(state.resources["test_widget.child"].attributes["parent"], "w-parent");
        assert_eq!(widgets.stored("w-parent").unwrap()["kind"], "large");

        let result = apply(&provider, &meta, &WorkspaceConfig::default(), &mut state, false).await;
        assert!(result.all_successful(), "{result}");
        let order: Vec<&str> = result.results.iter().map(|r| r.action.address.as_str()).collect();
        assert_eq!(order, vec!["test_widget.child", "test_widget.parent"]);
        assert!(state.resources.is_empty());
        assert_eq!(widgets.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents() {
        let (provider, widgets, meta) = setup();
        let mut state = ProviderState::new();
        let mut config = workspace(PARENT_AND_CHILD);
        config.resources[1].attributes["name"] = json!("broken");

        let result = apply(&provider, &meta, &config, &mut state, true).await;
        assert!(!result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert!(result.results[1].is_skipped());
        assert_eq!(widgets.count(), 0);
        assert!(!state.history[0].success);
        assert!(state.history[0].error.as_deref().unwrap().contains("widget rejected"));
    }

    #[tokio::test]
    async fn test_stops_on_first_error() {
        let (provider, _widgets, meta) = setup();
        let mut state = ProviderState::new();
        let config = workspace(
            r#"
resources:
  - type: test_widget
    name: a
    attributes: { name: broken }
  - type: test_widget
    name: b
    attributes: { name: b }
"#,
        );
        let result = apply(&provider, &meta, &config, &mut state, false).await;
        assert_eq!(result.total_executed, 1);
        assert_eq!(result.failed_indices(), vec![0]);
    }
}
