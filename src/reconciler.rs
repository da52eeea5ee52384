//! Reconciler for converging Datadog with the workspace.
//!
//! Ties the pieces together: loads state under a lock, refreshes it from
//! the API, plans, executes, and saves. Destroy runs the destroy check
//! afterwards so eventually consistent deletes are confirmed.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{BlockKind, ConfigHasher, WorkspaceConfig};
use crate::error::{ApplyError, ConfigError, ProviderError, Result};
use crate::planner::{
    ActionType, DiffDetail, DiffEngine, DiffResult, ExecutionPlan, ExecutionResult, PlanExecutor,
};
use crate::provider::{Provider, ProviderConfiguration, Resource};
use crate::schema::ResourceData;
use crate::state::{HistoryEntry, Operation, ProviderState, ResourceState, StateStore};
use crate::utils::destroy::{DESTROY_CHECK_ATTEMPTS, DESTROY_CHECK_INTERVAL};
use crate::utils::{check_destroyed, exhausted, Deadline, GoneCheck};

/// Reconciler over one workspace and its state store.
pub struct Reconciler<'a, S: StateStore + ?Sized> {
    config: &'a WorkspaceConfig,
    provider: &'a Provider,
    meta: &'a ProviderConfiguration,
    state_store: &'a S,
    hasher: ConfigHasher,
    max_attempts: u32,
    retry_delay: Duration,
    refresh: bool,
    continue_on_error: bool,
    holder: String,
    destroy_check: (Deadline, Duration),
}

/// Result of an apply.
#[derive(Debug, Default, Serialize)]
pub struct ReconciliationResult {
    /// Whether every action succeeded.
    pub success: bool,
    /// Attempts used.
    pub attempts: u32,
    /// Objects created.
    pub created: usize,
    /// Objects updated in place.
    pub updated: usize,
    /// Objects deleted.
    pub deleted: usize,
    /// Data sources read.
    pub read: usize,
    /// Errors encountered.
    pub errors: Vec<String>,
}

/// Result of a refresh.
#[derive(Debug, Default, Serialize)]
pub struct RefreshSummary {
    /// Resources read.
    pub refreshed: usize,
    /// Resources that no longer exist and were dropped from state.
    pub removed: Vec<String>,
}

/// Result of a destroy.
#[derive(Debug, Default, Serialize)]
pub struct DestroyResult {
    /// Addresses deleted.
    pub deleted: Vec<String>,
    /// Addresses that failed, with the error.
    pub failed: BTreeMap<String, String>,
}

/// Differences between state and what Datadog currently reports.
#[derive(Debug, Default, Serialize)]
pub struct DriftReport {
    /// Changed attributes per address.
    pub drifted: BTreeMap<String, Vec<DriftedAttribute>>,
    /// Addresses whose objects are gone.
    pub removed: Vec<String>,
    /// Resources checked.
    pub total_resources: usize,
}

/// One attribute that changed outside the workspace.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DriftedAttribute {
    /// Attribute name.
    pub field: String,
    /// Value in state.
    pub stored: Option<String>,
    /// Value reported by the API.
    pub actual: Option<String>,
}

impl From<DiffDetail> for DriftedAttribute {
    fn from(detail: DiffDetail) -> Self {
        Self {
            field: detail.field,
            stored: detail.old_value,
            actual: detail.new_value,
        }
    }
}

impl<'a, S: StateStore + ?Sized> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        config: &'a WorkspaceConfig,
        provider: &'a Provider,
        meta: &'a ProviderConfiguration,
        state_store: &'a S,
    ) -> Self {
        Self {
            config,
            provider,
            meta,
            state_store,
            hasher: ConfigHasher::new(),
            max_attempts: 1,
            retry_delay: Duration::from_secs(2),
            refresh: true,
            continue_on_error: false,
            holder: String::new(),
            destroy_check: (Deadline::Attempts(DESTROY_CHECK_ATTEMPTS), DESTROY_CHECK_INTERVAL),
        }
    }

    /// Sets the maximum apply attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = if max_attempts == 0 { 1 } else { max_attempts };
        self
    }

    /// Sets the pause between apply attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Whether apply and plan refresh state first.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Whether apply keeps going after a failed action.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Lock holder name; empty generates one.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Budget of the destroy check.
    #[must_use]
    pub const fn with_destroy_check(mut self, deadline: Deadline, interval: Duration) -> Self {
        self.destroy_check = (deadline, interval);
        self
    }

    /// Reads every resource in `state` and drops the ones that are gone.
    ///
    /// # Errors
    ///
    /// Returns the first read error other than not-found.
    pub async fn refresh_state(&self, state: &mut ProviderState) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();
        let tracked: Vec<(String, ResourceState)> = state
            .resources
            .iter()
            .map(|(address, object)| (address.clone(), object.clone()))
            .collect();

        for (address, object) in tracked {
            let Some(resource) = self.provider.resource(&object.resource_type) else {
                warn!("{address}: unknown resource type {}, not refreshed", object.resource_type);
                continue;
            };
            let mut data = ResourceData::from_state(&object.id, object.attributes.clone());
            match resource.read(self.meta, &mut data).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => data.clear_id(),
                Err(e) => return Err(e.context(format!("refreshing {address}"))),
            }

            if data.id().is_empty() {
                info!("{address} no longer exists, removing it from state");
                state.remove(&address);
                summary.removed.push(address);
                continue;
            }

            let id = data.id().to_string();
            let mut attributes = data.into_attributes();
            resource.schema().normalize(&mut attributes);
            let refreshed = ResourceState {
                id,
                attributes,
                updated_at: chrono::Utc::now(),
                ..object
            };
            state.insert(&address, refreshed);
            summary.refreshed += 1;
        }

        debug!(
            "Refreshed {} resources, {} gone",
            summary.refreshed,
            summary.removed.len()
        );
        Ok(summary)
    }

    /// Refreshes the stored state and saves it.
    ///
    /// # Errors
    ///
    /// Returns lock, read and save errors.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let lock = self.state_store.acquire_lock(&self.holder).await?;
        let result = async {
            let mut state = self.state_store.load_or_default().await?;
            let summary = self.refresh_state(&mut state).await?;
            state.add_history(HistoryEntry::new(Operation::Refresh, summary.removed.clone()));
            state.touch();
            self.state_store.save(&state).await?;
            Ok::<_, ProviderError>(summary)
        }
        .await;
        self.state_store.release_lock(&lock.lock_id).await?;
        result
    }

    /// Refreshes a copy of the state and reports what changed.
    ///
    /// # Errors
    ///
    /// Returns load and read errors.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let stored = self.state_store.load_or_default().await?;
        let mut current = stored.clone();
        let summary = self.refresh_state(&mut current).await?;

        let mut report = DriftReport {
            total_resources: stored.resources.len(),
            removed: summary.removed,
            ..DriftReport::default()
        };
        for (address, before) in &stored.resources {
            let (Some(after), Some(resource)) = (
                current.resources.get(address),
                self.provider.resource(&before.resource_type),
            ) else {
                continue;
            };
            let changes: Vec<DriftedAttribute> = resource
                .schema()
                .diff(&before.attributes, &after.attributes)
                .into_iter()
                .map(|change| DriftedAttribute::from(DiffDetail::from(change)))
                .collect();
            if !changes.is_empty() {
                report.drifted.insert(address.clone(), changes);
            }
        }
        Ok(report)
    }

    /// Computes the plan against the stored state, refreshed in memory.
    ///
    /// # Errors
    ///
    /// Returns load, read and planning errors.
    pub async fn plan(&self) -> Result<(DiffResult, ExecutionPlan)> {
        let mut state = self.state_store.load_or_default().await?;
        if self.refresh {
            self.refresh_state(&mut state).await?;
        }
        let diff = DiffEngine::new(self.provider).compute_diff(self.config, &state)?;
        let plan = ExecutionPlan::from_diff(&diff, &self.hasher.hash_workspace(self.config));
        Ok((diff, plan))
    }

    /// Plans and executes until the workspace converges, up to the maximum
    /// attempts, saving state after each attempt.
    ///
    /// # Errors
    ///
    /// Returns lock, planning and save errors, or
    /// [`ApplyError::MaxRetriesExceeded`] naming the failing
    /// addresses when attempts run out.
    pub async fn apply(&self) -> Result<ReconciliationResult> {
        let lock = self.state_store.acquire_lock(&self.holder).await?;
        let result = self.apply_locked().await;
        self.state_store.release_lock(&lock.lock_id).await?;
        result
    }

    async fn apply_locked(&self) -> Result<ReconciliationResult> {
        let config_hash = self.hasher.hash_workspace(self.config);
        let mut state = self.state_store.load_or_default().await?;
        if self.refresh {
            self.refresh_state(&mut state).await?;
        }

        let engine = DiffEngine::new(self.provider);
        let executor =
            PlanExecutor::new(self.provider, self.meta).with_continue_on_error(self.continue_on_error);
        let mut result = ReconciliationResult::default();
        let mut failing: Vec<String> = Vec::new();

        for attempt in 1..=self.max_attempts {
            result.attempts = attempt;
            let diff = engine.compute_diff(self.config, &state)?;
            let plan = ExecutionPlan::from_diff(&diff, &config_hash);
            info!(
                "Attempt {attempt}/{}: {} creates, {} updates, {} replaces, {} deletes",
                self.max_attempts, diff.creates, diff.updates, diff.replaces, diff.deletes
            );
            if plan.is_empty() {
                result.success = true;
                break;
            }

            let execution = executor.execute(&plan, &mut state).await?;
            self.state_store.save(&state).await?;
            tally(&mut result, &execution);

            if execution.success {
                result.success = true;
                break;
            }
            failing = execution
                .results
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.action.address.clone())
                .collect();
            result.errors = execution
                .results
                .iter()
                .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.action.address)))
                .collect();
            if attempt < self.max_attempts {
                warn!("Apply attempt {attempt} left {} failures, retrying", failing.len());
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        if result.success {
            info!(
                "Apply complete: {} created, {} updated, {} deleted",
                result.created, result.updated, result.deleted
            );
            Ok(result)
        } else {
            for e in &result.errors {
                error!("{e}");
            }
            Err(exhausted(self.max_attempts, failing.join(", ")))
        }
    }

    /// Deletes every object in state, dependents first, then confirms the
    /// API no longer reports them.
    ///
    /// # Errors
    ///
    /// Returns lock and save errors, the first delete failure, or the
    /// destroy check error.
    pub async fn destroy(&self) -> Result<DestroyResult> {
        let lock = self.state_store.acquire_lock(&self.holder).await?;
        let result = self.destroy_locked().await;
        self.state_store.release_lock(&lock.lock_id).await?;
        result
    }

    async fn destroy_locked(&self) -> Result<DestroyResult> {
        let mut state = self.state_store.load_or_default().await?;
        let types: BTreeMap<String, String> = state
            .resources
            .iter()
            .map(|(address, object)| (address.clone(), object.resource_type.clone()))
            .collect();

        let diff = DiffEngine::new(self.provider).compute_diff(&WorkspaceConfig::default(), &state)?;
        let plan = ExecutionPlan::from_diff(&diff, "");
        let execution = PlanExecutor::new(self.provider, self.meta)
            .with_continue_on_error(true)
            .with_operation(Operation::Destroy)
            .execute(&plan, &mut state)
            .await?;
        self.state_store.save(&state).await?;

        let mut result = DestroyResult::default();
        let mut checks = Vec::new();
        for r in &execution.results {
            let address = r.action.address.clone();
            if let Some(e) = &r.error {
                result.failed.insert(address, e.clone());
                continue;
            }
            if r.action.kind != BlockKind::Resource {
                continue;
            }
            let resource = types.get(&address).and_then(|t| self.provider.resource(t));
            if let (Some(resource), Some(id)) = (resource, r.id.as_deref()) {
                if let Some(path) = resource.destroy_check_path(id) {
                    checks.push((resource, path));
                }
            }
            result.deleted.push(address);
        }

        if let Some((address, e)) = result.failed.iter().next() {
            error!("Destroy of {address} failed: {e}");
            return Err(ApplyError::ResourceFailed {
                address: address.clone(),
                operation: "delete".to_string(),
                reason: e.clone(),
            }
            .into());
        }

        let (deadline, interval) = self.destroy_check;
        for (resource, path) in checks {
            check_destroyed(
                &self.meta.client,
                std::slice::from_ref(&path),
                &DeletedObject(resource.as_ref()),
                deadline,
                interval,
            )
            .await?;
        }

        info!("Destroyed {} resources", result.deleted.len());
        Ok(result)
    }

    /// Adopts an existing object into state under `address`.
    ///
    /// # Errors
    ///
    /// Returns an error for data source addresses, unknown types, and
    /// import failures.
    pub async fn import(&self, address: &str, id: &str) -> Result<ResourceState> {
        let (resource_type, name) = match address.split_once('.') {
            Some((t, n)) if t != "data" && !n.is_empty() && !n.contains('.') => (t, n),
            _ => {
                return Err(ConfigError::validation(
                    format!("{address} is not a managed resource address"),
                    "address",
                )
                .into());
            }
        };
        let resource = self.provider.resource(resource_type).ok_or_else(|| ConfigError::UnknownType {
            block_kind: BlockKind::Resource.to_string(),
            type_name: resource_type.to_string(),
        })?;

        let lock = self.state_store.acquire_lock(&self.holder).await?;
        let result = async {
            let data = resource.import(self.meta, id).await?;
            let imported_id = data.id().to_string();
            let mut attributes = data.into_attributes();
            resource.schema().normalize(&mut attributes);
            let object = ResourceState::new(resource_type, name, &imported_id, attributes)
                .with_config_hash(self.hasher.hash_address(self.config, address).unwrap_or_default());

            let mut state = self.state_store.load_or_default().await?;
            state.insert(address, object.clone());
            state.add_history(HistoryEntry::new(Operation::Import, vec![address.to_string()]));
            state.touch();
            self.state_store.save(&state).await?;
            info!("Imported {address} (id {imported_id})");
            Ok::<_, ProviderError>(object)
        }
        .await;
        self.state_store.release_lock(&lock.lock_id).await?;
        result
    }
}

fn tally(result: &mut ReconciliationResult, execution: &ExecutionResult) {
    for r in execution.results.iter().filter(|r| r.success) {
        match r.action.action_type {
            ActionType::Create => result.created += 1,
            ActionType::Update => result.updated += 1,
            ActionType::Delete => result.deleted += 1,
            ActionType::Read => result.read += 1,
        }
    }
}

/// Destroy check rules of one resource type.
struct DeletedObject<'r>(&'r dyn Resource);

impl GoneCheck for DeletedObject<'_> {
    fn gone_body(&self, body: &serde_json::Value) -> bool {
        self.0.is_gone(body)
    }

    fn gone_error(&self, err: &ProviderError) -> bool {
        self.0.is_gone_error(err)
    }
}

impl DriftReport {
    /// Returns true when nothing drifted.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.drifted.is_empty() && self.removed.is_empty()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            return write!(f, "No drift detected across {} resources", self.total_resources);
        }
        writeln!(f, "Drift detected:")?;
        for (address, changes) in &self.drifted {
            writeln!(f, "  ~ {address}")?;
            for change in changes {
                writeln!(
                    f,
                    "      {}: {} -> {}",
                    change.field,
                    change.stored.as_deref().unwrap_or("null"),
                    change.actual.as_deref().unwrap_or("null")
                )?;
            }
        }
        for address in &self.removed {
            writeln!(f, "  - {address} (deleted outside the workspace)")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "complete" } else { "failed" };
        writeln!(f, "Apply {status}:")?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResponse, MockTransport};
    use crate::provider::testing::WidgetResource;
    use crate::state::LocalStateStore;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        provider: Provider,
        widgets: WidgetResource,
        meta: ProviderConfiguration,
        store: LocalStateStore,
        _dir: TempDir,
    }

    fn fixture(transport: MockTransport) -> Fixture {
        let widgets = WidgetResource::default();
        let mut provider = Provider::new();
        provider.register_resource(Arc::new(widgets.clone()));
        let dir = TempDir::new().unwrap();
        Fixture {
            provider,
            widgets,
            meta: ProviderConfiguration::unvalidated(Arc::new(transport), "https://api.datadoghq.com"),
            store: LocalStateStore::with_base_dir(dir.path().join(".datadog")),
            _dir: dir,
        }
    }

    fn workspace() -> WorkspaceConfig {
        serde_yaml::from_str(
            r#"
resources:
  - type: test_widget
    name: base
    attributes: { name: base }
  - type: test_widget
    name: top
    attributes:
      name: top
      parent: "${test_widget.base.id}"
"#,
        )
        .unwrap()
    }

    fn reconciler<'a>(f: &'a Fixture, config: &'a WorkspaceConfig) -> Reconciler<'a, LocalStateStore> {
        Reconciler::new(config, &f.provider, &f.meta, &f.store)
            .with_holder("test")
            .with_retry_delay(Duration::ZERO)
            .with_destroy_check(Deadline::Attempts(2), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_apply_then_converged() {
        let f = fixture(MockTransport::new());
        let config = workspace();
        let rec = reconciler(&f, &config);

        let result = rec.apply().await.unwrap();
        assert!(result.success);
        assert_eq!(result.created, 2);
        assert!(!f.store.is_locked().await.unwrap());

        let (diff, plan) = rec.plan().await.unwrap();
        assert!(!diff.has_changes());
        assert!(plan.is_empty());

        let second = rec.apply().await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(f.store.load().await.unwrap().unwrap().serial, 1);
    }

    #[tokio::test]
    async fn test_apply_exhausts_attempts() {
        let f = fixture(MockTransport::new());
        let mut config = workspace();
        config.resources[0].attributes["name"] = json!("broken");
        let rec = reconciler(&f, &config).with_max_attempts(2);

        let err = rec.apply().await.unwrap_err();
        assert!(err.to_string().contains("Maximum retry attempts (2)"));
        assert!(err.to_string().contains("test_widget.base"));

        let state = f.store.load().await.unwrap().unwrap();
        assert_eq!(state.history.len(), 2);
        assert!(!f.store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_and_drift() {
        let f = fixture(MockTransport::new());
        let config = workspace();
        let rec = reconciler(&f, &config);
        rec.apply().await.unwrap();

        f.widgets
            .objects
            .lock()
            .unwrap()
            .get_mut("w-top")
            .unwrap()["size"] = json!(7);
        f.widgets.objects.lock().unwrap().remove("w-base");

        let drift = rec.check_drift().await.unwrap();
        assert!(!drift.is_converged());
        assert_eq!(drift.removed, vec!["test_widget.base"]);
        let top = &drift.drifted["test_widget.top"];
        assert_eq!(top[0].field, "size");
        assert_eq!(top[0].actual.as_deref(), Some("7"));
        assert!(drift.to_string().contains("deleted outside the workspace"));

        // check_drift leaves the stored state alone
        assert_eq!(f.store.load().await.unwrap().unwrap().resources.len(), 2);

        let summary = rec.refresh().await.unwrap();
        assert_eq!(summary.refreshed, 1);
        let state = f.store.load().await.unwrap().unwrap();
        assert!(state.resources.get("test_widget.base").is_none());
        assert_eq!(state.resources["test_widget.top"].attributes["size"], 7);
    }

    #[tokio::test]
    async fn test_destroy_runs_destroy_check() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|req| req.url.contains("/api/v1/widget/"))
            .times(2)
            .returning(|_| Ok(ApiResponse::new(404, r#"{"errors":["Not found"]}"#)));
        let f = fixture(transport);
        let config = workspace();
        let rec = reconciler(&f, &config);
        rec.apply().await.unwrap();

        let result = rec.destroy().await.unwrap();
        assert_eq!(result.deleted, vec!["test_widget.top", "test_widget.base"]);
        assert_eq!(f.widgets.count(), 0);

        let state = f.store.load().await.unwrap().unwrap();
        assert!(state.resources.is_empty());
        assert_eq!(state.history.last().unwrap().operation, Operation::Destroy);
    }

    #[tokio::test]
    async fn test_destroy_check_fails_while_object_exists() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|_| Ok(ApiResponse::new(200, r#"{"id":"w-base"}"#)));
        let f = fixture(transport);
        let config: WorkspaceConfig =
            serde_yaml::from_str("resources: [{type: test_widget, name: base, attributes: {name: base}}]").unwrap();
        let rec = reconciler(&f, &config);
        rec.apply().await.unwrap();

        let err = rec.destroy().await.unwrap_err();
        assert!(err.to_string().contains("still exists"), "{err}");
    }

    #[tokio::test]
    async fn test_import() {
        let f = fixture(MockTransport::new());
        f.widgets
            .objects
            .lock()
            .unwrap()
            .insert("w-legacy".into(), json!({"name": "legacy", "size": 4}));
        let config = WorkspaceConfig::default();
        let rec = reconciler(&f, &config);

        let object = rec.import("test_widget.legacy", "w-legacy").await.unwrap();
        assert_eq!(object.attributes["size"], 4);
        let state = f.store.load().await.unwrap().unwrap();
        assert_eq!(state.resources["test_widget.legacy"].id, "w-legacy");

        assert!(rec.import("test_widget.missing", "w-missing").await.is_err());
        assert!(rec.import("data.test_widget.x", "1").await.is_err());
        assert!(!f.store.is_locked().await.unwrap());
    }
}
