//! Planning: compare the workspace with state and apply the difference.
//!
//! - [`DiffEngine`] computes per-address differences
//! - [`ExecutionPlan`] orders them into actions
//! - [`PlanExecutor`] runs the actions against the provider

mod diff;
mod executor;
mod plan;

pub use diff::{
    display_value, resolve_known, DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff,
    KNOWN_AFTER_APPLY, SENSITIVE,
};
pub use executor::{ActionResult, ExecutionResult, PlanExecutor};
pub use plan::{ActionType, ExecutionPlan, PlannedAction};
