//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::planner::{ActionType, DiffResult, DiffType, ExecutionPlan, KNOWN_AFTER_APPLY};
use crate::reconciler::{DestroyResult, DriftReport, ReconciliationResult, RefreshSummary};
use crate::schema::Schema;
use crate::state::ProviderState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// State row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Schema attribute row for table display.
#[derive(Tabled)]
struct AttributeRow {
    #[tabled(rename = "Attribute")]
    name: String,
    #[tabled(rename = "Type")]
    ty: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Description")]
    description: String,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan, optionally with attribute level changes.
    #[must_use]
    pub fn format_plan(&self, diff: &DiffResult, plan: &ExecutionPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::new(diff, plan)),
            OutputFormat::Text => Self::format_plan_text(diff, plan, detailed),
        }
    }

    fn format_plan_text(diff: &DiffResult, plan: &ExecutionPlan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes. Datadog matches the workspace.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nExecution plan\n");
        let _ = write!(
            output,
            "   Workspace hash: {}\n\n",
            &plan.config_hash[..8.min(plan.config_hash.len())]
        );

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                address: a.address.clone(),
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for d in diff.actionable_diffs() {
                if d.details.is_empty() {
                    continue;
                }
                let marker = match d.diff_type {
                    DiffType::Create => "+".green(),
                    DiffType::Delete => "-".red(),
                    DiffType::Replace => "-/+".red(),
                    _ => "~".yellow(),
                };
                let _ = writeln!(output, "\n  {marker} {}", d.address);
                for detail in &d.details {
                    let old = detail.old_value.as_deref().unwrap_or("null");
                    let new = detail.new_value.as_deref().unwrap_or("null");
                    let forces = if detail.force_new { " (forces replacement)".red().to_string() } else { String::new() };
                    let new = if new == KNOWN_AFTER_APPLY { new.dimmed().to_string() } else { new.to_string() };
                    let _ = writeln!(output, "      {}: {old} -> {new}{forces}", detail.field);
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to add, {} to change, {} to destroy.\n",
            (diff.creates + diff.replaces).to_string().green(),
            diff.updates.to_string().yellow(),
            (diff.deletes + diff.replaces).to_string().red()
        );
        output
    }

    /// Formats an apply result.
    #[must_use]
    pub fn format_apply(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Apply complete! Resources: {} added, {} changed, {} destroyed.\n",
                    "✓".green(),
                    result.created,
                    result.updated,
                    result.deleted
                );
                if result.attempts > 1 {
                    let _ = writeln!(output, "   Converged after {} attempts", result.attempts);
                }
                output
            }
        }
    }

    /// Formats a destroy result.
    #[must_use]
    pub fn format_destroy(&self, result: &DestroyResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => {
                let mut output = String::new();
                for address in &result.deleted {
                    let _ = writeln!(output, "   {} {address}", "-".red());
                }
                let _ = writeln!(
                    output,
                    "{} Destroy complete! Resources: {} destroyed.",
                    "✓".green(),
                    result.deleted.len()
                );
                output
            }
        }
    }

    /// Formats a refresh summary.
    #[must_use]
    pub fn format_refresh(&self, summary: &RefreshSummary) -> String {
        match self.format {
            OutputFormat::Json => to_json(summary),
            OutputFormat::Text => {
                let mut output = format!("{} Refreshed {} resources\n", "✓".green(), summary.refreshed);
                for address in &summary.removed {
                    let _ = writeln!(output, "   {} {address} no longer exists", "-".red());
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!("{} No drift detected.\n", "✓".green());
                }
                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for (address, changes) in &report.drifted {
                    let _ = writeln!(output, "   {} {address}", "~".yellow());
                    for change in changes {
                        let _ = writeln!(
                            output,
                            "       {}: {} -> {}",
                            change.field,
                            change.stored.as_deref().unwrap_or("null"),
                            change.actual.as_deref().unwrap_or("null")
                        );
                    }
                }
                for address in &report.removed {
                    let _ = writeln!(output, "   {} {address} (deleted outside the workspace)", "-".red());
                }
                let _ = write!(
                    output,
                    "\n{}/{} resources have drifted.\n",
                    report.drifted.len() + report.removed.len(),
                    report.total_resources
                );
                output
            }
        }
    }

    /// Formats validation findings.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} The workspace is valid.\n", "✓".green())
                } else {
                    format!("{} {} errors:\n", "✗".red(), result.error_count())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats the full state.
    #[must_use]
    pub fn format_state(&self, state: &ProviderState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nState (serial {}, lineage {})\n", state.serial, state.lineage);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());
                let _ = writeln!(output, "   Data sources: {}", state.data_sources.len());

                for (address, object) in &state.resources {
                    let _ = writeln!(output, "\n   {address} (id {})", object.id);
                    if let Some(attributes) = object.attributes.as_object() {
                        for (name, value) in attributes {
                            let _ = writeln!(output, "       {name} = {value}");
                        }
                    }
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.addresses.join(", ")
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats the tracked addresses as a table.
    #[must_use]
    pub fn format_state_list(&self, state: &ProviderState) -> String {
        let rows: Vec<StateRow> = state
            .resources
            .iter()
            .chain(&state.data_sources)
            .map(|(address, object)| StateRow {
                address: address.clone(),
                resource_type: object.resource_type.clone(),
                id: object.id.clone(),
                updated: object.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            })
            .collect();
        match self.format {
            OutputFormat::Json => to_json(&state.addresses()),
            OutputFormat::Text if rows.is_empty() => "No resources in state.\n".to_string(),
            OutputFormat::Text => format!("{}\n", Table::new(rows)),
        }
    }

    /// Formats a schema.
    #[must_use]
    pub fn format_schema(&self, name: &str, schema: &Schema) -> String {
        match self.format {
            OutputFormat::Json => to_json(schema),
            OutputFormat::Text => {
                let rows: Vec<AttributeRow> = schema
                    .attributes
                    .iter()
                    .map(|(attr_name, attr)| {
                        let mut mode = Vec::new();
                        if attr.required {
                            mode.push("required");
                        }
                        if attr.optional {
                            mode.push("optional");
                        }
                        if attr.computed {
                            mode.push("computed");
                        }
                        if attr.force_new {
                            mode.push("forces new");
                        }
                        if attr.sensitive {
                            mode.push("sensitive");
                        }
                        AttributeRow {
                            name: attr_name.clone(),
                            ty: attr.ty.describe().to_string(),
                            mode: mode.join(", "),
                            description: Self::truncate(&attr.description, 60),
                        }
                    })
                    .collect();
                let mut output = format!("\n{}", name.bold());
                if !schema.description.is_empty() {
                    let _ = write!(output, ": {}", schema.description);
                }
                let _ = write!(output, "\n\n{}\n", Table::new(rows));
                output
            }
        }
    }

    /// Formats the registered type names.
    #[must_use]
    pub fn format_providers(&self, resources: &[&str], data_sources: &[&str]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "resources": resources,
                "data_sources": data_sources,
            })),
            OutputFormat::Text => {
                let mut output = format!("{}\n", "Resources:".bold());
                for name in resources {
                    let _ = writeln!(output, "   {name}");
                }
                let _ = writeln!(output, "\n{}", "Data sources:".bold());
                for name in data_sources {
                    let _ = writeln!(output, "   {name}");
                }
                output
            }
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, status: MessageKind, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": status.as_str(),
                "message": message,
            })),
            OutputFormat::Text => {
                let symbol = match status {
                    MessageKind::Success => "✓".green(),
                    MessageKind::Warning => "⚠".yellow(),
                    MessageKind::Error => "✗".red(),
                };
                format!("{symbol} {message}")
            }
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Read => "<=read".cyan().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

/// Kinds of one-line messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Something completed.
    Success,
    /// Something needs attention.
    Warning,
    /// Something failed.
    Error,
}

impl MessageKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    config_hash: String,
    creates: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    reads: usize,
    actions: Vec<ActionJson>,
}

#[derive(Serialize)]
struct ActionJson {
    action_type: String,
    address: String,
    reason: String,
    depends_on: Vec<usize>,
    changes: Vec<ChangeJson>,
}

#[derive(Serialize)]
struct ChangeJson {
    field: String,
    old: Option<String>,
    new: Option<String>,
    force_new: bool,
}

impl PlanJson {
    fn new(diff: &DiffResult, plan: &ExecutionPlan) -> Self {
        Self {
            config_hash: plan.config_hash.clone(),
            creates: diff.creates,
            updates: diff.updates,
            replaces: diff.replaces,
            deletes: diff.deletes,
            reads: diff.reads,
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    address: a.address.clone(),
                    reason: a.reason.clone(),
                    depends_on: a.dependencies.clone(),
                    changes: diff
                        .get(&a.address)
                        .filter(|_| a.action_type != ActionType::Delete)
                        .map(|d| {
                            d.details
                                .iter()
                                .map(|c| ChangeJson {
                                    field: c.field.clone(),
                                    old: c.old_value.clone(),
                                    new: c.new_value.clone(),
                                    force_new: c.force_new,
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::DriftedAttribute;
    use crate::state::ResourceState;
    use serde_json::json;

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a much longer reason", 10), "a much ...");
    }

    #[test]
    fn test_empty_plan_text() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let diff = DiffResult::default();
        let plan = ExecutionPlan::from_diff(&diff, "abcdef0123");
        assert!(formatter.format_plan(&diff, &plan, true).contains("No changes"));
    }

    #[test]
    fn test_drift_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let mut report = DriftReport {
            total_resources: 1,
            ..DriftReport::default()
        };
        report.drifted.insert(
            "datadog_team.core".into(),
            vec![DriftedAttribute {
                field: "name".into(),
                stored: Some("Core".into()),
                actual: Some("Core Team".into()),
            }],
        );
        let value: serde_json::Value = serde_json::from_str(&formatter.format_drift(&report)).unwrap();
        assert_eq!(value["drifted"]["datadog_team.core"][0]["actual"], "Core Team");
    }

    #[test]
    fn test_state_list() {
        let mut state = ProviderState::new();
        state.insert(
            "datadog_team.core",
            ResourceState::new("datadog_team", "core", "abc", json!({})),
        );
        let text = OutputFormatter::new(OutputFormat::Text).format_state_list(&state);
        assert!(text.contains("datadog_team.core"));
        let json = OutputFormatter::new(OutputFormat::Json).format_state_list(&state);
        assert_eq!(json, to_json(&["datadog_team.core"]));
    }

    #[test]
    fn test_message_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let value: serde_json::Value =
            serde_json::from_str(&formatter.message(MessageKind::Warning, "careful")).unwrap();
        assert_eq!(value["status"], "warning");
    }
}
