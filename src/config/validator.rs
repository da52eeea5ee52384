//! Workspace validation.
//!
//! This module checks a parsed workspace before anything talks to the API:
//! block names and addresses, registered types, attribute schemas,
//! references between blocks, and the state backend.

use crate::error::{ConfigError, ProviderError, Result};
use crate::provider::Provider;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::debug;
use validator::Validate;

use super::references::{dependency_graph, find_references, has_references, topological_order};
use super::spec::{BlockKind, ProviderSettings, StateBackend, StateConfig, WorkspaceConfig};

/// Validator for workspace files.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    provider: Provider,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// True when no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of errors.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Number of warnings.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ConfigValidator {
    /// Creates a validator that knows the built-in types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: Provider::new(),
        }
    }

    /// Creates a validator over a custom registry.
    #[must_use]
    pub const fn with_provider(provider: Provider) -> Self {
        Self { provider }
    }

    /// Validates a workspace.
    ///
    /// # Errors
    ///
    /// Returns the first error as a [`ConfigError::ValidationError`] when
    /// validation fails.
    pub fn validate(&self, config: &WorkspaceConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Workspace validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ProviderError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates a workspace and returns every finding.
    #[must_use]
    pub fn check(&self, config: &WorkspaceConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_provider(&config.provider, &mut result);
        Self::validate_state(&config.state, &mut result);
        self.validate_blocks(config, &mut result);
        Self::validate_references(config, &mut result);

        result
    }

    /// Validates provider settings.
    fn validate_provider(settings: &ProviderSettings, result: &mut ValidationResult) {
        if let Err(errors) = settings.validate() {
            for (field, problems) in errors.field_errors() {
                for problem in problems {
                    let message = problem
                        .message
                        .as_ref()
                        .map_or_else(|| format!("invalid value ({})", problem.code), ToString::to_string);
                    result.error(format!("provider.{field}"), message);
                }
            }
        }

        if let Some(url) = &settings.api_url {
            if let Err(e) = crate::provider::validate_api_url(url) {
                result.error("provider.api_url", e.to_string());
            }
        }

        if settings.api_key.is_some() || settings.app_key.is_some() {
            result.warnings.push(String::from(
                "provider: keys written in the workspace file; prefer DD_API_KEY and DD_APP_KEY",
            ));
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {}
        }
    }

    /// Validates every block against its registered schema.
    fn validate_blocks(&self, config: &WorkspaceConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in workspace"));
        }

        let mut seen = HashSet::new();
        for (kind, block) in config.blocks() {
            let address = kind.address_of(block);

            if !seen.insert(address.clone()) {
                result.error(
                    address.clone(),
                    ConfigError::DuplicateAddress {
                        block_kind: kind.to_string(),
                        address: address.clone(),
                    }
                    .to_string(),
                );
                continue;
            }

            if !is_valid_name(&block.name) {
                result.error(
                    format!("{address}.name"),
                    format!(
                        "Block name '{}' is invalid. Must start with a letter or underscore and contain only letters, digits, underscores and hyphens.",
                        block.name
                    ),
                );
            }

            let Some(schema) = self.provider.schema_for(kind, &block.block_type) else {
                result.error(
                    address.clone(),
                    ConfigError::UnknownType {
                        block_kind: kind.to_string(),
                        type_name: block.block_type.clone(),
                    }
                    .to_string(),
                );
                continue;
            };

            // Attributes holding references are only known at apply time.
            let mut attributes = block.attributes.clone();
            let referenced: BTreeSet<String> = attributes
                .as_object()
                .map(|obj| {
                    obj.iter()
                        .filter(|(_, v)| has_references(v))
                        .map(|(k, _)| k.clone())
                        .collect()
                })
                .unwrap_or_default();
            if let Value::Object(obj) = &mut attributes {
                for key in &referenced {
                    obj.remove(key);
                }
            }
            schema.coerce_config(&mut attributes);

            for err in schema.validate(&attributes) {
                let path = schema_error_path(&err);
                let top = path.split('.').next().unwrap_or_default();
                if referenced.contains(top) {
                    continue;
                }
                result.error(format!("{address}.{path}"), err.to_string());
            }

            if let Some(obj) = block.attributes.as_object() {
                for (name, attr) in &schema.attributes {
                    if let (Some(message), true) = (&attr.deprecated, obj.contains_key(name)) {
                        result
                            .warnings
                            .push(format!("{address}.{name}: deprecated: {message}"));
                    }
                }
            }
        }
    }

    /// Validates references and explicit dependencies.
    fn validate_references(config: &WorkspaceConfig, result: &mut ValidationResult) {
        let known: BTreeSet<String> = config
            .blocks()
            .map(|(kind, block)| kind.address_of(block))
            .collect();

        for (kind, block) in config.blocks() {
            let address = kind.address_of(block);
            for reference in find_references(&block.attributes) {
                if !known.contains(&reference.address) {
                    result.error(
                        address.clone(),
                        format!("reference to undeclared {} {reference}", reference_kind(&reference.address)),
                    );
                }
            }
            for dep in &block.depends_on {
                if !known.contains(dep) {
                    result.error(
                        format!("{address}.depends_on"),
                        format!("depends on undeclared block {dep}"),
                    );
                }
            }
        }

        let graph: BTreeMap<_, _> = dependency_graph(config);
        if let Err(e) = topological_order(&graph) {
            result.error("dependencies", e.to_string());
        }
    }
}

fn reference_kind(address: &str) -> BlockKind {
    super::references::address_kind(address)
}

fn schema_error_path(err: &crate::error::SchemaError) -> String {
    use crate::error::SchemaError;
    match err {
        SchemaError::InvalidValue { path, .. }
        | SchemaError::MissingRequired { path }
        | SchemaError::Conflict { path, .. }
        | SchemaError::UnknownAttribute { path } => path.clone(),
    }
}

/// Validates that a block name follows the naming convention.
/// Names start with a letter or underscore and contain letters, digits,
/// underscores and hyphens.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    // First character must be a letter or underscore
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> WorkspaceConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("cpu"));
        assert!(is_valid_name("cpu_high-2"));
        assert!(is_valid_name("_private"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("2cpu"));
        assert!(!is_valid_name("cpu.high"));
    }

    #[test]
    fn test_valid_workspace() {
        let config = parse(
            r#"
resources:
  - type: datadog_team
    name: core
    attributes:
      name: Core
      handle: core
      description: Core team
  - type: datadog_monitor
    name: cpu
    attributes:
      name: High CPU
      type: metric alert
      query: "avg(last_5m):avg:system.cpu.user{*} > 90"
      message: "CPU is high"
      restricted_roles: ["${datadog_role.ops.id}"]
  - type: datadog_role
    name: ops
    attributes:
      name: Ops
"#,
        );

        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_explicit_notify_no_data_conflicts_with_on_missing_data() {
        let config = parse(
            r#"
resources:
  - type: datadog_monitor
    name: cpu
    attributes:
      name: High CPU
      type: metric alert
      query: "avg(last_5m):avg:system.cpu.user{*} > 90"
      message: "CPU is high"
      notify_no_data: false
      on_missing_data: show_no_data
"#,
        );

        let result = ConfigValidator::new().check(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("conflicts with")), "{:?}", result.errors);

        let config = parse(
            r#"
resources:
  - type: datadog_monitor
    name: cpu
    attributes:
      name: High CPU
      type: metric alert
      query: "avg(last_5m):avg:system.cpu.user{*} > 90"
      message: "CPU is high"
      on_missing_data: show_no_data
"#,
        );
        assert!(ConfigValidator::new().check(&config).is_valid());
    }

    #[test]
    fn test_duplicate_and_unknown_blocks() {
        let config = parse(
            r"
resources:
  - type: datadog_team
    name: core
    attributes: { name: Core, handle: core, description: x }
  - type: datadog_team
    name: core
    attributes: { name: Core, handle: core, description: x }
  - type: datadog_pipeline
    name: logs
",
        );

        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 2);
        assert!(result.errors[0].message.contains("Duplicate"));
        assert!(result.errors[1].message.contains("datadog_pipeline"));
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_schema_errors_carry_address() {
        let config = parse(
            r"
resources:
  - type: datadog_team
    name: core
    attributes:
      handle: core
      description: x
      colour: blue
",
        );

        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"datadog_team.core.colour"));
        assert!(fields.contains(&"datadog_team.core.name"));
    }

    #[test]
    fn test_unknown_reference_and_cycle() {
        let config = parse(
            r#"
resources:
  - type: datadog_team
    name: a
    attributes: { name: "${datadog_team.b.name}", handle: a, description: x }
  - type: datadog_team
    name: b
    attributes: { name: "${datadog_team.a.name}", handle: b, description: x }
  - type: datadog_team
    name: c
    attributes: { name: "${datadog_team.zzz.name}", handle: c, description: x }
"#,
        );

        let result = ConfigValidator::new().check(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("undeclared resource ${datadog_team.zzz.name}")));
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Circular dependency")));
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let config = parse("state:\n  backend: s3\nresources: []\n");
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.errors[0].field, "state.bucket");
        assert_eq!(result.warnings, vec!["No resources defined in workspace"]);
    }

    #[test]
    fn test_provider_url_suffix() {
        let config = parse("provider:\n  api_url: https://api.datadoghq.com/api/\n");
        let result = ConfigValidator::new().check(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.field == "provider.api_url" && e.message.contains("/api/")));
    }
}
