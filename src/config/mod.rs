//! Workspace configuration.
//!
//! This module handles everything about the `datadog.tf.yaml` file:
//! - Parsing, `.env` loading and `DD_*` environment overrides
//! - References between blocks and their dependency order
//! - Validation against the registered schemas
//! - Hashing for change detection

mod hash;
mod parser;
mod references;
mod spec;
mod validator;

pub use hash::{canonical_json, ConfigHasher};
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use references::{
    address_kind, dependency_graph, find_references, has_references, resolve_references,
    topological_order, Reference,
};
pub use spec::{BlockConfig, BlockKind, ProviderSettings, StateBackend, StateConfig, WorkspaceConfig};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
