// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]
#![warn(unused_imports)]
#![warn(unused_variables)]

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::cognitive_complexity)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # terraform-provider-datadog
//!
//! A declarative provider for Datadog: attribute schemas, CRUD over the
//! Datadog v1 and v2 APIs, persistent state and cassette-replayed tests.
//!
//! ## Overview
//!
//! The desired Datadog objects are declared in a YAML workspace file. The
//! engine compares them with the recorded state and converges the account:
//!
//! 1. **Workspace**: `datadog.tf.yaml`, resources and data sources
//! 2. **State**: attributes of every managed object, stored locally or in S3
//! 3. **Reconciler**: refreshes state, diffs, plans and executes CRUD calls
//!
//! ## Modules
//!
//! - [`config`]: workspace parsing, validation, hashing and references
//! - [`schema`]: attribute schemas and [`schema::ResourceData`]
//! - [`client`]: the Datadog HTTP client over a pluggable transport
//! - [`provider`]: provider settings, the registry and the resource traits
//! - [`resources`] and [`data_sources`]: the Datadog object types
//! - [`planner`]: diff computation, plans and execution
//! - [`reconciler`]: apply, refresh, drift, destroy and import
//! - [`state`]: state storage backends (local, S3)
//! - [`vcr`]: cassette record and replay for tests
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! provider:
//!   api_url: https://api.datadoghq.eu
//! resources:
//!   - type: datadog_team
//!     name: core
//!     attributes:
//!       name: Core
//!       handle: core
//!       description: The core team
//!   - type: datadog_monitor
//!     name: cpu
//!     attributes:
//!       name: High CPU
//!       type: metric alert
//!       query: avg(last_5m):avg:system.cpu.user{*} > 90
//!       message: CPU is high
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod resources;
pub mod schema;
pub mod state;
pub mod utils;
pub mod vcr;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use client::{DatadogClient, HttpTransport, Transport};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, WorkspaceConfig};
pub use error::{ProviderError, Result};
pub use planner::{DiffEngine, ExecutionPlan, PlanExecutor};
pub use provider::{DataSource, Provider, ProviderConfiguration, Resource};
pub use reconciler::{DestroyResult, DriftReport, ReconciliationResult, Reconciler};
pub use schema::{Attribute, ResourceData, Schema};
pub use state::{LocalStateStore, ProviderState, S3StateStore, StateStore};
pub use vcr::CassetteTransport;
