//! CLI module for the `tf-datadog` tool.
//!
//! This module provides the command-line interface for planning and
//! applying Datadog workspaces.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::{MessageKind, OutputFormatter};
