//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tf-datadog - Declarative Datadog configuration.
#[derive(Parser, Debug)]
#[command(name = "tf-datadog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the workspace file.
    #[arg(short, long, global = true, env = "DATADOG_TF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new workspace.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the workspace file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,

        /// Skip checking the API keys against Datadog.
        #[arg(long)]
        offline: bool,
    },

    /// Show what apply would change.
    Plan {
        /// Show attribute level changes.
        #[arg(short, long)]
        detailed: bool,

        /// Refresh state from the API before planning.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        refresh: bool,
    },

    /// Apply the workspace to Datadog.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Keep going after a failed action.
        #[arg(long)]
        continue_on_error: bool,

        /// Retry failed actions this many times in total.
        #[arg(long, default_value = "1")]
        max_attempts: u32,

        /// Refresh state from the API before planning.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        refresh: bool,
    },

    /// Delete every managed object.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Re-read every managed object and update state.
    Refresh,

    /// Report attributes changed outside the workspace.
    Drift,

    /// Adopt an existing Datadog object into state.
    Import {
        /// Resource address, such as `datadog_monitor.cpu`.
        address: String,

        /// Datadog id of the object.
        id: String,
    },

    /// Print the provider, resource or data source schema.
    Schema {
        /// Type name; omit for the provider schema.
        type_name: Option<String>,

        /// Look up a data source instead of a resource.
        #[arg(long)]
        data: bool,
    },

    /// List registered resources and data sources.
    Providers,

    /// Manage state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// List tracked addresses.
    List,

    /// Forget an address without deleting the object.
    Rm {
        /// Address to remove.
        address: String,
    },

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}
