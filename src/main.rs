//! tf-datadog CLI entrypoint.
//!
//! This is the main entrypoint for the `tf-datadog` command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use terraform_provider_datadog::cli::{
    Cli, Commands, LogFormat, MessageKind, OutputFormatter, StateCommands,
};
use terraform_provider_datadog::client::HttpTransport;
use terraform_provider_datadog::config::{
    find_config_file, BlockKind, ConfigParser, ConfigValidator, WorkspaceConfig,
};
use terraform_provider_datadog::error::{ConfigError, ProviderError, Result, StateError};
use terraform_provider_datadog::provider::{Provider, ProviderConfiguration, ResolvedSettings};
use terraform_provider_datadog::reconciler::Reconciler;
use terraform_provider_datadog::state::{open_store, HistoryEntry, Operation, StateStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const CONFIG_TEMPLATE: &str = include_str!("../templates/datadog.tf.yaml");
const ENV_TEMPLATE: &str = include_str!("../templates/.env.example");

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings, offline } => {
            cmd_validate(config_path, warnings, offline, &formatter).await
        }
        Commands::Plan { detailed, refresh } => {
            cmd_plan(config_path, detailed, refresh, &formatter).await
        }
        Commands::Apply {
            yes,
            continue_on_error,
            max_attempts,
            refresh,
        } => {
            cmd_apply(
                config_path,
                yes,
                continue_on_error,
                max_attempts,
                refresh,
                &formatter,
            )
            .await
        }
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Refresh => cmd_refresh(config_path, &formatter).await,
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::Import { address, id } => {
            cmd_import(config_path, &address, &id, &formatter).await
        }
        Commands::Schema { type_name, data } => cmd_schema(type_name.as_deref(), data, &formatter),
        Commands::Providers => {
            let provider = Provider::new();
            println!(
                "{}",
                formatter.format_providers(&provider.resource_types(), &provider.data_source_types())
            );
            Ok(())
        }
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new workspace.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new workspace in: {}", path.display());

    let config_path = path.join("datadog.tf.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Workspace file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, CONFIG_TEMPLATE)?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, ENV_TEMPLATE)?;
    eprintln!("Created: {}", env_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", ".datadog/"]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# tf-datadog")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.datadog/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nWorkspace initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your keys");
    eprintln!("  2. Edit datadog.tf.yaml with the objects you want to manage");
    eprintln!("  3. Run 'tf-datadog validate' to check the workspace");
    eprintln!("  4. Run 'tf-datadog plan' to preview the changes");
    eprintln!("  5. Run 'tf-datadog apply' to create them");

    Ok(())
}

/// Validate the workspace, and the keys unless offline.
async fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    offline: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = load_workspace(config_path)?;

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));
    if !result.is_valid() {
        return Err(ConfigError::validation_general(format!(
            "{} validation error(s)",
            result.error_count()
        ))
        .into());
    }

    if offline {
        debug!("Skipping key validation");
    } else {
        connect(&config).await?;
        println!("{}", formatter.message(MessageKind::Success, "API keys are valid."));
    }

    eprintln!("\nWorkspace summary:");
    eprintln!("  Resources: {}", config.resources.len());
    eprintln!("  Data sources: {}", config.data.len());
    eprintln!("  State backend: {:?}", config.state.backend);

    Ok(())
}

/// Show what apply would change.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    refresh: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, workspace_dir) = load_validated_workspace(config_path)?;
    let store = open_store(&config.state, &workspace_dir).await?;
    let meta = connect(&config).await?;
    let provider = Provider::new();

    let reconciler =
        Reconciler::new(&config, &provider, &meta, store.as_ref()).with_refresh(refresh);
    let (diff, plan) = reconciler.plan().await?;

    println!("{}", formatter.format_plan(&diff, &plan, detailed));
    Ok(())
}

/// Apply the workspace.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    continue_on_error: bool,
    max_attempts: u32,
    refresh: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, workspace_dir) = load_validated_workspace(config_path)?;
    let store = open_store(&config.state, &workspace_dir).await?;
    let meta = connect(&config).await?;
    let provider = Provider::new();

    let reconciler = Reconciler::new(&config, &provider, &meta, store.as_ref())
        .with_refresh(refresh)
        .with_continue_on_error(continue_on_error)
        .with_max_attempts(max_attempts);

    let (diff, plan) = reconciler.plan().await?;
    if !plan.has_changes() {
        println!("{}", formatter.format_plan(&diff, &plan, false));
        return Ok(());
    }

    if !auto_approve {
        eprintln!("{}", formatter.format_plan(&diff, &plan, true));
        if !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    // Planning refreshed already.
    let result = reconciler.with_refresh(false).apply().await?;
    println!("{}", formatter.format_apply(&result));
    Ok(())
}

/// Delete every managed object.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, workspace_dir) = load_workspace(config_path)?;
    let store = open_store(&config.state, &workspace_dir).await?;

    let state = store.load_or_default().await?;
    if state.resources.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for (address, object) in &state.resources {
        eprintln!("  - {address} ({})", object.id);
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let meta = connect(&config).await?;
    let provider = Provider::new();
    let result = Reconciler::new(&config, &provider, &meta, store.as_ref())
        .destroy()
        .await?;

    println!("{}", formatter.format_destroy(&result));
    Ok(())
}

/// Refresh state from the API.
async fn cmd_refresh(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, workspace_dir) = load_validated_workspace(config_path)?;
    let store = open_store(&config.state, &workspace_dir).await?;
    let meta = connect(&config).await?;
    let provider = Provider::new();

    let summary = Reconciler::new(&config, &provider, &meta, store.as_ref())
        .refresh()
        .await?;
    println!("{}", formatter.format_refresh(&summary));
    Ok(())
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, workspace_dir) = load_validated_workspace(config_path)?;
    let store = open_store(&config.state, &workspace_dir).await?;
    let meta = connect(&config).await?;
    let provider = Provider::new();

    let report = Reconciler::new(&config, &provider, &meta, store.as_ref())
        .check_drift()
        .await?;
    println!("{}", formatter.format_drift(&report));
    Ok(())
}

/// Import an existing object.
async fn cmd_import(
    config_path: Option<&PathBuf>,
    address: &str,
    id: &str,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, workspace_dir) = load_workspace(config_path)?;
    let store = open_store(&config.state, &workspace_dir).await?;
    let meta = connect(&config).await?;
    let provider = Provider::new();

    let object = Reconciler::new(&config, &provider, &meta, store.as_ref())
        .import(address, id)
        .await?;
    println!(
        "{}",
        formatter.message(
            MessageKind::Success,
            &format!("Imported {address} (id {})", object.id)
        )
    );
    Ok(())
}

/// Print a schema.
fn cmd_schema(type_name: Option<&str>, data: bool, formatter: &OutputFormatter) -> Result<()> {
    let provider = Provider::new();
    let Some(type_name) = type_name else {
        println!(
            "{}",
            formatter.format_schema("provider", &Provider::provider_schema())
        );
        return Ok(());
    };

    let kind = if data { BlockKind::Data } else { BlockKind::Resource };
    let schema = provider
        .schema_for(kind, type_name)
        .ok_or_else(|| ConfigError::UnknownType {
            block_kind: kind.to_string(),
            type_name: type_name.to_string(),
        })?;
    println!("{}", formatter.format_schema(type_name, &schema));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, workspace_dir) = load_workspace(config_path)?;
    let store = open_store(&config.state, &workspace_dir).await?;

    match command {
        StateCommands::Show => match store.load().await? {
            Some(state) => println!("{}", formatter.format_state(&state)),
            None => eprintln!("No state found."),
        },
        StateCommands::List => {
            let state = store.load_or_default().await?;
            println!("{}", formatter.format_state_list(&state));
        }
        StateCommands::Rm { address } => {
            let lock = store.acquire_lock("").await?;
            let outcome = async {
                let mut state = store.load_or_default().await?;
                if state.remove(&address).is_none() {
                    return Err(ProviderError::from(StateError::ResourceNotInState {
                        address: address.clone(),
                    }));
                }
                state.add_history(HistoryEntry::new(Operation::Remove, vec![address.clone()]));
                state.touch();
                store.save(&state).await
            }
            .await;
            store.release_lock(&lock.lock_id).await?;
            outcome?;
            println!(
                "{}",
                formatter.message(MessageKind::Success, &format!("Removed {address} from state"))
            );
        }
        StateCommands::Lock { holder } => {
            let lock = store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            println!("{}", formatter.message(MessageKind::Success, &format!("State locked: {}", lock.lock_id)));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.get_lock_info().await? {
                    store.release_lock(&lock_info.lock_id).await?;
                    println!("{}", formatter.message(MessageKind::Warning, "State forcefully unlocked."));
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                println!("{}", formatter.message(MessageKind::Success, "State unlocked."));
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the workspace file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads the workspace file and the `.env` next to it.
fn load_workspace(config_path: Option<&PathBuf>) -> Result<(WorkspaceConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading workspace from: {}", config_file.display());

    let workspace_dir = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&workspace_dir);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;
    Ok((config, workspace_dir))
}

/// Loads the workspace and fails on the first validation error.
fn load_validated_workspace(config_path: Option<&PathBuf>) -> Result<(WorkspaceConfig, PathBuf)> {
    let (config, workspace_dir) = load_workspace(config_path)?;
    ConfigValidator::new().validate(&config)?;
    Ok((config, workspace_dir))
}

/// Configures the provider against the real API.
async fn connect(config: &WorkspaceConfig) -> Result<ProviderConfiguration> {
    let settings = ResolvedSettings::from_env(&config.provider)?;
    let transport = Arc::new(HttpTransport::new()?);
    ProviderConfiguration::configure(settings, transport).await
}

/// Prompts on stderr and compares the answer with `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}
