//! CLI entry point.
//!
//! Grounded on `casparian/src/main.rs`'s shape: a `clap`-derive `Cli`/
//! `Commands`, a `run_command` dispatcher, and a `main` that wires
//! `tracing` before dispatching and turns the result into an `ExitCode`.
//! `warden` has no TUI, tape recording, or worker/sentinel split to set up,
//! so the surface here is a handful of subcommands against one `Runtime`
//! rather than the teacher's large `Commands` enum.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use warden_config::WorkflowConfig;
use warden_db::DbConfig;
use warden_logging::{init_logging, LogConfig};
use warden::Runtime;

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Security-check orchestrator")]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a workflow config file without starting anything.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Simulate one GitLab webhook delivery end to end against a database.
    Webhook {
        /// Path to the workflow config YAML.
        #[arg(long)]
        config: PathBuf,
        /// Database URL. Defaults to an in-memory sqlite database when the
        /// `sqlite` feature is the active backend.
        #[arg(long, env = "WARDEN_DATABASE_URL")]
        db_url: Option<String>,
        /// Value of the `X-Gitlab-Token` header.
        #[arg(long, env = "WARDEN_WEBHOOK_TOKEN")]
        token: String,
        /// Value of the `X-Gitlab-Event` header (e.g. "Push Hook").
        #[arg(long)]
        event: String,
        /// Path to a JSON file with the webhook body.
        #[arg(long)]
        payload: PathBuf,
    },
    /// Query the externally-visible status of a previously dispatched check.
    Status {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, env = "WARDEN_DATABASE_URL")]
        db_url: Option<String>,
        /// Input source name the check belongs to (currently always "gitlab").
        #[arg(long, default_value = "gitlab")]
        input: String,
        /// The check's `external_id`, as produced by `warden_protocol::security_id`.
        #[arg(long)]
        external_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Parse and validate a workflow config file.
    Check {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig { app_name: "warden", verbose: cli.verbose }) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {err:#}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run_command(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Config { action: ConfigAction::Check { path } } => {
            let config = WorkflowConfig::from_yaml_file(&path)?;
            println!("config at {} is valid", path.display());
            drop(config);
            Ok(())
        }
        Commands::Webhook { config, db_url, token, event, payload } => {
            let runtime = Runtime::bootstrap(&config, db_config(db_url), vec![token.clone()]).await?;
            let body = std::fs::read_to_string(&payload)?;
            let payload: serde_json::Value = serde_json::from_str(&body)?;

            match runtime.handle_webhook(&token, Some(event.as_str()), payload).await {
                Ok(reply) => {
                    println!("{}", serde_json::to_string_pretty(&reply)?);
                    Ok(())
                }
                Err(err) => {
                    eprintln!("webhook rejected (http {}): {err}", err.http_status());
                    Err(err.into())
                }
            }
        }
        Commands::Status { config, db_url, input, external_id } => {
            let runtime = Runtime::bootstrap(&config, db_config(db_url), Vec::new()).await?;
            let status = runtime.fetch_status(&input, &external_id).await?;
            println!("{}", serde_json::to_string(&status)?);
            Ok(())
        }
    }
}

fn db_config(db_url: Option<String>) -> DbConfig {
    match db_url {
        Some(url) => DbConfig::new(url),
        #[cfg(feature = "sqlite")]
        None => DbConfig::sqlite_memory(),
        #[cfg(not(feature = "sqlite"))]
        None => DbConfig::new("postgres://localhost/warden"),
    }
}
