//! Backup Engine - command line front-end
//!
//! Runs one dump, restore or probe per invocation and prints the result as
//! JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use backup_engine::dialect::DialectRegistry;
use backup_engine::utils::{self, shutdown::ShutdownCoordinator};
use backup_engine::{archive, Config, Engine, JobHooks};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the job configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the configured databases to a file
    Dump {
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },
    /// Restore a dump or multi-database archive
    Restore {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
    /// Create restore target databases that do not exist yet
    Prepare {
        #[arg(value_name = "DATABASE", required = true)]
        databases: Vec<String>,
    },
    /// Check connectivity and report the server version
    Test,
    /// List user databases on the server
    Databases,
    /// List the databases found in an existing dump
    Analyze {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
    /// Print the manifest of a multi-database archive
    Inspect {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

impl Command {
    fn needs_engine_config(&self) -> bool {
        !matches!(self, Command::Analyze { .. } | Command::Inspect { .. })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let config = if args.command.needs_engine_config() {
        let config = Config::load(args.config.as_deref()).with_context(|| match &args.config {
            Some(path) => format!("Failed to load {}", path.display()),
            None => "Failed to load configuration from the environment".to_string(),
        })?;
        Some(config)
    } else {
        None
    };

    // Initialize logging
    let log_level = args
        .log_level
        .as_deref()
        .or(config.as_ref().map(|c| c.log.level.as_str()))
        .unwrap_or("info");
    utils::logger::init(log_level)?;

    tracing::info!("Starting backup-engine v{}", env!("CARGO_PKG_VERSION"));

    let engine = match &config {
        Some(config) => Engine::new(Arc::new(DialectRegistry::with_defaults()), config.settings()),
        None => Engine::with_defaults(),
    };

    // SIGINT/SIGTERM cancel the running job
    let shutdown = ShutdownCoordinator::new();
    let cancel = shutdown.token();
    let watcher = tokio::spawn(async move { shutdown.wait_for_signal().await });

    let outcome = execute(&engine, config.as_ref(), args.command, cancel).await;
    watcher.abort();

    let (value, success) = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn execute(
    engine: &Engine,
    config: Option<&Config>,
    command: Command,
    cancel: CancellationToken,
) -> Result<(serde_json::Value, bool)> {
    let hooks = JobHooks::new()
        .with_cancel(cancel)
        .with_progress(|percent| tracing::debug!(percent, "Progress"));
    let engine_config = || {
        config
            .map(|c| &c.engine)
            .context("This command needs an [engine] configuration")
    };

    match command {
        Command::Dump { output } => {
            let result = engine.dump(engine_config()?, &output, hooks).await;
            let success = result.success;
            Ok((serde_json::to_value(result)?, success))
        }
        Command::Restore { input } => {
            let result = engine.restore(engine_config()?, &input, hooks).await;
            let success = result.success;
            Ok((serde_json::to_value(result)?, success))
        }
        Command::Prepare { databases } => {
            engine.prepare_restore(engine_config()?, &databases).await?;
            Ok((json!({ "success": true, "databases": databases }), true))
        }
        Command::Test => {
            let result = engine.test(engine_config()?).await;
            let success = result.success;
            Ok((serde_json::to_value(result)?, success))
        }
        Command::Databases => {
            let databases = engine.get_databases(engine_config()?).await?;
            Ok((json!(databases), true))
        }
        Command::Analyze { input } => {
            let databases = engine.analyze_dump(&input).await?;
            Ok((json!(databases), true))
        }
        Command::Inspect { input } => {
            let manifest = archive::read_manifest(&input).await?;
            Ok((serde_json::to_value(manifest)?, true))
        }
    }
}
