use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use actionbridge::engine::config::{find_catalog_path, CATALOG_ENV_VAR};
use actionbridge::engine::{CallOptions, CatalogFile, ToolEngine};
use actionbridge::executor::{ActionExecutor, ExecutorConfig};
use actionbridge::{default_log_path, init_tracing, LogTarget};

/// Tool invocation engine and action executor.
#[derive(Parser)]
#[command(name = "actionbridge", version, about, long_about = None)]
struct Cli {
    /// Catalog file (defaults to an upward search for actionbridge.yaml)
    #[arg(long, global = true, env = CATALOG_ENV_VAR)]
    catalog: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Write logs to the default file in the data directory
    #[arg(long, global = true, conflicts_with = "log_file")]
    log_to_data_dir: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the action executor over stdin/stdout
    Serve {
        /// Name reported in the initialize handshake
        #[arg(long, default_value = "actionbridge")]
        server_name: String,

        /// Fixed default subject (defaults to the parent process)
        #[arg(long)]
        foreground_pid: Option<u32>,

        /// Script time limit when a call does not set one
        #[arg(long, default_value_t = 30_000)]
        script_timeout_ms: u64,

        /// Upper bound a call may request for a script
        #[arg(long, default_value_t = 300_000)]
        max_script_timeout_ms: u64,

        /// Cap on per-call feedback and step delays
        #[arg(long, default_value_t = 10_000)]
        max_delay_ms: u64,

        /// Entries kept in the interaction history
        #[arg(long, default_value_t = 256)]
        history_capacity: usize,
    },
    /// Resolve and run one action
    Call {
        /// Action name or synonym
        action: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Caller name, checked against server visibility
        #[arg(long)]
        caller: Option<String>,

        /// Override the configured call timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Resolve an action without running it
    Resolve {
        action: String,

        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// List catalog tools, or ask a server for its tools
    Tools {
        /// Start this server and run discovery against it
        #[arg(long)]
        discover: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let target = match (&cli.log_file, cli.log_to_data_dir) {
        (Some(path), _) => LogTarget::File(path.clone()),
        (None, true) => LogTarget::File(default_log_path()),
        (None, false) => LogTarget::Stderr,
    };
    init_tracing(&target, cli.log_json).context("failed to initialize logging")?;

    match cli.command {
        Commands::Serve {
            server_name,
            foreground_pid,
            script_timeout_ms,
            max_script_timeout_ms,
            max_delay_ms,
            history_capacity,
        } => {
            let config = ExecutorConfig {
                server_name,
                default_script_timeout_ms: script_timeout_ms,
                max_script_timeout_ms,
                max_delay_ms,
                history_capacity,
                foreground_pid,
                ..ExecutorConfig::default()
            };
            let executor = Arc::new(ActionExecutor::headless(config));
            executor
                .serve(tokio::io::stdin(), tokio::io::stdout())
                .await
                .context("executor stopped with an I/O error")?;
        }
        Commands::Call {
            action,
            args,
            caller,
            timeout_ms,
        } => {
            let engine = open_engine(cli.catalog)?;
            let arguments = parse_args(&args)?;
            let options = CallOptions {
                caller,
                timeout: timeout_ms.map(Duration::from_millis),
            };
            let outcome = engine.call_with(&action, arguments, &options).await;
            engine.shutdown().await;
            let result = outcome.with_context(|| format!("call to '{action}' failed"))?;
            print_json(&result)?;
        }
        Commands::Resolve { action, args } => {
            let engine = open_engine(cli.catalog)?;
            let resolution = engine.resolve(&action, &parse_args(&args)?)?;
            print_json(&resolution)?;
        }
        Commands::Tools { discover } => {
            let engine = open_engine(cli.catalog)?;
            match discover {
                Some(server) => {
                    let outcome = engine.discover(&server).await;
                    engine.shutdown().await;
                    print_json(&outcome?)?;
                }
                None => {
                    let tools: Vec<_> = engine
                        .registry()
                        .tools()
                        .iter()
                        .map(|t| t.as_ref().clone())
                        .collect();
                    print_json(&tools)?;
                }
            }
        }
    }

    Ok(())
}

fn open_engine(catalog: Option<PathBuf>) -> Result<ToolEngine> {
    let path = match catalog {
        Some(path) => path,
        None => find_catalog_path(&std::env::current_dir()?)?,
    };
    tracing::info!(catalog = %path.display(), "loading catalog");
    ToolEngine::from_source(&CatalogFile::new(path)).context("failed to load catalog")
}

fn parse_args(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--args must be a JSON object")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
