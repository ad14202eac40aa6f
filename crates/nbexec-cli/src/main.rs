//! nbexec CLI - persistent execution coordinator for Jupyter notebooks.
//!
//! Without `--serve`, one JSON command is read from stdin:
//!
//! - `{"command":"start","options":{"port":P,"timeout":T}}` detaches a
//!   background server and returns.
//! - `{"command":"execute","options":{...}}` executes one notebook in this
//!   process, writing progress to stderr.

mod daemon;
mod execute;
mod logging;

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use nbexec_core::{Collaborators, ExecuteRequest, KernelRegistry, Orchestrator, ProcessLauncher};
use nbexec_server::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PORT, ServerConfig};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "nbexec")]
#[command(about = "Execute Jupyter notebooks on a persistent kernel")]
#[command(version)]
struct Cli {
    /// Run the execution server in the foreground
    #[arg(long)]
    serve: bool,

    /// Port to listen on (with --serve)
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for a request before exiting (with --serve)
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Command read from stdin.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", content = "options", rename_all = "snake_case")]
enum Command {
    Start(StartOptions),
    Execute(ExecuteRequest),
}

#[derive(Debug, Deserialize)]
struct StartOptions {
    port: u16,
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.serve {
        logging::init(cli.verbose, Some(Path::new(logging::LOG_FILE)))?;
        let config = ServerConfig {
            port: cli.port,
            idle_timeout: Duration::from_secs(cli.timeout),
            ..ServerConfig::default()
        };
        nbexec_server::serve(config, orchestrator()?).await?;
        return Ok(());
    }

    logging::init(cli.verbose, None)?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read command from stdin")?;
    let command: Command =
        serde_json::from_str(&input).context("Invalid command on stdin")?;

    match command {
        Command::Start(options) => {
            let pid = daemon::spawn(options.port, options.timeout, cli.verbose)?;
            tracing::info!("Started server (pid {}) on port {}", pid, options.port);
        }
        Command::Execute(request) => {
            tokio::task::spawn_blocking(move || execute::run(&request)).await??;
        }
    }

    Ok(())
}

/// Orchestrator running kernels from the kernel registry.
fn orchestrator() -> anyhow::Result<Orchestrator> {
    let registry = KernelRegistry::from_default_location().context("Failed to load kernel registry")?;
    if registry.is_empty() {
        tracing::warn!(
            "No kernels registered (see {})",
            KernelRegistry::default_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "$NBEXEC_KERNELS".to_string())
        );
    }
    Ok(Orchestrator::new(
        Box::new(ProcessLauncher::new(registry)),
        Collaborators::detect(),
    ))
}
