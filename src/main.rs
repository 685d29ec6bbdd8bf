//! `gasmcpd` — binary entrypoint. Parses CLI flags, resolves config (CLI flag
//! / env var > `gasmcp.toml` > built-in default, per SPEC_FULL §10.1), wires
//! up the `GasApi` + `AuthProvider` pair, and either runs the stdio MCP
//! server loop (`serve`, the default) or prints diagnostics (`doctor`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gasmcpd::auth::{AuthProvider, EnvAuthProvider};
use gasmcpd::config::GasMcpConfig;
use gasmcpd::deployment::{DeploymentManager, DeploymentPriorStore};
use gasmcpd::gas_api::{GasApi, HttpGasApi};
use gasmcpd::mcp::transport::McpTransport;
use gasmcpd::mcp::GasMcpServer;

#[derive(Parser)]
#[command(
    name = "gasmcpd",
    about = "MCP stdio server exposing Google Apps Script projects to AI assistants",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Root directory under which every `project-<scriptId>/` mirror lives.
    #[arg(long, env = "GASMCP_REPOS_ROOT", global = true)]
    repos_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), or an `EnvFilter` string.
    #[arg(long, env = "GASMCP_LOG", global = true)]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the stdio MCP server loop (the default when no subcommand is given).
    Serve,
    /// Print resolved configuration and exit, without starting the server loop.
    ///
    /// Useful for verifying `--repos-root` and lock-directory permissions,
    /// and for recovering a project whose head-deployment invariant (spec
    /// §4.J) has been violated without going through an MCP client.
    Doctor {
        /// Destroy and recreate dev/staging/prod deployments for this project
        /// (`DeploymentManager::reset`), bypassing the tool surface.
        #[arg(long, value_name = "SCRIPT_ID")]
        reset_deployments: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let repos_root = args
        .repos_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&repos_root)
        .with_context(|| format!("creating repos-root '{}'", repos_root.display()))?;
    let config = GasMcpConfig::load(repos_root, args.log.clone());

    init_logging(&config.log);

    let auth: Arc<dyn AuthProvider> = Arc::new(EnvAuthProvider::new());
    let gas_api: Arc<dyn GasApi> = Arc::new(HttpGasApi::new(auth)?);

    match args.command {
        Some(Command::Doctor { reset_deployments }) => run_doctor(&config, gas_api, reset_deployments).await,
        None | Some(Command::Serve) => run_serve(config, gas_api).await,
    }
}

fn init_logging(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(log_level.to_string())
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Drives the newline-delimited JSON-RPC loop over real stdin/stdout.
/// Responses and requests both go over stdout/stdin; all logging goes to
/// stderr (`init_logging` above) so it never corrupts the wire protocol.
async fn run_serve(config: GasMcpConfig, gas_api: Arc<dyn GasApi>) -> Result<()> {
    tracing::info!(repos_root = %config.repos_root.display(), "gasmcpd starting");
    let server = GasMcpServer::new(config, gas_api);
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let mut transport = McpTransport::new(stdin, stdout);
    transport.run(&server).await
}

async fn run_doctor(config: &GasMcpConfig, gas_api: Arc<dyn GasApi>, reset_deployments: Option<String>) -> Result<()> {
    println!("gasmcpd doctor");
    println!("  repos_root:           {}", config.repos_root.display());
    println!("  log:                  {}", config.log);
    println!("  lock_timeout_secs:    {}", config.lock_timeout_secs);
    println!("  similarity_threshold: {}", config.similarity_threshold);
    println!("  hooks_enabled:        {}", config.hooks_enabled);

    match config.repos_root.metadata() {
        Ok(meta) if meta.permissions().readonly() => {
            println!("  repos_root writable:  NO (read-only)");
        }
        Ok(_) => println!("  repos_root writable:  yes"),
        Err(e) => println!("  repos_root writable:  unknown ({e})"),
    }

    if let Some(script_id) = reset_deployments {
        println!("\nresetting deployments for '{script_id}'...");
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(gas_api.as_ref(), &priors);
        let statuses = manager.reset(&script_id).await?;
        for status in statuses {
            println!(
                "  {}: version {:?}",
                status.environment.as_str(),
                status.version_number
            );
        }
    }

    Ok(())
}
