//! Claude Code Gateway - OpenAI-compatible chat completions over the Claude CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_code_gateway::config::{ConfigError, ConfigLoader, GatewayConfig};
use claude_code_gateway::gateway::Gateway;
use claude_code_gateway::server::GatewayServer;
use claude_code_gateway::session::SessionRegistry;

#[derive(Parser)]
#[command(
    name = "claude-code-gateway",
    about = "OpenAI-compatible chat completions backed by the Claude Code CLI",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API.
    Serve {
        /// Config file (default: search the usual locations).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Address to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind.
        #[arg(short, long)]
        port: Option<u16>,
        /// Path to the claude executable.
        #[arg(long)]
        claude_binary: Option<PathBuf>,
    },
    /// Print the resolved configuration as TOML.
    CheckConfig {
        /// Config file (default: search the usual locations).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    match path {
        Some(path) => ConfigLoader::with_path(path).load(),
        None => ConfigLoader::new().load(),
    }
}

async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let registry = Arc::new(SessionRegistry::new(&config.sessions.project_root));
    let sweeper = Arc::clone(&registry).spawn_sweeper(
        config.sessions.sweep_interval(),
        config.sessions.idle_ttl(),
        cancel.clone(),
    );
    let gateway = Arc::new(Gateway::new(registry, config.supervisor_options()));

    match gateway.supervisor().version().await {
        Ok(version) => tracing::info!(%version, "Found Claude CLI"),
        Err(e) => tracing::warn!(error = %e, "Claude CLI not usable; requests will fail"),
    }

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
            }
            cancel.cancel();
        }
    });

    tracing::info!(
        address = %config.bind_address(),
        project_root = %config.sessions.project_root.display(),
        max_concurrent = config.limits.max_concurrent_invocations,
        "Starting Claude Code gateway"
    );
    let result = GatewayServer::new(gateway, cancel.clone())
        .with_config(config.server)
        .run()
        .await;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Session sweeper task failed");
    }
    result.map_err(Into::into)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            claude_binary,
        } => match load_config(config) {
            Ok(mut config) => {
                if let Some(host) = host {
                    config.server.host = host;
                }
                if let Some(port) = port {
                    config.server.port = port;
                }
                if let Some(binary) = claude_binary {
                    config.process.binary = binary;
                }
                serve(config).await
            }
            Err(e) => Err(e.into()),
        },
        Commands::CheckConfig { config } => load_config(config)
            .and_then(|config| Ok(toml::to_string_pretty(&config)?))
            .map(|text| print!("{text}"))
            .map_err(Into::into),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
