use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use terrace::cli::{AdminCommands, open_registry, report_error, run_admin};
use terrace::config::ServerConfig;
use terrace::server::{AppState, create_router};

#[derive(Parser)]
#[command(name = "terrace")]
#[command(about = "A self-hosted Terraform module registry", long_about = None)]
struct Cli {
    /// Registry configuration file (TOML). Environment variables override it.
    #[arg(long, global = true, env = "TERRACE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands against the local database and data directory
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1", env = "LISTEN_HOST")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "5000", env = "LISTEN_PORT")]
        port: u16,

        /// Public base URL for external access (e.g., "https://registry.example.com").
        /// Used for absolute download URLs. Relative URLs are emitted if not set.
        #[arg(long, env = "PUBLIC_URL")]
        public_base_url: Option<String>,
    },
}

async fn serve(config_path: Option<PathBuf>, server: ServerConfig) -> anyhow::Result<()> {
    let registry = open_registry(config_path.as_deref()).await?;

    if registry.config().admin_token.is_none() {
        warn!("ADMIN_AUTHENTICATION_TOKEN is not set; the admin API is disabled");
    }

    let state = Arc::new(AppState {
        registry: Arc::new(registry),
        public_base_url: server.public_base_url.clone(),
    });

    let app = create_router(state);
    let addr = server.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for shutdown signal: {e}");
            }
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("terrace=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => {
            if let Err(e) = run_admin(cli.config.as_deref(), command).await {
                report_error(&e);
                return Ok(ExitCode::from(e.kind().exit_code()));
            }
        }
        Commands::Serve {
            host,
            port,
            public_base_url,
        } => {
            let server = ServerConfig {
                host,
                port,
                public_base_url,
            };
            serve(cli.config, server).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
