//! render-router
//!
//! ```text
//! render-router dev   [--port N]   live rendering, dev worker, hot reload
//! render-router build              write static routes and manifest.json
//! render-router start [--port N]   serve the build, render dynamic routes live
//! ```
//!
//! All modes read `render-router.toml` unless `--config` points elsewhere.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use render_router::build::run_build;
use render_router::config::{load_config, AppConfig};
use render_router::lifecycle::startup::{dev_server, no_modules, start_server, Site, StartupError};
use render_router::net::listener;
use render_router::observability::{logging, metrics};
use render_router::{HttpServer, Shutdown};

const DEFAULT_CONFIG: &str = "render-router.toml";

#[derive(Debug, Parser)]
#[command(name = "render-router", version, about = "Server-component request pipeline")]
struct Cli {
    /// Config file. Defaults to ./render-router.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve with the dev worker and hot reload
    Dev {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Render every static route to the dist directory
    Build,
    /// Serve a finished build
    Start {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let config = match &cli.config {
        Some(path) => load_config(path, true)?,
        None => load_config(&PathBuf::from(DEFAULT_CONFIG), false)?,
    };
    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "render-router starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let config = Arc::new(config);
    let site = Site::load(config.clone(), no_modules())?;
    let shutdown = Shutdown::new();

    match cli.command {
        Command::Build => {
            run_build(&config, site.renderer.clone(), site.shell.clone()).await?;
            Ok(())
        }
        Command::Dev { port } => {
            let server = dev_server(&site, &shutdown)?;
            serve(server, &config, port, shutdown).await
        }
        Command::Start { port } => {
            let server = start_server(&site)?;
            serve(server, &config, port, shutdown).await
        }
    }
}

/// Serve until Ctrl+C, then give in-flight requests the drain period.
async fn serve(
    server: HttpServer,
    config: &AppConfig,
    port: Option<u16>,
    shutdown: Shutdown,
) -> Result<(), StartupError> {
    let listener = listener::bind(&config.listener, port).await?;
    let mut server_task = tokio::spawn(server.run(listener, shutdown.clone()));

    tokio::select! {
        result = &mut server_task => return joined(result),
        _ = shutdown.clone().trigger_on_ctrl_c() => {}
    }

    let drain = Duration::from_secs(config.timeouts.shutdown_secs);
    match tokio::time::timeout(drain, server_task).await {
        Ok(result) => joined(result)?,
        Err(_) => tracing::warn!(drain_secs = drain.as_secs(), "Drain period elapsed; forcing shutdown"),
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn joined(result: Result<std::io::Result<()>, tokio::task::JoinError>) -> Result<(), StartupError> {
    match result {
        Ok(served) => served.map_err(StartupError::Serve),
        Err(e) => Err(StartupError::Serve(std::io::Error::other(e))),
    }
}
