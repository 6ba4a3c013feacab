//! Startup wiring for `dev`, `start` and `build`.
//!
//! # Startup Sequence
//! 1. Load and validate config (caller)
//! 2. Scan pages, register modules, compile the route table
//! 3. Load the HTML shell
//! 4. Assemble the middleware chain for the mode
//! 5. Bind the listener and serve (caller)

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tower_http::services::ServeDir;

use crate::build::manifest::BuildManifest;
use crate::build::tasks::HEAD_FRAGMENT_FILE;
use crate::build::BuildError;
use crate::config::{AppConfig, ConfigError};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::middleware::dev::{DevMiddleware, ModuleManifest};
use crate::middleware::payload::PayloadMiddleware;
use crate::middleware::prebuilt::PrebuiltMiddleware;
use crate::middleware::setup::SetupMiddleware;
use crate::middleware::ssr::SsrMiddleware;
use crate::middleware::{Chain, Middleware};
use crate::net::listener::ListenerError;
use crate::render::file_module::ModuleLoadError;
use crate::render::module::ModuleRegistry;
use crate::render::orchestrator::{RenderOptions, Renderer};
use crate::render::shell::{load_shell, ShellError, ShellParts};
use crate::routing::scan::scan_pages;
use crate::routing::table::{RouteTable, TableError};
use crate::worker::{spawn_worker, WorkerError};

/// Registers modules that are not files: components and API handlers
/// written in Rust. Runs before every page scan, including dev reloads.
pub type Registrar = Arc<dyn Fn(&mut ModuleRegistry) + Send + Sync>;

/// A registrar that adds nothing.
pub fn no_modules() -> Registrar {
    Arc::new(|_: &mut ModuleRegistry| {})
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Modules(#[from] ModuleLoadError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Everything loaded once per process.
#[derive(Clone)]
pub struct Site {
    pub config: Arc<AppConfig>,
    pub registrar: Registrar,
    pub renderer: Arc<Renderer>,
    pub shell: Arc<ShellParts>,
}

impl Site {
    pub fn load(config: Arc<AppConfig>, registrar: Registrar) -> Result<Self, StartupError> {
        let renderer = Arc::new(load_renderer(&config, &registrar)?);
        let shell = Arc::new(load_shell(config.paths.shell.as_deref())?);
        Ok(Self {
            config,
            registrar,
            renderer,
            shell,
        })
    }
}

pub fn render_options(config: &AppConfig) -> RenderOptions {
    RenderOptions {
        channel_capacity: config.payload.channel_capacity,
        module_base: config.payload.module_base.clone(),
        max_depth: config.payload.max_depth,
    }
}

/// Scan pages and build a renderer over them.
///
/// Explicit `[[routes]]` replace the directory-derived table; page files
/// are still registered so routes can name them.
pub fn load_renderer(config: &AppConfig, registrar: &Registrar) -> Result<Renderer, StartupError> {
    let mut registry = ModuleRegistry::new();
    registrar(&mut registry);

    let pages_dir = &config.paths.pages_dir;
    let files = if pages_dir.is_dir() {
        scan_pages(pages_dir).map_err(|source| StartupError::Scan {
            path: pages_dir.clone(),
            source,
        })?
    } else {
        tracing::warn!(path = %pages_dir.display(), "Pages directory missing");
        Vec::new()
    };
    registry.load_pages(&files)?;

    let table = if config.routes.is_empty() {
        RouteTable::from_pages(&files, &registry)?
    } else {
        RouteTable::from_config(&config.routes, &registry)?
    };
    tracing::info!(
        routes = table.entries().len(),
        modules = registry.len(),
        "Site loaded"
    );
    Ok(Renderer::new(
        Arc::new(table),
        Arc::new(registry),
        render_options(config),
    ))
}

/// `dev`: payloads come from the render worker, pages hot reload.
pub fn dev_server(site: &Site, shutdown: &Shutdown) -> Result<HttpServer, StartupError> {
    let config = &site.config;
    let host = Arc::new(spawn_worker(config.clone(), site.registrar.clone(), shutdown)?);
    let modules = Arc::new(ModuleManifest::new());
    let prefix = config.payload_path_prefix();

    let chain: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(SetupMiddleware),
        Arc::new(DevMiddleware::new(modules.clone())),
        Arc::new(SsrMiddleware::new(
            site.renderer.clone(),
            site.shell.clone(),
            prefix.clone(),
        )),
        Arc::new(PayloadMiddleware::new(host.clone(), prefix).with_manifest(modules)),
    ];
    let state = AppState {
        chain: Chain::new(chain),
        assets: ServeDir::new(&config.paths.public_dir),
        reload: Some(host.reload_sender()),
    };
    tracing::info!(mode = "dev", "Middleware chain assembled");
    Ok(HttpServer::new(state, &config.timeouts))
}

/// `start`: prebuilt files first, live rendering for the rest.
pub fn start_server(site: &Site) -> Result<HttpServer, StartupError> {
    let config = &site.config;
    let manifest = Arc::new(BuildManifest::load(&config.paths.dist_dir)?);
    let output_dir = config.output_dir();
    let prefix = config.payload_path_prefix();
    let head = std::fs::read_to_string(output_dir.join(HEAD_FRAGMENT_FILE)).ok();

    let chain: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(SetupMiddleware),
        Arc::new(PrebuiltMiddleware::new(
            manifest,
            output_dir.clone(),
            prefix.clone(),
        )),
        Arc::new(
            SsrMiddleware::new(site.renderer.clone(), site.shell.clone(), prefix.clone())
                .with_extra_head(head),
        ),
        Arc::new(PayloadMiddleware::new(site.renderer.clone(), prefix)),
    ];
    let state = AppState {
        chain: Chain::new(chain),
        assets: ServeDir::new(output_dir),
        reload: None,
    };
    tracing::info!(mode = "start", "Middleware chain assembled");
    Ok(HttpServer::new(state, &config.timeouts))
}
