//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file is a valid configuration
//! that scans `pages/` and serves `public/`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::render::module::StaticPath;
use crate::routing::table::{RenderMode, RouteKind};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, port retries).
    pub listener: ListenerConfig,

    /// Input and output directories.
    pub paths: PathsConfig,

    /// Payload endpoint settings.
    pub payload: PayloadConfig,

    /// Explicit route entries. When empty the pages directory is scanned.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Development server settings.
    pub dev: DevConfig,

    /// Build output settings.
    pub build: BuildConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind_address: String,

    /// How many successive ports to try when the configured one is taken.
    pub port_retries: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            port_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Page, layout and client module sources.
    pub pages_dir: PathBuf,

    /// Static assets served when no route handles a request.
    pub public_dir: PathBuf,

    /// Build output root.
    pub dist_dir: PathBuf,

    /// HTML shell template; the built-in shell is used when unset.
    pub shell: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pages_dir: PathBuf::from("pages"),
            public_dir: PathBuf::from("public"),
            dist_dir: PathBuf::from("dist"),
            shell: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// URL prefix of the payload endpoint, without slashes.
    pub prefix: String,

    /// Public URL prefix of client module scripts.
    pub module_base: String,

    /// Bounded channel size between serializer and response body.
    pub channel_capacity: usize,

    /// Maximum nesting of server components.
    pub max_depth: usize,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            prefix: "RSC".to_string(),
            module_base: "/assets/".to_string(),
            channel_capacity: 16,
            max_depth: 64,
        }
    }
}

/// One explicit route.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RouteConfig {
    /// Path pattern, e.g. `/nested/[id]`.
    pub path: String,

    pub kind: RouteKind,

    /// Module id resolved through the module registry.
    pub module: String,

    /// Overrides the component's own render mode.
    #[serde(default)]
    pub render: Option<RenderMode>,

    /// Overrides the component's own static parameter sets.
    #[serde(default)]
    pub static_paths: Option<Vec<StaticPath>>,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Graceful shutdown drain period in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DevConfig {
    /// Quiet period after a file change before the worker reloads.
    pub debounce_ms: u64,

    /// Outbound frame queue between host and worker.
    pub channel_capacity: usize,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory under `dist_dir` receiving pages and payload files.
    pub public_subdir: String,

    /// Copy `public_dir` into the output before rendering.
    pub copy_public: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            public_subdir: "public".to_string(),
            copy_public: true,
        }
    }
}

impl AppConfig {
    /// Output directory of static files.
    pub fn output_dir(&self) -> PathBuf {
        self.paths.dist_dir.join(&self.build.public_subdir)
    }

    /// `/<prefix>/` as it appears in request paths.
    pub fn payload_path_prefix(&self) -> String {
        format!("/{}/", self.payload.prefix.trim_matches('/'))
    }
}
