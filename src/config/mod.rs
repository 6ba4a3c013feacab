//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! render-router.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the dev worker reloads pages, not config
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
pub use schema::ListenerConfig;
pub use schema::RouteConfig;
