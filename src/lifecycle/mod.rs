//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! config → startup.rs (pages, route table, shell, middleware chain per mode)
//!        → HttpServer
//!
//! Ctrl+C → Shutdown::trigger
//!     → axum graceful shutdown (stop accepting, drain)
//!     → dev worker and reload sockets stop
//! ```

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Registrar, Site, StartupError};
