//! Static build.
//!
//! # Data Flow
//! ```text
//! RouteTable::static_routes
//!     → tasks.rs   (payload files, then HTML files, then head fragment)
//!     → driver.rs  (write each task before pulling the next)
//!     → manifest.rs (static pathnames → files, dynamic patterns, modules)
//! ```
//!
//! # Design Decisions
//! - Sequential on purpose: one render in memory, reproducible output order
//! - HTML files re-render their payload instead of reading the payload file
//!   back, so the iterator works without a driver

pub mod driver;
pub mod error;
pub mod manifest;
pub mod tasks;

pub use driver::run_build;
pub use error::BuildError;
pub use manifest::BuildManifest;
pub use tasks::{BuildTasks, RenderTask, TaskKind};
