//! Request middleware chain.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → setup.rs      (request id, timing, metrics)
//!     → dev.rs        (dev only: /__dev/modules, no-store)
//!       prebuilt.rs   (start only: files from the build manifest)
//!     → ssr.rs        (API routes; HTML pages via a nested payload request)
//!     → payload.rs    (/<prefix>/<route name> → wire payload)
//!     → nothing responded: static asset service
//! ```
//!
//! # Design Decisions
//! - Chain built once per process, handlers in fixed order
//! - Handlers share one mutable context; renderers only see snapshots
//! - `next()` is guarded: a second call in one invocation is a no-op

pub mod chain;
pub mod context;
pub mod dev;
pub mod payload;
pub mod prebuilt;
pub mod setup;
pub mod ssr;

pub use chain::{Chain, Middleware, Next};
pub use context::{RequestContext, RequestSnapshot};
