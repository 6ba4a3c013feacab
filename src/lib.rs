//! Request pipeline for a server-component framework.
//!
//! Paths resolve to nested page/layout component trees, which render to a
//! streamed wire payload for client reconciliation and to an HTML document
//! for first paint. The same renderer serves live requests, feeds the dev
//! worker and writes static builds.

pub mod build;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod net;
pub mod observability;
pub mod render;
pub mod routing;
pub mod worker;

pub use config::AppConfig;
pub use error::AppError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use render::Renderer;
