//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs   (axum router, tower layers: request id, trace, timeout)
//!     → fallback    (RequestContext → middleware chain)
//!     → response.rs (ctx.res → streamed response)
//!       or ServeDir when nothing responded
//!
//! /__dev/reload → websocket.rs (dev only)
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
