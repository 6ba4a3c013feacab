//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerConfig (+ optional --port)
//!     → listener.rs (bind, retry next port on conflict)
//!     → tokio TcpListener handed to axum::serve
//! ```

pub mod listener;
