//! Development render worker.
//!
//! # Data Flow
//! ```text
//! payload middleware
//!     → host.rs    (allocate id, send render frame, await first frame)
//!     ⇄ message.rs (newline-delimited JSON over an in-process byte channel)
//!     → runner.rs  (worker thread: render, stream buf/moduleId/end|err)
//!     ← host.rs    (demux by id into per-render streams)
//!
//! runner.rs page watcher → reload → full-reload frame → /__dev/reload clients
//! ```
//!
//! # Design Decisions
//! - The worker owns its own runtime and module set, so a reload never
//!   touches host state
//! - Correlation is keyed by render id; frames of different renders interleave
//! - There is no cancel frame. A host that stops consuming only drops later
//!   frames; the worker finishes producing the render anyway

pub mod host;
pub mod message;
pub mod runner;

use thiserror::Error;

pub use host::WorkerHost;
pub use message::{HostMessage, WorkerMessage};
pub use runner::{spawn_worker, Worker};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to start worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}
