//! Render subsystem.
//!
//! # Data Flow
//! ```text
//! RenderInput (pathname, query)
//!     → orchestrator.rs (slot plan: page → layouts → root)
//!     → components render, server nodes expanded
//!     → payload.rs (rows "<index>:<json>\n", root row last)
//!     → PayloadStream (bounded channel, backpressured)
//!
//! HTML request:
//!     PayloadStream bytes
//!     → html.rs (PayloadReader → DecodedTree → markup, client stand-ins)
//!     → shell.rs parts: preamble │ head │ mid │ body │ scripts │ postamble
//! ```
//!
//! # Design Decisions
//! - One serializer for both entry points; HTML is always derived from a
//!   payload, never rendered separately
//! - Every render runs in its own task writing into a bounded channel
//! - Shell split once at startup into three byte ranges

pub mod error;
pub mod file_module;
pub mod html;
pub mod module;
pub mod orchestrator;
pub mod payload;
pub mod shell;
pub mod stream;
pub mod tree;

pub use error::{RenderError, StatusError};
pub use module::{ApiHandler, Component, ModuleRegistry, ModuleResolver};
pub use orchestrator::{PayloadSource, RenderInput, RenderOptions, Renderer, StaticTree};
pub use shell::ShellParts;
pub use stream::{ByteStream, PayloadEvent, PayloadStream};
pub use tree::{Element, Node, RenderProps};
