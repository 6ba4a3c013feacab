//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     pages dir → scan.rs (module ids, directives)
//!     [[routes]] or scanned files
//!     → path.rs (parse patterns into PathSpecs)
//!     → table.rs (validate static bindings, order by specificity)
//!     → Freeze as immutable RouteTable
//!
//! Lookup:
//!     pathname → table.rs match_page → (RouteEntry, Params)
//!
//! Payload URLs:
//!     pathname ⇄ route_name.rs ⇄ "_/nested/foo.txt"
//! ```
//!
//! # Design Decisions
//! - Table compiled at startup, immutable at runtime
//! - No regex: literal segments, groups and one two-ended wildcard
//! - Deterministic: literal specs beat groups beat wildcards, then pattern order
//! - Static pathname conflicts are a startup error, not a runtime surprise

pub mod path;
pub mod route_name;
pub mod scan;
pub mod table;

pub use path::{parse_spec, ParamValue, Params, PathError, PathSpec};
pub use route_name::{decode_route_name, encode_route_name};
pub use table::{RenderMode, RouteEntry, RouteKind, RouteTable};
