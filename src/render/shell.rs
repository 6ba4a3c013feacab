//! HTML shell template.
//!
//! The shell is a full document carrying two marker pairs. Head content is
//! injected between the first pair, the rendered body between the second:
//!
//! ```text
//! <html><head>...<!--placeholder1-->HEAD<!--/placeholder1-->...</head>
//! <body><!--placeholder2-->BODY<!--/placeholder2--></body></html>
//! |--------- preamble ---------|      |---------- mid ----------|      |- postamble -|
//! ```
//!
//! Anything already between a marker pair is dropped. A shell missing a
//! marker, or carrying one twice or out of order, is rejected at startup.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;

pub const HEAD_OPEN: &str = "<!--placeholder1-->";
pub const HEAD_CLOSE: &str = "<!--/placeholder1-->";
pub const BODY_OPEN: &str = "<!--placeholder2-->";
pub const BODY_CLOSE: &str = "<!--/placeholder2-->";

const MARKERS: [&str; 4] = [HEAD_OPEN, HEAD_CLOSE, BODY_OPEN, BODY_CLOSE];

pub const DEFAULT_SHELL: &str = concat!(
    "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
    "<!--placeholder1--><!--/placeholder1-->",
    "</head><body>",
    "<!--placeholder2--><!--/placeholder2-->",
    "</body></html>"
);

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("shell is missing marker `{0}`")]
    MissingMarker(&'static str),

    #[error("shell contains marker `{0}` more than once")]
    DuplicateMarker(&'static str),

    #[error("shell marker `{0}` is out of order")]
    OutOfOrder(&'static str),

    #[error("failed to read shell {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The three static pieces of the shell around the two injection points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellParts {
    pub preamble: Bytes,
    pub mid: Bytes,
    pub postamble: Bytes,
}

impl ShellParts {
    pub fn parse(html: &str) -> Result<Self, ShellError> {
        let mut positions = [0usize; 4];
        for (slot, marker) in MARKERS.iter().enumerate() {
            let mut found = html.match_indices(marker);
            let Some((pos, _)) = found.next() else {
                return Err(ShellError::MissingMarker(marker));
            };
            if found.next().is_some() {
                return Err(ShellError::DuplicateMarker(marker));
            }
            positions[slot] = pos;
        }
        for (i, pair) in positions.windows(2).enumerate() {
            if pair[0] + MARKERS[i].len() > pair[1] {
                return Err(ShellError::OutOfOrder(MARKERS[i + 1]));
            }
        }

        let [head_open, head_close, body_open, body_close] = positions;
        Ok(Self {
            preamble: Bytes::copy_from_slice(html[..head_open + HEAD_OPEN.len()].as_bytes()),
            mid: Bytes::copy_from_slice(html[head_close..body_open + BODY_OPEN.len()].as_bytes()),
            postamble: Bytes::copy_from_slice(html[body_close..].as_bytes()),
        })
    }
}

impl Default for ShellParts {
    fn default() -> Self {
        // The built-in shell always parses.
        Self::parse(DEFAULT_SHELL).unwrap_or_else(|_| Self {
            preamble: Bytes::new(),
            mid: Bytes::new(),
            postamble: Bytes::new(),
        })
    }
}

/// Load the configured shell, or the built-in one.
pub fn load_shell(path: Option<&Path>) -> Result<ShellParts, ShellError> {
    let Some(path) = path else {
        return Ok(ShellParts::default());
    };
    let html = std::fs::read_to_string(path).map_err(|source| ShellError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parts = ShellParts::parse(&html)?;
    tracing::info!(path = %path.display(), "Shell template loaded");
    Ok(parts)
}
