//! Build error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::AppError;
use crate::render::shell::ShellError;
use crate::routing::table::TableError;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error("rendering `{pathname}` failed: {source}")]
    Render {
        pathname: String,
        #[source]
        source: AppError,
    },

    #[error("manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}
