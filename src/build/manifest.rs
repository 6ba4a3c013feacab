//! Build manifest.
//!
//! Written last by the build and read once by `start`. It tells the
//! prebuilt middleware which pathnames have files on disk; everything else
//! is either a dynamic route or a plain static asset.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::build::error::BuildError;
use crate::routing::path::parse_spec;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Files of one static pathname, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticFiles {
    pub html: String,
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    #[serde(rename = "static")]
    pub static_routes: BTreeMap<String, StaticFiles>,
    /// Patterns rendered per request.
    pub dynamic: Vec<String>,
    /// Client module ids observed during the build.
    pub modules: Vec<String>,
}

impl BuildManifest {
    pub fn lookup(&self, pathname: &str) -> Option<&StaticFiles> {
        self.static_routes.get(pathname).or_else(|| {
            let trimmed = pathname.trim_end_matches('/');
            if trimmed.len() == pathname.len() {
                return None;
            }
            self.static_routes
                .get(if trimmed.is_empty() { "/" } else { trimmed })
        })
    }

    pub fn is_dynamic(&self, pathname: &str) -> bool {
        self.dynamic
            .iter()
            .filter_map(|pattern| parse_spec(pattern).ok())
            .any(|spec| spec.matches(pathname).is_some())
    }

    pub fn load(dist_dir: &Path) -> Result<Self, BuildError> {
        let path = dist_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| BuildError::io(&path, e))?;
        let manifest: Self = serde_json::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            static_pathnames = manifest.static_routes.len(),
            dynamic_patterns = manifest.dynamic.len(),
            "Build manifest loaded"
        );
        Ok(manifest)
    }

    pub async fn write(&self, dist_dir: &Path) -> Result<(), BuildError> {
        let path = dist_dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| BuildError::io(&path, e))
    }
}
