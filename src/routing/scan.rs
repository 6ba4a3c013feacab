//! Pages directory scan.
//!
//! Walks the pages directory once and reports every file with its module id
//! (relative path without extension, `/`-separated) and declared directive.
//! Both the module registry and the route table are built from this list.

use std::io;
use std::path::{Path, PathBuf};

use crate::render::module::{detect_directive, Directive};

/// A file found under the pages directory.
#[derive(Debug, Clone)]
pub struct PageFile {
    pub module_id: String,
    pub path: PathBuf,
    pub directive: Directive,
    pub source: String,
}

impl PageFile {
    pub fn is_json(&self) -> bool {
        self.path.extension().is_some_and(|e| e == "json")
    }
}

/// Scan `dir` recursively. Results are sorted by module id.
pub fn scan_pages(dir: &Path) -> io::Result<Vec<PageFile>> {
    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    files.sort_by(|a, b| a.module_id.cmp(&b.module_id));
    tracing::debug!(dir = %dir.display(), files = files.len(), "Pages scanned");
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PageFile>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        let Some(module_id) = module_id_for(root, &path) else {
            continue;
        };
        let source = match String::from_utf8(std::fs::read(&path)?) {
            Ok(source) => source,
            Err(_) => {
                tracing::warn!(path = %path.display(), "Skipping non-text file in pages directory");
                continue;
            }
        };
        let directive = if path.extension().is_some_and(|e| e == "json") {
            json_directive(&source)
        } else {
            detect_directive(&source)
        };
        out.push(PageFile {
            module_id,
            path,
            directive,
            source,
        });
    }
    Ok(())
}

fn module_id_for(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn json_directive(source: &str) -> Directive {
    serde_json::from_str::<serde_json::Value>(source)
        .ok()
        .and_then(|v| v.get("directive").and_then(|d| d.as_str()).map(Directive::parse))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_assigns_module_ids() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("index.json"), r#"{"tree":"home"}"#).unwrap();
        std::fs::write(dir.path().join("nested/[id].json"), r#"{"tree":"x"}"#).unwrap();
        std::fs::write(
            dir.path().join("Counter.json"),
            r#"{"directive":"use client","tree":"0"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("widget.js"), "'use client'\nexport default 1").unwrap();

        let files = scan_pages(dir.path()).unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.module_id.as_str()).collect();
        assert_eq!(ids, vec!["Counter", "index", "nested/[id]", "widget"]);
        assert_eq!(files[0].directive, Directive::UseClient);
        assert_eq!(files[1].directive, Directive::None);
        assert_eq!(files[3].directive, Directive::UseClient);
        assert!(!files[3].is_json());
    }

    #[test]
    fn test_binary_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.json"), r#"{"tree":"home"}"#).unwrap();
        std::fs::write(dir.path().join("logo.png"), [0x89, b'P', b'N', b'G', 0xff, 0xfe, 0x00]).unwrap();

        let files = scan_pages(dir.path()).unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.module_id.as_str()).collect();
        assert_eq!(ids, vec!["index"]);
    }
}
