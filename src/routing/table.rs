//! Route table: compiled entries and lookup.
//!
//! # Responsibilities
//! - Build entries from explicit config or from a pages-directory scan
//! - Look up the page/API entry for a pathname
//! - Resolve the layout chain that wraps an entry
//! - Enumerate every concrete static pathname for the build
//!
//! # Design Decisions
//! - Immutable after construction, shared via `Arc`
//! - Entries ordered by specificity: literal, then group, then wildcard
//! - Static-path conflicts are rejected at construction, so the build never
//!   writes the same pathname twice

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RouteConfig;
use crate::render::module::{Directive, ModuleRef, ModuleResolver, StaticPath};
use crate::routing::path::{parse_spec, PathError, PathSegment, PathSpec, Params};
use crate::routing::scan::PageFile;

/// Pattern of the optional not-found page.
pub const NOT_FOUND_PATTERN: &str = "/404";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Page,
    Layout,
    Api,
    Root,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Static,
    Dynamic,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("module `{module}` for `{pattern}` could not be resolved")]
    UnresolvedModule { pattern: String, module: String },

    #[error("module `{module}` for `{pattern}` is not {expected}")]
    WrongModuleKind {
        pattern: String,
        module: String,
        expected: &'static str,
    },

    #[error("static page `{0}` has parameters but declares no static paths")]
    MissingStaticPaths(String),

    #[error("static routes `{first}` and `{second}` both resolve to `{pathname}`")]
    Conflict {
        pathname: String,
        first: String,
        second: String,
    },

    #[error("more than one root entry")]
    MultipleRoots,
}

/// A compiled route.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub pattern: String,
    pub spec: PathSpec,
    pub kind: RouteKind,
    pub render: RenderMode,
    pub module_id: String,
    pub static_paths: Vec<StaticPath>,
}

impl RouteEntry {
    pub fn is_static_page(&self) -> bool {
        self.kind == RouteKind::Page && self.render == RenderMode::Static
    }
}

/// One concrete pathname produced by a static page.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticRoute {
    pub pathname: String,
    pub pattern: String,
    pub params: Params,
}

/// Immutable route table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Validate and order a list of entries.
    pub fn new(mut entries: Vec<RouteEntry>) -> Result<Self, TableError> {
        if entries.iter().filter(|e| e.kind == RouteKind::Root).count() > 1 {
            return Err(TableError::MultipleRoots);
        }
        entries.sort_by(|a, b| {
            a.spec
                .specificity()
                .cmp(&b.spec.specificity())
                .then_with(|| a.pattern.cmp(&b.pattern))
        });
        let table = Self { entries };
        let static_routes = table.static_routes()?;
        tracing::info!(
            entries = table.entries.len(),
            static_pathnames = static_routes.len(),
            "Route table compiled"
        );
        Ok(table)
    }

    /// Build from explicit route configuration.
    pub fn from_config(
        routes: &[RouteConfig],
        resolver: &dyn ModuleResolver,
    ) -> Result<Self, TableError> {
        let entries = routes
            .iter()
            .map(|r| {
                compile_entry(
                    &r.path,
                    r.kind,
                    &r.module,
                    r.render,
                    r.static_paths.clone(),
                    resolver,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    /// Build from a pages-directory scan.
    ///
    /// `index` maps to its directory, `_layout` to a layout of its directory,
    /// a top-level `_root` to the root element. Other `_`-prefixed files and
    /// client-boundary files are not routes.
    pub fn from_pages(files: &[PageFile], resolver: &dyn ModuleResolver) -> Result<Self, TableError> {
        let mut entries = Vec::new();
        for file in files {
            if file.directive == Directive::UseClient {
                continue;
            }
            let Some((pattern, mut kind)) = route_for_module(&file.module_id) else {
                continue;
            };
            match resolver.resolve(&file.module_id) {
                Some(ModuleRef::Api(_)) if kind == RouteKind::Page => kind = RouteKind::Api,
                Some(_) => {}
                None if !file.is_json() => {
                    tracing::debug!(module = %file.module_id, "Skipping unresolved non-page file");
                    continue;
                }
                None => {}
            }
            entries.push(compile_entry(&pattern, kind, &file.module_id, None, None, resolver)?);
        }
        Self::new(entries)
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    /// Find the page or API entry for a pathname.
    pub fn match_page(&self, pathname: &str) -> Option<(&RouteEntry, Params)> {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, RouteKind::Page | RouteKind::Api))
            .find_map(|e| e.spec.matches(pathname).map(|params| (e, params)))
    }

    /// Layouts wrapping `entry`, outermost first.
    pub fn layouts_for(&self, entry: &RouteEntry) -> Vec<&RouteEntry> {
        let mut layouts: Vec<&RouteEntry> = self
            .entries
            .iter()
            .filter(|l| l.kind == RouteKind::Layout && !std::ptr::eq(*l, entry))
            .filter(|l| entry.spec.extends(&l.spec))
            .collect();
        layouts.sort_by_key(|l| l.spec.len());
        layouts
    }

    pub fn root(&self) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.kind == RouteKind::Root)
    }

    pub fn not_found(&self) -> Option<&RouteEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == RouteKind::Page && e.pattern == NOT_FOUND_PATTERN)
    }

    /// Patterns rendered per request (dynamic pages and API routes).
    pub fn dynamic_patterns(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| {
                e.kind == RouteKind::Api
                    || (e.kind == RouteKind::Page && e.render == RenderMode::Dynamic)
            })
            .map(|e| e.pattern.clone())
            .collect()
    }

    /// Every concrete pathname of every static page.
    ///
    /// A page's bindings are its own static paths plus the bindings of any
    /// ancestor layout that covers all of the page's variable segments.
    pub fn static_routes(&self) -> Result<Vec<StaticRoute>, TableError> {
        let mut routes = Vec::new();
        let mut owners: HashMap<String, String> = HashMap::new();

        for page in self.entries.iter().filter(|e| e.is_static_page()) {
            for (pathname, params) in self.bindings_for(page)? {
                if let Some(first) = owners.get(&pathname) {
                    return Err(TableError::Conflict {
                        pathname,
                        first: first.clone(),
                        second: page.pattern.clone(),
                    });
                }
                owners.insert(pathname.clone(), page.pattern.clone());
                routes.push(StaticRoute {
                    pathname,
                    pattern: page.pattern.clone(),
                    params,
                });
            }
        }
        Ok(routes)
    }

    fn bindings_for(&self, page: &RouteEntry) -> Result<Vec<(String, Params)>, TableError> {
        if let Some(path) = page.spec.literal_path() {
            return Ok(vec![(path, Params::new())]);
        }

        let page_vars = variable_count(&page.spec);
        let mut candidates: Vec<Vec<String>> =
            page.static_paths.iter().map(StaticPath::segments).collect();
        for layout in self.layouts_for(page) {
            if variable_count(&layout.spec) == page_vars {
                candidates.extend(layout.static_paths.iter().map(StaticPath::segments));
            }
        }
        if candidates.is_empty() {
            return Err(TableError::MissingStaticPaths(page.pattern.clone()));
        }

        let mut seen = BTreeSet::new();
        let mut bindings = Vec::new();
        for values in candidates {
            let (pathname, params) = page.spec.fill(&values)?;
            if seen.insert(pathname.clone()) {
                bindings.push((pathname, params));
            }
        }
        Ok(bindings)
    }
}

fn variable_count(spec: &PathSpec) -> usize {
    spec.segments()
        .iter()
        .filter(|s| !matches!(s, PathSegment::Literal { .. }))
        .count()
}

fn compile_entry(
    pattern: &str,
    kind: RouteKind,
    module_id: &str,
    render: Option<RenderMode>,
    static_paths: Option<Vec<StaticPath>>,
    resolver: &dyn ModuleResolver,
) -> Result<RouteEntry, TableError> {
    let spec = parse_spec(pattern)?;
    let module = resolver
        .resolve(module_id)
        .ok_or_else(|| TableError::UnresolvedModule {
            pattern: pattern.to_string(),
            module: module_id.to_string(),
        })?;

    let (render, static_paths) = match (kind, module) {
        (RouteKind::Api, ModuleRef::Api(_)) => (RenderMode::Dynamic, Vec::new()),
        (RouteKind::Api, ModuleRef::Component(_)) => {
            return Err(TableError::WrongModuleKind {
                pattern: pattern.to_string(),
                module: module_id.to_string(),
                expected: "an API handler",
            })
        }
        (_, ModuleRef::Api(_)) => {
            return Err(TableError::WrongModuleKind {
                pattern: pattern.to_string(),
                module: module_id.to_string(),
                expected: "a component",
            })
        }
        (_, ModuleRef::Component(component)) => {
            let config = component.config();
            (
                render.unwrap_or(config.render),
                static_paths.unwrap_or(config.static_paths),
            )
        }
    };

    Ok(RouteEntry {
        pattern: spec.to_string(),
        spec,
        kind,
        render,
        module_id: module_id.to_string(),
        static_paths,
    })
}

fn route_for_module(module_id: &str) -> Option<(String, RouteKind)> {
    let (dir, name) = module_id.rsplit_once('/').unwrap_or(("", module_id));
    let base = if dir.is_empty() {
        "/".to_string()
    } else {
        format!("/{dir}")
    };
    match name {
        "_root" if dir.is_empty() => Some((base, RouteKind::Root)),
        "_layout" => Some((base, RouteKind::Layout)),
        "index" => Some((base, RouteKind::Page)),
        n if n.starts_with('_') => None,
        n if dir.is_empty() => Some((format!("/{n}"), RouteKind::Page)),
        n => Some((format!("{base}/{n}"), RouteKind::Page)),
    }
}
