//! Module resolution seam.
//!
//! The component-authoring model and the bundler live outside this crate.
//! All the render pipeline needs from them is:
//! - resolve a module id to something loadable ([`ModuleResolver::resolve`])
//! - know whether a file declares itself a client boundary or server-only
//!   ([`ModuleResolver::directive`], [`detect_directive`])

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::middleware::context::RequestSnapshot;
use crate::render::error::RenderError;
use crate::render::tree::{ClientRef, Node, RenderProps};
use crate::routing::path::Params;
use crate::routing::table::RenderMode;

/// One entry of a page's static parameter sets: the concrete segments
/// substituted for the spec's variable segments, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticPath {
    Single(String),
    Segments(Vec<String>),
}

impl StaticPath {
    pub fn segments(&self) -> Vec<String> {
        match self {
            StaticPath::Single(s) => vec![s.clone()],
            StaticPath::Segments(v) => v.clone(),
        }
    }
}

/// Per-component route configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageConfig {
    pub render: RenderMode,
    pub static_paths: Vec<StaticPath>,
}

/// A server component.
#[async_trait]
pub trait Component: Send + Sync {
    fn config(&self) -> PageConfig {
        PageConfig::default()
    }

    async fn render(&self, props: &RenderProps) -> Result<Node, RenderError>;
}

/// Request handed to an API route.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub snapshot: Arc<RequestSnapshot>,
    pub params: Params,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".into(), "application/json".into())],
            body: Bytes::from(value.to_string()),
        }
    }
}

/// An API route handler.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, RenderError>;
}

/// Something a module id resolves to.
#[derive(Clone)]
pub enum ModuleRef {
    Component(Arc<dyn Component>),
    Api(Arc<dyn ApiHandler>),
}

impl std::fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleRef::Component(_) => f.write_str("ModuleRef::Component"),
            ModuleRef::Api(_) => f.write_str("ModuleRef::Api"),
        }
    }
}

/// Module-level directive found at the top of a source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    #[default]
    None,
    UseClient,
    UseServer,
}

impl Directive {
    pub fn parse(s: &str) -> Self {
        match s {
            "use client" => Directive::UseClient,
            "use server" => Directive::UseServer,
            _ => Directive::None,
        }
    }
}

/// Detect a leading `"use client"` / `"use server"` directive.
///
/// Blank lines and `//` comments before the directive are skipped; the
/// first other line decides.
pub fn detect_directive(source: &str) -> Directive {
    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let stmt = line.trim_end_matches(';').trim();
        let unquoted = stmt
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .or_else(|| stmt.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
        return unquoted.map(Directive::parse).unwrap_or_default();
    }
    Directive::None
}

/// Resolves module ids for the render pipeline.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, module_id: &str) -> Option<ModuleRef>;

    fn directive(&self, module_id: &str) -> Directive;

    /// Server-side stand-in for a client module during HTML rendering.
    ///
    /// `Ok(None)` renders the placeholder's children inside marker comments;
    /// `Err(RenderError::NoServerOutput)` leaves the subtree to the client.
    fn client_stand_in(&self, _client: &ClientRef) -> Result<Option<Node>, RenderError> {
        Ok(None)
    }
}

/// In-memory module table.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleRef>,
    directives: HashMap<String, Directive>,
    stand_ins: HashMap<String, Node>,
    client_only: HashSet<String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_component(&mut self, module_id: impl Into<String>, component: impl Component + 'static) {
        self.modules
            .insert(module_id.into(), ModuleRef::Component(Arc::new(component)));
    }

    pub fn register_api(&mut self, module_id: impl Into<String>, handler: impl ApiHandler + 'static) {
        self.modules
            .insert(module_id.into(), ModuleRef::Api(Arc::new(handler)));
    }

    /// Record a client-boundary module, optionally with a server stand-in.
    pub fn register_client(&mut self, module_id: impl Into<String>, stand_in: Option<Node>) {
        let module_id = module_id.into();
        self.directives.insert(module_id.clone(), Directive::UseClient);
        if let Some(node) = stand_in {
            self.stand_ins.insert(module_id, node);
        }
    }

    /// Mark a client module as having no server output at all.
    pub fn mark_client_only(&mut self, module_id: impl Into<String>) {
        let module_id = module_id.into();
        self.directives.insert(module_id.clone(), Directive::UseClient);
        self.client_only.insert(module_id);
    }

    pub fn set_directive(&mut self, module_id: impl Into<String>, directive: Directive) {
        self.directives.insert(module_id.into(), directive);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleResolver for ModuleRegistry {
    fn resolve(&self, module_id: &str) -> Option<ModuleRef> {
        self.modules.get(module_id).cloned()
    }

    fn directive(&self, module_id: &str) -> Directive {
        self.directives.get(module_id).copied().unwrap_or_default()
    }

    fn client_stand_in(&self, client: &ClientRef) -> Result<Option<Node>, RenderError> {
        if self.client_only.contains(&client.module_id) {
            return Err(RenderError::NoServerOutput);
        }
        Ok(self.stand_ins.get(&client.module_id).cloned())
    }
}
