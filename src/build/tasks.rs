//! Pull-based build task iterator.
//!
//! Each call to [`BuildTasks::next`] renders exactly one file. Order is
//! fixed: every payload file, then every HTML file, then one head fragment
//! listing the client modules observed while rendering payloads.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use crate::build::error::BuildError;
use crate::build::manifest::StaticFiles;
use crate::error::AppError;
use crate::render::html::preload_links;
use crate::render::orchestrator::{RenderInput, Renderer};
use crate::render::shell::ShellParts;
use crate::render::stream::{payload_bytes, ByteStream, PayloadEvent};
use crate::routing::route_name::encode_route_name;
use crate::routing::table::StaticRoute;

/// File holding `modulepreload` links for every client module.
pub const HEAD_FRAGMENT_FILE: &str = "head-prefetch.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    PayloadFile,
    HtmlFile,
    HeadFragment,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PayloadFile => "payload",
            TaskKind::HtmlFile => "html",
            TaskKind::HeadFragment => "head",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderTask {
    pub target: PathBuf,
    pub kind: TaskKind,
    /// Pathname the file belongs to; `None` for the head fragment.
    pub pathname: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Payloads(usize),
    Html(usize),
    Head,
    Done,
}

pub struct BuildTasks {
    renderer: Arc<Renderer>,
    shell: Arc<ShellParts>,
    output_dir: PathBuf,
    payload_dir: String,
    routes: Vec<StaticRoute>,
    modules: Vec<String>,
    seen: HashSet<String>,
    phase: Phase,
}

impl BuildTasks {
    /// `payload_prefix` is the payload URL prefix, e.g. `RSC`.
    pub fn new(
        renderer: Arc<Renderer>,
        shell: Arc<ShellParts>,
        output_dir: impl Into<PathBuf>,
        payload_prefix: &str,
    ) -> Result<Self, BuildError> {
        let routes = renderer.table().static_routes()?;
        tracing::info!(static_pathnames = routes.len(), "Build planned");
        Ok(Self {
            renderer,
            shell,
            output_dir: output_dir.into(),
            payload_dir: payload_prefix.trim_matches('/').to_string(),
            routes,
            modules: Vec::new(),
            seen: HashSet::new(),
            phase: Phase::Payloads(0),
        })
    }

    /// Compute the next task, or `None` when the build is complete.
    pub async fn next(&mut self) -> Result<Option<RenderTask>, BuildError> {
        loop {
            match self.phase {
                Phase::Payloads(i) => {
                    let Some(pathname) = self.routes.get(i).map(|r| r.pathname.clone()) else {
                        self.phase = Phase::Html(0);
                        continue;
                    };
                    self.phase = Phase::Payloads(i + 1);
                    return self.payload_task(pathname).await.map(Some);
                }
                Phase::Html(i) => {
                    let Some(pathname) = self.routes.get(i).map(|r| r.pathname.clone()) else {
                        self.phase = Phase::Head;
                        continue;
                    };
                    self.phase = Phase::Html(i + 1);
                    return self.html_task(pathname).await.map(Some);
                }
                Phase::Head => {
                    self.phase = Phase::Done;
                    let links = preload_links(&self.renderer.options().module_base, &self.modules);
                    return Ok(Some(RenderTask {
                        target: self.output_dir.join(HEAD_FRAGMENT_FILE),
                        kind: TaskKind::HeadFragment,
                        pathname: None,
                        body: Bytes::from(links),
                    }));
                }
                Phase::Done => return Ok(None),
            }
        }
    }

    /// Client modules observed so far, in first-seen order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Manifest entries for every static pathname.
    pub fn static_files(&self) -> Result<BTreeMap<String, StaticFiles>, BuildError> {
        self.routes
            .iter()
            .map(|route| {
                let files = StaticFiles {
                    html: html_file(&route.pathname),
                    payload: self.payload_file(&route.pathname)?,
                };
                Ok((route.pathname.clone(), files))
            })
            .collect()
    }

    fn payload_file(&self, pathname: &str) -> Result<String, BuildError> {
        let name = encode_route_name(pathname).map_err(|e| render_failed(pathname, e.into()))?;
        Ok(format!("{}/{name}", self.payload_dir))
    }

    async fn payload_task(&mut self, pathname: String) -> Result<RenderTask, BuildError> {
        let target = self.output_dir.join(self.payload_file(&pathname)?);
        let mut stream = self
            .renderer
            .render_payload(&RenderInput::new(pathname.as_str()))
            .await
            .map_err(|e| render_failed(&pathname, e))?;

        let mut body = BytesMut::new();
        while let Some(event) = stream.next().await {
            match event.map_err(|e| render_failed(&pathname, e.into()))? {
                PayloadEvent::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadEvent::Module(id) => {
                    if self.seen.insert(id.clone()) {
                        self.modules.push(id);
                    }
                }
            }
        }
        Ok(RenderTask {
            target,
            kind: TaskKind::PayloadFile,
            pathname: Some(pathname),
            body: body.freeze(),
        })
    }

    async fn html_task(&mut self, pathname: String) -> Result<RenderTask, BuildError> {
        let payload = self
            .renderer
            .render_payload(&RenderInput::new(pathname.as_str()))
            .await
            .map_err(|e| render_failed(&pathname, e))?;
        let html = self
            .renderer
            .render_html(payload_bytes(payload), self.shell.clone(), None);
        let body = collect(html)
            .await
            .map_err(|e| render_failed(&pathname, e.into()))?;
        Ok(RenderTask {
            target: self.output_dir.join(html_file(&pathname)),
            kind: TaskKind::HtmlFile,
            pathname: Some(pathname),
            body,
        })
    }
}

/// `index.html` under the pathname's directory.
fn html_file(pathname: &str) -> String {
    let dir = pathname.trim_matches('/');
    if dir.is_empty() {
        "index.html".to_string()
    } else {
        format!("{dir}/index.html")
    }
}

fn render_failed(pathname: &str, source: AppError) -> BuildError {
    BuildError::Render {
        pathname: pathname.to_string(),
        source,
    }
}

async fn collect(mut stream: ByteStream) -> Result<Bytes, crate::render::RenderError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body.freeze())
}

/// Write one task, creating parent directories.
pub async fn write_task(task: &RenderTask) -> Result<(), BuildError> {
    if let Some(parent) = task.target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BuildError::io(parent, e))?;
    }
    tokio::fs::write(&task.target, &task.body)
        .await
        .map_err(|e| BuildError::io(&task.target, e))
}
