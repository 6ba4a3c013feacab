//! Render orchestrator.
//!
//! Turns a pathname into a slot plan (page, layouts, root), expands server
//! components, and drives the payload serializer. The HTML entry point
//! consumes a payload byte stream, so it works the same whether the payload
//! came from this process or from the dev worker.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{AppError, RoutingError};
use crate::render::error::RenderError;
use crate::render::html::{interleave, HtmlOptions};
use crate::render::module::{ApiHandler, Component, Directive, ModuleRef, ModuleResolver};
use crate::render::payload::{check_slot_name, PayloadWriter};
use crate::render::shell::ShellParts;
use crate::render::stream::{receiver_stream, settle, ByteStream, EventSender, PayloadEvent, PayloadStream};
use crate::render::tree::{Node, RenderProps};
use crate::routing::path::Params;
use crate::routing::table::{RouteKind, RouteTable};

pub const ROOT_SLOT: &str = "root";

/// Route input for one render; also the worker channel's request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInput {
    pub pathname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl RenderInput {
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            query: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Bounded channel size between serializer and consumer.
    pub channel_capacity: usize,
    /// URL prefix for client module scripts.
    pub module_base: String,
    /// Maximum nesting of server components.
    pub max_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            module_base: "/assets/".to_string(),
            max_depth: 64,
        }
    }
}

/// One slot to render.
#[derive(Clone)]
pub struct PlannedSlot {
    pub name: String,
    pub module_id: String,
    pub component: Arc<dyn Component>,
}

impl std::fmt::Debug for PlannedSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedSlot")
            .field("name", &self.name)
            .field("module_id", &self.module_id)
            .finish()
    }
}

/// Slots for one pathname, innermost (the page) first.
#[derive(Debug, Clone)]
pub struct SlotPlan {
    pub props: RenderProps,
    pub slots: Vec<PlannedSlot>,
}

impl SlotPlan {
    /// The outermost slot, named by the root row's entry key.
    pub fn entry(&self) -> Option<&str> {
        self.slots.last().map(|s| s.name.as_str())
    }
}

/// Anything that can produce a payload stream for a route.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn render(&self, input: RenderInput) -> Result<PayloadStream, AppError>;
}

/// A component returning a prebuilt tree.
#[derive(Debug, Clone)]
pub struct StaticTree(pub Node);

#[async_trait]
impl Component for StaticTree {
    async fn render(&self, _props: &RenderProps) -> Result<Node, RenderError> {
        Ok(self.0.clone())
    }
}

pub struct Renderer {
    table: Arc<RouteTable>,
    modules: Arc<dyn ModuleResolver>,
    options: RenderOptions,
}

impl Renderer {
    pub fn new(table: Arc<RouteTable>, modules: Arc<dyn ModuleResolver>, options: RenderOptions) -> Self {
        Self {
            table,
            modules,
            options,
        }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub fn modules(&self) -> &Arc<dyn ModuleResolver> {
        &self.modules
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Resolve the page, its layouts and the root for a pathname.
    pub fn slots_for(&self, input: &RenderInput) -> Result<SlotPlan, AppError> {
        let not_found = || RoutingError {
            pathname: input.pathname.clone(),
        };
        let (page, params) = self.table.match_page(&input.pathname).ok_or_else(not_found)?;
        if page.kind != RouteKind::Page {
            return Err(not_found().into());
        }

        let mut slots = vec![self.planned(format!("page:{}", input.pathname), &page.module_id)?];
        for layout in self.table.layouts_for(page).into_iter().rev() {
            slots.push(self.planned(format!("layout:{}", layout.pattern), &layout.module_id)?);
        }
        if let Some(root) = self.table.root() {
            slots.push(self.planned(ROOT_SLOT.to_string(), &root.module_id)?);
        }

        Ok(SlotPlan {
            props: RenderProps {
                pathname: input.pathname.clone(),
                params,
                query: input.query.clone(),
                props: Default::default(),
            },
            slots,
        })
    }

    fn planned(&self, name: String, module_id: &str) -> Result<PlannedSlot, RenderError> {
        check_slot_name(&name)?;
        let component = component_for(self.modules.as_ref(), module_id)?;
        Ok(PlannedSlot {
            name,
            module_id: module_id.to_string(),
            component,
        })
    }

    /// Serialize a slot plan. Production runs in its own task and stops as
    /// soon as the returned stream is dropped.
    pub fn render_slots(&self, plan: SlotPlan) -> PayloadStream {
        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let modules = self.modules.clone();
        let max_depth = self.options.max_depth;

        tokio::spawn(async move {
            let pathname = plan.props.pathname.clone();
            match produce(plan, modules, max_depth, &tx).await {
                Ok(rows) => tracing::debug!(pathname = %pathname, rows, "Payload rendered"),
                Err(RenderError::Closed) => {
                    tracing::debug!(pathname = %pathname, "Payload consumer went away; render stopped")
                }
                Err(e) => {
                    tracing::warn!(pathname = %pathname, error = %e, "Payload render failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        receiver_stream(rx)
    }

    /// Route and serialize. Failures before the first row come back as `Err`.
    pub async fn render_payload(&self, input: &RenderInput) -> Result<PayloadStream, AppError> {
        let plan = self.slots_for(input)?;
        Ok(settle(self.render_slots(plan)).await?)
    }

    /// Splice a payload byte stream into the shell.
    pub fn render_html(&self, payload: ByteStream, shell: Arc<ShellParts>, extra_head: Option<String>) -> ByteStream {
        interleave(
            payload,
            shell,
            self.modules.clone(),
            HtmlOptions {
                module_base: self.options.module_base.clone(),
                extra_head,
                channel_capacity: self.options.channel_capacity,
            },
        )
    }

    /// API handler for a pathname, if an API route matches.
    pub fn match_api(&self, pathname: &str) -> Option<(Arc<dyn ApiHandler>, Params)> {
        let (entry, params) = self.table.match_page(pathname)?;
        if entry.kind != RouteKind::Api {
            return None;
        }
        match self.modules.resolve(&entry.module_id) {
            Some(ModuleRef::Api(handler)) => Some((handler, params)),
            _ => None,
        }
    }
}

#[async_trait]
impl PayloadSource for Renderer {
    async fn render(&self, input: RenderInput) -> Result<PayloadStream, AppError> {
        self.render_payload(&input).await
    }
}

fn component_for(modules: &dyn ModuleResolver, module_id: &str) -> Result<Arc<dyn Component>, RenderError> {
    if modules.directive(module_id) == Directive::UseClient {
        return Err(RenderError::NotAComponent(module_id.to_string()));
    }
    match modules.resolve(module_id) {
        Some(ModuleRef::Component(component)) => Ok(component),
        Some(ModuleRef::Api(_)) => Err(RenderError::NotAComponent(module_id.to_string())),
        None => Err(RenderError::UnresolvedModule(module_id.to_string())),
    }
}

async fn send(tx: &EventSender<PayloadEvent>, event: PayloadEvent) -> Result<(), RenderError> {
    tx.send(Ok(event)).await.map_err(|_| RenderError::Closed)
}

/// Render every slot innermost first, then the root row. Returns the row count.
async fn produce(
    plan: SlotPlan,
    modules: Arc<dyn ModuleResolver>,
    max_depth: usize,
    tx: &EventSender<PayloadEvent>,
) -> Result<usize, RenderError> {
    let mut writer = PayloadWriter::new();
    let mut written: Vec<(String, usize)> = Vec::with_capacity(plan.slots.len());
    let mut rows = 0;

    for slot in &plan.slots {
        let node = match slot.component.render(&plan.props).await {
            Ok(node) => node,
            Err(RenderError::NoServerOutput) => Node::Empty,
            Err(e) => return Err(e),
        };
        let node = expand(node, modules.as_ref(), &plan.props, 0, max_depth).await?;

        let child_slot = written.last().map(|(name, _)| name.as_str());
        let (index, encoded) = writer.write_slot(&node, child_slot)?;
        for module_id in encoded.new_modules {
            send(tx, PayloadEvent::Module(module_id)).await?;
        }
        rows += encoded.rows.len();
        for row in encoded.rows {
            send(tx, PayloadEvent::Chunk(row)).await?;
        }
        written.push((slot.name.clone(), index));
    }

    let entry = written
        .last()
        .map(|(name, _)| name.clone())
        .ok_or_else(|| RenderError::Component("nothing to render".into()))?;
    send(tx, PayloadEvent::Chunk(writer.write_root(&entry, &written))).await?;
    Ok(rows + 1)
}

/// Replace every `Server` node with its rendered output.
fn expand<'a>(
    node: Node,
    modules: &'a dyn ModuleResolver,
    base: &'a RenderProps,
    depth: usize,
    max_depth: usize,
) -> BoxFuture<'a, Result<Node, RenderError>> {
    async move {
        match node {
            Node::Server(server) => {
                if depth >= max_depth {
                    return Err(RenderError::TooDeep(max_depth));
                }
                let component = component_for(modules, &server.module_id)?;
                let props = RenderProps {
                    props: server.props,
                    ..base.clone()
                };
                let rendered = match component.render(&props).await {
                    Ok(node) => node,
                    Err(RenderError::NoServerOutput) => Node::Empty,
                    Err(e) => return Err(e),
                };
                expand(rendered, modules, base, depth + 1, max_depth).await
            }
            Node::Element(mut el) => {
                el.children = expand_all(el.children, modules, base, depth, max_depth).await?;
                Ok(Node::Element(el))
            }
            Node::Client(mut client) => {
                client.children = expand_all(client.children, modules, base, depth, max_depth).await?;
                Ok(Node::Client(client))
            }
            Node::Fragment(children) => Ok(Node::Fragment(
                expand_all(children, modules, base, depth, max_depth).await?,
            )),
            other => Ok(other),
        }
    }
    .boxed()
}

async fn expand_all(
    children: Vec<Node>,
    modules: &dyn ModuleResolver,
    base: &RenderProps,
    depth: usize,
    max_depth: usize,
) -> Result<Vec<Node>, RenderError> {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        out.push(expand(child, modules, base, depth, max_depth).await?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::module::{ApiRequest, ApiResponse, ModuleRegistry};
    use crate::render::payload::decode_payload;
    use crate::render::stream::payload_bytes;
    use crate::render::tree::Element;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Greeting;

    #[async_trait]
    impl Component for Greeting {
        async fn render(&self, props: &RenderProps) -> Result<Node, RenderError> {
            let name = props.props.get("name").and_then(|v| v.as_str()).unwrap_or("anon");
            Ok(Node::text(format!("hello {name}")))
        }
    }

    struct Loop;

    #[async_trait]
    impl Component for Loop {
        async fn render(&self, _props: &RenderProps) -> Result<Node, RenderError> {
            Ok(Node::server("loop"))
        }
    }

    struct Hidden;

    #[async_trait]
    impl Component for Hidden {
        async fn render(&self, _props: &RenderProps) -> Result<Node, RenderError> {
            Err(RenderError::NoServerOutput)
        }
    }

    struct Redirect;

    #[async_trait]
    impl Component for Redirect {
        async fn render(&self, _props: &RenderProps) -> Result<Node, RenderError> {
            Err(RenderError::redirect(307, "/login"))
        }
    }

    struct Echo;

    #[async_trait]
    impl ApiHandler for Echo {
        async fn call(&self, request: ApiRequest) -> Result<ApiResponse, RenderError> {
            Ok(ApiResponse {
                status: 200,
                headers: Vec::new(),
                body: request.body,
            })
        }
    }

    fn renderer() -> Renderer {
        let mut registry = ModuleRegistry::new();
        registry.register_component(
            "root",
            StaticTree(Element::new("html").child(Node::slot("children")).into()),
        );
        registry.register_component(
            "_layout",
            StaticTree(Element::new("main").child(Node::slot("children")).into()),
        );
        registry.register_component(
            "index",
            StaticTree(
                Element::new("div")
                    .child(Node::Server(crate::render::tree::ServerRef {
                        module_id: "greeting".into(),
                        props: serde_json::json!({"name": "ada"}).as_object().cloned().unwrap_or_default(),
                    }))
                    .child(Node::server("hidden"))
                    .child(Node::client("Counter", "default"))
                    .into(),
            ),
        );
        registry.register_component("greeting", Greeting);
        registry.register_component("loop", Loop);
        registry.register_component("hidden", Hidden);
        registry.register_component("redirect", Redirect);
        registry.register_api("echo", Echo);

        let routes: Vec<crate::config::RouteConfig> = toml::from_str::<RouteList>(
            r#"
            [[routes]]
            path = "/"
            kind = "root"
            module = "root"
            [[routes]]
            path = "/"
            kind = "layout"
            module = "_layout"
            [[routes]]
            path = "/"
            kind = "page"
            module = "index"
            [[routes]]
            path = "/loop"
            kind = "page"
            module = "loop"
            render = "dynamic"
            [[routes]]
            path = "/go"
            kind = "page"
            module = "redirect"
            render = "dynamic"
            [[routes]]
            path = "/api/echo"
            kind = "api"
            module = "echo"
            "#,
        )
        .unwrap()
        .routes;

        let table = RouteTable::from_config(&routes, &registry).unwrap();
        Renderer::new(Arc::new(table), Arc::new(registry), RenderOptions::default())
    }

    #[derive(serde::Deserialize)]
    struct RouteList {
        routes: Vec<crate::config::RouteConfig>,
    }

    async fn collect(stream: PayloadStream) -> (Vec<u8>, Vec<String>) {
        let mut bytes = Vec::new();
        let mut modules = Vec::new();
        let events: Vec<_> = stream.collect().await;
        for event in events {
            match event.unwrap() {
                PayloadEvent::Chunk(chunk) => bytes.extend_from_slice(&chunk),
                PayloadEvent::Module(id) => modules.push(id),
            }
        }
        (bytes, modules)
    }

    #[test]
    fn test_slot_plan_order() {
        let renderer = renderer();
        let plan = renderer.slots_for(&RenderInput::new("/")).unwrap();
        let names: Vec<&str> = plan.slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["page:/", "layout:/", "root"]);
        assert_eq!(plan.entry(), Some("root"));
    }

    #[test]
    fn test_unknown_path_and_api_are_routing_errors() {
        let renderer = renderer();
        assert!(matches!(
            renderer.slots_for(&RenderInput::new("/missing")),
            Err(AppError::Routing(_))
        ));
        assert!(matches!(
            renderer.slots_for(&RenderInput::new("/api/echo")),
            Err(AppError::Routing(_))
        ));
        assert!(renderer.match_api("/api/echo").is_some());
        assert!(renderer.match_api("/").is_none());
    }

    #[tokio::test]
    async fn test_render_payload_nests_slots() {
        let renderer = renderer();
        let stream = renderer.render_payload(&RenderInput::new("/")).await.unwrap();
        let (bytes, modules) = collect(stream).await;
        assert_eq!(modules, vec!["Counter".to_string()]);

        let tree = decode_payload(&bytes).unwrap();
        assert_eq!(tree.entry, "root");
        assert_eq!(
            tree.slots["root"],
            Node::Element(Element::new("html").child(Node::slot("layout:/")))
        );
        assert_eq!(
            tree.slots["layout:/"],
            Node::Element(Element::new("main").child(Node::slot("page:/")))
        );
        assert_eq!(
            tree.slots["page:/"],
            Node::Element(
                Element::new("div")
                    .child("hello ada")
                    .child(Node::Empty)
                    .child(Node::client("Counter", "default"))
            )
        );
    }

    #[tokio::test]
    async fn test_server_recursion_limit() {
        let renderer = renderer();
        let err = renderer.render_payload(&RenderInput::new("/loop")).await.err().unwrap();
        assert!(matches!(err, AppError::Render(RenderError::TooDeep(_))));
    }

    #[tokio::test]
    async fn test_status_error_surfaces_before_first_byte() {
        let renderer = renderer();
        let err = renderer.render_payload(&RenderInput::new("/go")).await.err().unwrap();
        assert_eq!(err.status().as_u16(), 307);
    }

    #[tokio::test]
    async fn test_render_html_through_shell() {
        let renderer = renderer();
        let payload = renderer.render_payload(&RenderInput::new("/")).await.unwrap();
        let html: Vec<_> = renderer
            .render_html(payload_bytes(payload), Arc::new(ShellParts::default()), None)
            .collect()
            .await;
        let html: String = html
            .into_iter()
            .map(|c| String::from_utf8(c.unwrap().to_vec()).unwrap())
            .collect();
        assert!(html.contains("<html><main><div>hello ada<!--$client:Counter#default--><!--/$client--></div></main></html>"));
        assert!(html.contains("<link rel=\"modulepreload\" href=\"/assets/Counter.js\">"));
    }

    struct Gate {
        open: Arc<tokio::sync::Notify>,
        renders: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Component for Gate {
        async fn render(&self, _props: &RenderProps) -> Result<Node, RenderError> {
            self.open.notified().await;
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(Element::new("main").child(Node::slot("children")).into())
        }
    }

    struct Counted(Arc<AtomicUsize>);

    #[async_trait]
    impl Component for Counted {
        async fn render(&self, _props: &RenderProps) -> Result<Node, RenderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Element::new("html").child(Node::slot("children")).into())
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_producer() {
        let open = Arc::new(tokio::sync::Notify::new());
        let layout_renders = Arc::new(AtomicUsize::new(0));
        let root_renders = Arc::new(AtomicUsize::new(0));

        let mut registry = ModuleRegistry::new();
        registry.register_component("index", StaticTree(Node::text("page")));
        registry.register_component(
            "gate",
            Gate {
                open: open.clone(),
                renders: layout_renders.clone(),
            },
        );
        registry.register_component("root", Counted(root_renders.clone()));
        let routes = toml::from_str::<RouteList>(
            r#"
            [[routes]]
            path = "/"
            kind = "root"
            module = "root"
            [[routes]]
            path = "/"
            kind = "layout"
            module = "gate"
            [[routes]]
            path = "/"
            kind = "page"
            module = "index"
            "#,
        )
        .unwrap()
        .routes;
        let table = RouteTable::from_config(&routes, &registry).unwrap();
        let renderer = Renderer::new(Arc::new(table), Arc::new(registry), RenderOptions::default());

        // The page row arrives; the layout is still parked on the gate.
        let stream = renderer.render_payload(&RenderInput::new("/")).await.unwrap();
        drop(stream);
        open.notify_one();

        tokio::time::timeout(Duration::from_secs(2), async {
            while layout_renders.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(root_renders.load(Ordering::SeqCst), 0);
    }
}
