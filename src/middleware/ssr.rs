//! Server-side rendering of HTML pages, plus API route dispatch.
//!
//! # Data Flow
//! ```text
//! GET /nested/foo
//!     → ctx.req.url = /RSC/_/nested/foo.txt
//!     → next() (payload handler fills ctx.res.body)
//!     → ctx.req.url restored
//!     → ctx.res.body = render_html(payload body, shell)
//! ```
//!
//! A pathname with no page falls back to the `/404` page when one exists,
//! otherwise the request passes through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};

use crate::error::AppError;
use crate::middleware::chain::{Middleware, Next};
use crate::middleware::context::RequestContext;
use crate::middleware::prebuilt::HTML_CONTENT_TYPE;
use crate::render::module::ApiRequest;
use crate::render::orchestrator::Renderer;
use crate::render::shell::ShellParts;
use crate::render::stream::once_bytes;
use crate::routing::route_name::encode_route_name;
use crate::routing::table::NOT_FOUND_PATTERN;

/// Largest request body buffered for an API route.
const API_BODY_LIMIT: usize = 2 * 1024 * 1024;

pub struct SsrMiddleware {
    renderer: Arc<Renderer>,
    shell: Arc<ShellParts>,
    payload_prefix: String,
    extra_head: Option<String>,
}

impl SsrMiddleware {
    pub fn new(renderer: Arc<Renderer>, shell: Arc<ShellParts>, payload_prefix: String) -> Self {
        Self {
            renderer,
            shell,
            payload_prefix,
            extra_head: None,
        }
    }

    /// Markup appended to every page head.
    pub fn with_extra_head(mut self, extra_head: Option<String>) -> Self {
        self.extra_head = extra_head;
        self
    }

    async fn call_api(&self, ctx: &mut RequestContext) -> Result<bool, AppError> {
        let Some((handler, params)) = self.renderer.match_api(ctx.pathname()) else {
            return Ok(false);
        };
        let body = match ctx.req.body.take() {
            Some(body) => axum::body::to_bytes(body, API_BODY_LIMIT)
                .await
                .map_err(|e| AppError::Render(crate::render::RenderError::with_status(413, e.to_string())))?,
            None => Default::default(),
        };
        let response = handler
            .call(ApiRequest {
                snapshot: ctx.snapshot(),
                params,
                body,
            })
            .await?;

        ctx.res.status = Some(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK));
        for (name, value) in &response.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                ctx.res.headers.insert(name, value);
            }
        }
        ctx.res.body = Some(once_bytes(response.body));
        ctx.set_handler("api");
        Ok(true)
    }

    /// Run the rest of the chain as a payload request for `pathname`.
    async fn payload_for(
        &self,
        ctx: &mut RequestContext,
        next: &mut Next<'_>,
        pathname: &str,
    ) -> Result<(), AppError> {
        let route_name = encode_route_name(pathname)?;
        let original = ctx.req.url.clone();
        ctx.req.url.set_path(&format!("{}{route_name}", self.payload_prefix));
        let result = next.run(ctx).await;
        ctx.req.url = original;
        result
    }

    fn wrap_html(&self, ctx: &mut RequestContext, status: StatusCode) {
        let Some(payload) = ctx.res.body.take() else {
            return;
        };
        let html = self
            .renderer
            .render_html(payload, self.shell.clone(), self.extra_head.clone());
        ctx.respond(status, HTML_CONTENT_TYPE, html);
        ctx.set_handler("ssr");
    }
}

/// Asset-like paths (`/app.js`, `/favicon.ico`). Only consulted when no
/// page matches, so `/users/john.doe` still reaches `/users/[name]`.
fn looks_like_file(pathname: &str) -> bool {
    pathname
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains('.'))
}

#[async_trait]
impl Middleware for SsrMiddleware {
    fn name(&self) -> &'static str {
        "ssr"
    }

    async fn handle(&self, ctx: &mut RequestContext, mut next: Next<'_>) -> Result<(), AppError> {
        let pathname = ctx.pathname().to_string();
        if pathname.starts_with(&self.payload_prefix) {
            return next.run(ctx).await;
        }
        if self.call_api(ctx).await? {
            return Ok(());
        }
        let wants_html = ctx
            .req
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map_or(true, |accept| accept.contains("text/html") || accept.contains("*/*"));
        if !matches!(ctx.req.method, Method::GET | Method::HEAD) || !wants_html {
            return next.run(ctx).await;
        }
        if looks_like_file(&pathname) && self.renderer.table().match_page(&pathname).is_none() {
            return next.run(ctx).await;
        }

        match self.payload_for(ctx, &mut next, &pathname).await {
            Ok(()) => {
                self.wrap_html(ctx, StatusCode::OK);
                Ok(())
            }
            Err(AppError::Routing(e)) => {
                if pathname == NOT_FOUND_PATTERN || self.renderer.table().not_found().is_none() {
                    tracing::debug!(pathname = %e.pathname, "No page; passing through");
                    return Ok(());
                }
                // `next` is spent; render the not-found payload directly.
                let input = crate::render::orchestrator::RenderInput::new(NOT_FOUND_PATTERN);
                let payload = self.renderer.render_payload(&input).await?;
                ctx.res.body = Some(crate::render::stream::payload_bytes(payload));
                self.wrap_html(ctx, StatusCode::NOT_FOUND);
                Ok(())
            }
            Err(AppError::Protocol(_)) => {
                // Pathname uses the reserved sentinel; not a page.
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    use crate::config::RouteConfig;
    use crate::middleware::chain::Chain;
    use crate::middleware::payload::PayloadMiddleware;
    use crate::render::module::{ApiHandler, ApiResponse, ModuleRegistry};
    use crate::render::orchestrator::{RenderOptions, StaticTree};
    use crate::render::tree::{Element, Node};
    use crate::render::RenderError;
    use crate::routing::table::{RenderMode, RouteKind, RouteTable};

    struct Hello;

    #[async_trait]
    impl ApiHandler for Hello {
        async fn call(&self, request: ApiRequest) -> Result<ApiResponse, RenderError> {
            Ok(ApiResponse::json(&serde_json::json!({
                "method": request.snapshot.method,
                "body": String::from_utf8_lossy(&request.body),
            })))
        }
    }

    fn route(path: &str, kind: RouteKind, module: &str) -> RouteConfig {
        RouteConfig {
            path: path.into(),
            kind,
            module: module.into(),
            render: Some(RenderMode::Dynamic),
            static_paths: None,
        }
    }

    fn chain(with_404: bool) -> Chain {
        let mut registry = ModuleRegistry::new();
        registry.register_component("index", StaticTree(Element::new("h1").child("Home").into()));
        registry.register_component("missing", StaticTree(Node::text("Not here")));
        registry.register_component("user", StaticTree(Element::new("p").child("user").into()));
        registry.register_api("hello", Hello);

        let mut routes = vec![
            route("/", RouteKind::Page, "index"),
            route("/users/[name]", RouteKind::Page, "user"),
            route("/api/hello", RouteKind::Api, "hello"),
        ];
        if with_404 {
            routes.push(route(NOT_FOUND_PATTERN, RouteKind::Page, "missing"));
        }
        let table = RouteTable::from_config(&routes, &registry).unwrap();
        let renderer = Arc::new(Renderer::new(
            Arc::new(table),
            Arc::new(registry),
            RenderOptions::default(),
        ));

        let ssr = SsrMiddleware::new(renderer.clone(), Arc::new(ShellParts::default()), "/RSC/".into());
        let payload = PayloadMiddleware::new(renderer, "/RSC/".into());
        Chain::new(vec![Arc::new(ssr), Arc::new(payload)])
    }

    async fn body_text(ctx: &mut RequestContext) -> String {
        let chunks: Vec<_> = ctx.res.body.take().unwrap().collect().await;
        chunks
            .into_iter()
            .map(|c| String::from_utf8(c.unwrap().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_page_renders_html_and_restores_url() {
        let chain = chain(false);
        let mut ctx = RequestContext::for_path(Method::GET, "/");
        chain.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.pathname(), "/");
        assert_eq!(ctx.res.status, Some(StatusCode::OK));
        assert_eq!(ctx.res.headers[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
        let html = body_text(&mut ctx).await;
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Home</h1>"));
        assert!(html.contains("__FLIGHT__"));
    }

    #[tokio::test]
    async fn test_payload_path_skips_html() {
        let chain = chain(false);
        let mut ctx = RequestContext::for_path(Method::GET, "/RSC/_.txt");
        chain.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.res.headers[header::CONTENT_TYPE], "text/x-component");
    }

    #[tokio::test]
    async fn test_missing_page_passes_through_or_uses_404() {
        let mut ctx = RequestContext::for_path(Method::GET, "/nope");
        chain(false).run(&mut ctx).await.unwrap();
        assert!(!ctx.has_response());

        let mut ctx = RequestContext::for_path(Method::GET, "/nope");
        chain(true).run(&mut ctx).await.unwrap();
        assert_eq!(ctx.res.status, Some(StatusCode::NOT_FOUND));
        assert!(body_text(&mut ctx).await.contains("Not here"));
    }

    #[tokio::test]
    async fn test_api_route_called_directly() {
        let chain = chain(false);
        let mut ctx = RequestContext::for_path(Method::POST, "/api/hello");
        ctx.req.body = Some(axum::body::Body::from("ping"));
        chain.run(&mut ctx).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(&mut ctx).await).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["body"], "ping");
    }

    #[tokio::test]
    async fn test_dotted_pathname_matching_a_page_renders() {
        let chain = chain(true);
        let mut ctx = RequestContext::for_path(Method::GET, "/users/john.doe");
        chain.run(&mut ctx).await.unwrap();
        assert!(ctx.has_response());
        assert_eq!(ctx.res.status, Some(StatusCode::OK));
        assert_eq!(ctx.res.headers[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_assets_and_non_html_pass_through() {
        let chain = chain(true);
        let mut ctx = RequestContext::for_path(Method::GET, "/app.js");
        chain.run(&mut ctx).await.unwrap();
        assert!(!ctx.has_response());

        let mut ctx = RequestContext::for_path(Method::GET, "/");
        ctx.req.headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        chain.run(&mut ctx).await.unwrap();
        assert!(!ctx.has_response());
    }
}
