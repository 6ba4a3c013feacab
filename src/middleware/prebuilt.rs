//! Serve build output in `start` mode.
//!
//! Static pathnames and their payload files are read from disk. Dynamic
//! pathnames and anything not in the manifest fall through to live
//! rendering and then to the static asset service.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};

use crate::build::manifest::BuildManifest;
use crate::error::AppError;
use crate::middleware::chain::{Middleware, Next};
use crate::middleware::context::RequestContext;
use crate::middleware::payload::PAYLOAD_CONTENT_TYPE;
use crate::render::stream::file_bytes;
use crate::routing::route_name::decode_route_name;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

pub struct PrebuiltMiddleware {
    manifest: Arc<BuildManifest>,
    output_dir: PathBuf,
    payload_prefix: String,
}

impl PrebuiltMiddleware {
    pub fn new(manifest: Arc<BuildManifest>, output_dir: PathBuf, payload_prefix: String) -> Self {
        Self {
            manifest,
            output_dir,
            payload_prefix,
        }
    }

    /// Relative file and content type for a request path, if prebuilt.
    fn file_for(&self, pathname: &str) -> Option<(&str, &'static str)> {
        match pathname.strip_prefix(&self.payload_prefix) {
            Some(name) => {
                let route = decode_route_name(name).ok()?;
                let files = self.manifest.lookup(&route)?;
                Some((files.payload.as_str(), PAYLOAD_CONTENT_TYPE))
            }
            None => {
                let files = self.manifest.lookup(pathname)?;
                Some((files.html.as_str(), HTML_CONTENT_TYPE))
            }
        }
    }
}

#[async_trait]
impl Middleware for PrebuiltMiddleware {
    fn name(&self) -> &'static str {
        "prebuilt"
    }

    async fn handle(&self, ctx: &mut RequestContext, mut next: Next<'_>) -> Result<(), AppError> {
        if !matches!(ctx.req.method, Method::GET | Method::HEAD) {
            return next.run(ctx).await;
        }
        let Some((file, content_type)) = self.file_for(ctx.pathname()) else {
            return next.run(ctx).await;
        };

        let path = self.output_dir.join(file);
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                tracing::debug!(path = %path.display(), "Serving prebuilt file");
                ctx.respond(StatusCode::OK, content_type, file_bytes(file));
                ctx.set_handler("prebuilt");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Prebuilt file unreadable; rendering live");
                next.run(ctx).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    use crate::build::manifest::StaticFiles;
    use crate::middleware::chain::Chain;

    fn setup() -> (tempfile::TempDir, Chain) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("about")).unwrap();
        std::fs::create_dir_all(dir.path().join("RSC/_")).unwrap();
        std::fs::write(dir.path().join("about/index.html"), "<p>about</p>").unwrap();
        std::fs::write(dir.path().join("RSC/_/about.txt"), "0:null\n").unwrap();

        let mut manifest = BuildManifest::default();
        manifest.static_routes.insert(
            "/about".into(),
            StaticFiles {
                html: "about/index.html".into(),
                payload: "RSC/_/about.txt".into(),
            },
        );
        let middleware = PrebuiltMiddleware::new(Arc::new(manifest), dir.path().to_path_buf(), "/RSC/".into());
        (dir, Chain::new(vec![Arc::new(middleware)]))
    }

    async fn body(ctx: &mut RequestContext) -> String {
        let chunks: Vec<_> = ctx.res.body.take().unwrap().collect().await;
        chunks
            .into_iter()
            .map(|c| String::from_utf8(c.unwrap().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_serves_html_and_payload() {
        let (_dir, chain) = setup();

        let mut ctx = RequestContext::for_path(Method::GET, "/about");
        chain.run(&mut ctx).await.unwrap();
        assert_eq!(body(&mut ctx).await, "<p>about</p>");

        let mut ctx = RequestContext::for_path(Method::GET, "/RSC/_/about.txt");
        chain.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.res.headers["content-type"], PAYLOAD_CONTENT_TYPE);
        assert_eq!(body(&mut ctx).await, "0:null\n");
    }

    #[tokio::test]
    async fn test_large_file_is_streamed() {
        let (dir, chain) = setup();
        let page = format!("<p>{}</p>", "a".repeat(64 * 1024));
        std::fs::write(dir.path().join("about/index.html"), &page).unwrap();

        let mut ctx = RequestContext::for_path(Method::GET, "/about");
        chain.run(&mut ctx).await.unwrap();
        let chunks: Vec<_> = ctx.res.body.take().unwrap().collect().await;
        assert!(chunks.len() > 1);
        let html: String = chunks
            .into_iter()
            .map(|c| String::from_utf8(c.unwrap().to_vec()).unwrap())
            .collect();
        assert_eq!(html, page);
    }

    #[tokio::test]
    async fn test_unknown_paths_fall_through() {
        let (_dir, chain) = setup();
        for path in ["/other", "/RSC/_/other.txt", "/RSC/bad"] {
            let mut ctx = RequestContext::for_path(Method::GET, path);
            chain.run(&mut ctx).await.unwrap();
            assert!(!ctx.has_response(), "{path}");
        }
        let mut ctx = RequestContext::for_path(Method::POST, "/about");
        chain.run(&mut ctx).await.unwrap();
        assert!(!ctx.has_response());
    }
}
