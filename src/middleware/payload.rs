//! Payload endpoint: `/<prefix>/<route name>` → wire payload.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use futures_util::StreamExt;

use crate::error::AppError;
use crate::middleware::chain::{Middleware, Next};
use crate::middleware::context::RequestContext;
use crate::middleware::dev::ModuleManifest;
use crate::render::orchestrator::{PayloadSource, RenderInput};
use crate::render::stream::{payload_bytes, PayloadEvent};
use crate::routing::route_name::decode_route_name;

pub const PAYLOAD_CONTENT_TYPE: &str = "text/x-component";

pub struct PayloadMiddleware {
    source: Arc<dyn PayloadSource>,
    prefix: String,
    modules: Option<Arc<ModuleManifest>>,
}

impl PayloadMiddleware {
    /// `prefix` is the full path prefix, e.g. `/RSC/`.
    pub fn new(source: Arc<dyn PayloadSource>, prefix: String) -> Self {
        Self {
            source,
            prefix,
            modules: None,
        }
    }

    /// Record client module ids seen in payloads.
    pub fn with_manifest(mut self, modules: Arc<ModuleManifest>) -> Self {
        self.modules = Some(modules);
        self
    }
}

#[async_trait]
impl Middleware for PayloadMiddleware {
    fn name(&self) -> &'static str {
        "payload"
    }

    async fn handle(&self, ctx: &mut RequestContext, mut next: Next<'_>) -> Result<(), AppError> {
        let Some(name) = ctx.pathname().strip_prefix(self.prefix.as_str()) else {
            return next.run(ctx).await;
        };
        let input = RenderInput {
            pathname: decode_route_name(name)?,
            query: ctx.req.url.query().map(str::to_string),
        };
        tracing::debug!(
            request_id = ctx.request_id().unwrap_or("-"),
            pathname = %input.pathname,
            "Rendering payload"
        );

        let stream = self.source.render(input).await?;
        let stream = match &self.modules {
            Some(modules) => {
                let modules = modules.clone();
                stream
                    .inspect(move |event| {
                        if let Ok(PayloadEvent::Module(id)) = event {
                            if modules.record(id) {
                                tracing::debug!(module = %id, "Client module observed");
                            }
                        }
                    })
                    .boxed()
            }
            None => stream,
        };

        ctx.respond(StatusCode::OK, PAYLOAD_CONTENT_TYPE, payload_bytes(stream));
        ctx.set_handler("payload");
        Ok(())
    }
}
