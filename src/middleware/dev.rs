//! Development tooling.
//!
//! Serves the prefetch manifest observed so far at `/__dev/modules` and
//! marks every dynamic response as uncacheable.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use dashmap::DashSet;

use crate::error::AppError;
use crate::middleware::chain::{Middleware, Next};
use crate::middleware::context::RequestContext;
use crate::render::stream::once_bytes;

pub const MODULES_PATH: &str = "/__dev/modules";

/// Client module ids seen across renders.
#[derive(Debug, Default)]
pub struct ModuleManifest {
    ids: DashSet<String>,
}

impl ModuleManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time an id is seen.
    pub fn record(&self, module_id: &str) -> bool {
        if self.ids.contains(module_id) {
            return false;
        }
        self.ids.insert(module_id.to_string())
    }

    /// Sorted snapshot.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.iter().map(|id| id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct DevMiddleware {
    modules: Arc<ModuleManifest>,
}

impl DevMiddleware {
    pub fn new(modules: Arc<ModuleManifest>) -> Self {
        Self { modules }
    }
}

#[async_trait]
impl Middleware for DevMiddleware {
    fn name(&self) -> &'static str {
        "dev"
    }

    async fn handle(&self, ctx: &mut RequestContext, mut next: Next<'_>) -> Result<(), AppError> {
        if ctx.pathname() == MODULES_PATH {
            let body = serde_json::json!({ "modules": self.modules.ids() }).to_string();
            ctx.respond(StatusCode::OK, "application/json", once_bytes(body));
            ctx.set_handler("dev");
            return Ok(());
        }

        next.run(ctx).await?;

        if ctx.has_response() {
            ctx.res
                .headers
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        }
        Ok(())
    }
}
