//! Context setup: request id, timing, access log and metrics.

use std::time::Instant;

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::error::AppError;
use crate::http::request::X_REQUEST_ID;
use crate::middleware::chain::{Middleware, Next};
use crate::middleware::context::{RequestContext, HANDLER_KEY, REQUEST_ID_KEY};
use crate::observability::metrics;

#[derive(Debug, Default)]
pub struct SetupMiddleware;

#[async_trait]
impl Middleware for SetupMiddleware {
    fn name(&self) -> &'static str {
        "setup"
    }

    async fn handle(&self, ctx: &mut RequestContext, mut next: Next<'_>) -> Result<(), AppError> {
        let start = Instant::now();
        let request_id = ctx
            .req
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        ctx.data
            .insert(REQUEST_ID_KEY.to_string(), request_id.clone().into());

        let method = ctx.req.method.to_string();
        let path = ctx.pathname().to_string();
        tracing::debug!(request_id = %request_id, method = %method, path = %path, "Handling request");

        let result = next.run(ctx).await;

        let status = match &result {
            Ok(()) if ctx.has_response() => ctx.res.status.unwrap_or(StatusCode::OK),
            // Nothing responded; the static file service takes over.
            Ok(()) => StatusCode::NOT_FOUND,
            Err(e) => e.status(),
        };
        let handler = ctx
            .data
            .get(HANDLER_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(if ctx.has_response() { "unknown" } else { "static" })
            .to_string();
        metrics::record_request(&method, status.as_u16(), &handler, start);
        tracing::debug!(
            request_id = %request_id,
            status = status.as_u16(),
            handler = %handler,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request routed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    use crate::middleware::chain::Chain;

    #[tokio::test]
    async fn test_assigns_request_id() {
        let chain = Chain::new(vec![std::sync::Arc::new(SetupMiddleware)]);
        let mut ctx = RequestContext::for_path(Method::GET, "/");
        chain.run(&mut ctx).await.unwrap();
        let id = ctx.request_id().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_keeps_incoming_request_id() {
        let chain = Chain::new(vec![std::sync::Arc::new(SetupMiddleware)]);
        let mut ctx = RequestContext::for_path(Method::GET, "/");
        ctx.req.headers.insert(X_REQUEST_ID, "given".parse().unwrap());
        chain.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.request_id(), Some("given"));
    }
}
