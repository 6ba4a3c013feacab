//! Ordered async handler chain.
//!
//! Each handler receives the context and a [`Next`] for the remainder of
//! the chain. Not calling `next` short-circuits everything after it. A
//! handler may call `next` at most once per invocation; further calls are
//! ignored with a warning.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::AppError;
use crate::middleware::context::RequestContext;

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<(), AppError>;
}

/// The rest of the chain, as seen from one handler invocation.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    called: bool,
}

impl<'a> Next<'a> {
    /// Run the remaining handlers. Only the first call per invocation does
    /// anything.
    pub async fn run(&mut self, ctx: &mut RequestContext) -> Result<(), AppError> {
        if self.called {
            tracing::warn!(
                next = self.rest.first().map(|m| m.name()).unwrap_or("<end>"),
                "next() called more than once; ignoring"
            );
            return Ok(());
        }
        self.called = true;
        run_chain(self.rest, ctx).await
    }
}

fn run_chain<'a>(
    handlers: &'a [Arc<dyn Middleware>],
    ctx: &'a mut RequestContext,
) -> BoxFuture<'a, Result<(), AppError>> {
    async move {
        let Some((first, rest)) = handlers.split_first() else {
            return Ok(());
        };
        tracing::trace!(handler = first.name(), "Entering middleware");
        first.handle(ctx, Next { rest, called: false }).await
    }
    .boxed()
}

/// A chain built once per process.
#[derive(Clone)]
pub struct Chain {
    handlers: Arc<[Arc<dyn Middleware>]>,
}

impl Chain {
    pub fn new(handlers: Vec<Arc<dyn Middleware>>) -> Self {
        let names: Vec<&str> = handlers.iter().map(|h| h.name()).collect();
        tracing::debug!(handlers = ?names, "Middleware chain built");
        Self {
            handlers: handlers.into(),
        }
    }

    pub async fn run(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        run_chain(&self.handlers, ctx).await
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}
