//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the axum router and tower layers
//! - Run the middleware chain for every request
//! - Fall back to static files when no handler responded
//! - Shut down gracefully on the shutdown signal

use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::{services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::schema::TimeoutConfig;
use crate::error::AppError;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::response;
use crate::http::websocket::{reload_socket, RELOAD_PATH};
use crate::lifecycle::Shutdown;
use crate::middleware::{Chain, RequestContext};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub chain: Chain,
    /// Static asset passthrough.
    pub assets: ServeDir,
    /// Dev reload fan-out; `None` outside dev mode.
    pub reload: Option<broadcast::Sender<()>>,
}

pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState, timeouts: &TimeoutConfig) -> Self {
        Self {
            router: Self::build_router(state, timeouts),
        }
    }

    #[allow(deprecated)]
    fn build_router(state: AppState, timeouts: &TimeoutConfig) -> Router {
        let mut router = Router::new();
        if state.reload.is_some() {
            router = router.route(RELOAD_PATH, get(reload_socket));
        }
        router
            .fallback(render_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn render_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let mut passthrough = Request::new(Body::empty());
    *passthrough.method_mut() = request.method().clone();
    *passthrough.uri_mut() = request.uri().clone();
    *passthrough.headers_mut() = request.headers().clone();

    let mut ctx = match RequestContext::from_request(request) {
        Ok(ctx) => ctx,
        Err(e) => return AppError::from(e).into_response(),
    };
    if let Err(e) = state.chain.run(&mut ctx).await {
        return e.into_response();
    }
    if ctx.has_response() {
        return response::from_parts(ctx.res);
    }

    match state.assets.oneshot(passthrough).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
