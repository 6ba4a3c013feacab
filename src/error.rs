//! Request-level error kinds and their HTTP mapping.
//!
//! - [`RoutingError`]: nothing in the route table matches → 404
//! - [`ProtocolError`]: malformed route name or wire payload → 400
//! - [`RenderError`]: failure while rendering → its tagged status, else 500
//!
//! None of these are retried. They only become clean status responses when
//! raised before the first body byte; once streaming has begun they surface
//! as a stream abort.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub use crate::render::error::RenderError;

/// Decoding failures. Always a client/version-skew problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("route name `{0}` must end with `.txt`")]
    RouteName(String),

    #[error("pathname `{0}` uses the reserved sentinel")]
    ReservedRouteName(String),

    #[error("payload row {row}: {reason}")]
    Payload { row: usize, reason: String },

    #[error("worker frame: {0}")]
    Frame(String),

    #[error("request target `{0}` is not a valid URL")]
    RequestTarget(String),
}

/// No page, layout or API entry matched the pathname.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no route matches `{pathname}`")]
pub struct RoutingError {
    pub pathname: String,
}

/// Error surfaced at the HTTP edge.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Routing(_) => StatusCode::NOT_FOUND,
            AppError::Protocol(_) => StatusCode::BAD_REQUEST,
            AppError::Render(RenderError::Protocol(_)) => StatusCode::BAD_REQUEST,
            AppError::Render(e) => e
                .status()
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let location = match &self {
            AppError::Render(e) => e.location().map(str::to_string),
            _ => None,
        };
        let mut response = (status, self.to_string()).into_response();
        if let Some(location) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
            response.headers_mut().insert(header::LOCATION, location);
        }
        response
    }
}
