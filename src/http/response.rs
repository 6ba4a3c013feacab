//! Turn the chain's response parts into an HTTP response.
//!
//! # Design Decisions
//! - Bodies stay streams end to end; nothing is buffered here
//! - A stream error after the headers aborts the connection

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

use crate::middleware::context::ResponseParts;

pub fn from_parts(parts: ResponseParts) -> Response {
    let mut response = match parts.body {
        Some(body) => Response::new(Body::from_stream(body)),
        None => Response::new(Body::empty()),
    };
    *response.status_mut() = parts.status.unwrap_or(StatusCode::OK);
    *response.headers_mut() = parts.headers;
    response
        .headers_mut()
        .entry(header::CACHE_CONTROL)
        .or_insert(HeaderValue::from_static("no-cache"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::stream::once_bytes;

    #[tokio::test]
    async fn test_streams_body_with_defaults() {
        let parts = ResponseParts {
            status: None,
            headers: Default::default(),
            body: Some(once_bytes("hello")),
        };
        let response = from_parts(parts);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[test]
    fn test_keeps_handler_headers() {
        let mut parts = ResponseParts::default();
        parts.status = Some(StatusCode::NOT_FOUND);
        parts
            .headers
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        let response = from_parts(parts);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }
}
