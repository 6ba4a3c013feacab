//! Per-request context shared by the middleware chain.
//!
//! One [`RequestContext`] lives for exactly one request and is mutated in
//! place by each handler in turn. Anything handed to a renderer or API
//! handler is a frozen [`RequestSnapshot`], never the live context.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProtocolError;
use crate::http::request::X_REQUEST_ID;
use crate::render::stream::ByteStream;

/// `data` key holding the request id.
pub const REQUEST_ID_KEY: &str = "request_id";

/// `data` key naming the handler that produced the response (metrics label).
pub const HANDLER_KEY: &str = "handler";

pub struct RequestParts {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    /// Taken by the handler that consumes it.
    pub body: Option<Body>,
}

#[derive(Default)]
pub struct ResponseParts {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Option<ByteStream>,
}

pub struct RequestContext {
    pub req: RequestParts,
    pub res: ResponseParts,
    pub data: HashMap<String, serde_json::Value>,
}

/// Immutable view of the request for renderers and API handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Build a context from an incoming request. Relative request targets
    /// are resolved against the `Host` header.
    pub fn from_request(request: Request<Body>) -> Result<Self, ProtocolError> {
        let (parts, body) = request.into_parts();
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = Url::parse(&format!("http://{host}{target}"))
            .or_else(|_| Url::parse(&format!("http://localhost{target}")))
            .map_err(|_| ProtocolError::RequestTarget(target.to_string()))?;

        Ok(Self {
            req: RequestParts {
                url,
                method: parts.method,
                headers: parts.headers,
                body: Some(body),
            },
            res: ResponseParts::default(),
            data: HashMap::new(),
        })
    }

    /// Context for a synthetic request.
    #[cfg(test)]
    pub fn for_path(method: Method, path: &str) -> Self {
        let mut url = Url::parse("http://localhost/").unwrap();
        url.set_path(path);
        Self {
            req: RequestParts {
                url,
                method,
                headers: HeaderMap::new(),
                body: None,
            },
            res: ResponseParts::default(),
            data: HashMap::new(),
        }
    }

    pub fn pathname(&self) -> &str {
        self.req.url.path()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.data.get(REQUEST_ID_KEY).and_then(|v| v.as_str())
    }

    /// Whether some handler has produced a response.
    pub fn has_response(&self) -> bool {
        self.res.body.is_some() || self.res.status.is_some()
    }

    /// Set status, content type and body in one go.
    pub fn respond(&mut self, status: StatusCode, content_type: &'static str, body: ByteStream) {
        self.res.status = Some(status);
        self.res
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.res.body = Some(body);
    }

    pub fn set_handler(&mut self, name: &'static str) {
        self.data.insert(HANDLER_KEY.to_string(), serde_json::Value::from(name));
    }

    /// Freeze the request side for handing to a renderer.
    pub fn snapshot(&self) -> Arc<RequestSnapshot> {
        let headers = self
            .req
            .headers
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        Arc::new(RequestSnapshot {
            url: self.req.url.to_string(),
            method: self.req.method.to_string(),
            headers,
            request_id: self
                .request_id()
                .map(str::to_string)
                .or_else(|| {
                    self.req
                        .headers
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unusable_host_falls_back_to_localhost() {
        let request = Request::builder()
            .uri("/a")
            .header(header::HOST, "bad host")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::from_request(request).unwrap();
        assert_eq!(ctx.req.url.host_str(), Some("localhost"));
        assert_eq!(ctx.pathname(), "/a");
    }

    #[test]
    fn test_from_request_resolves_host() {
        let request = Request::builder()
            .uri("/nested/foo?x=1")
            .header(header::HOST, "example.test:8080")
            .header(X_REQUEST_ID, "abc")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::from_request(request).unwrap();
        assert_eq!(ctx.pathname(), "/nested/foo");
        assert_eq!(ctx.req.url.query(), Some("x=1"));
        assert_eq!(ctx.req.url.host_str(), Some("example.test"));

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.method, "GET");
        assert_eq!(snapshot.request_id.as_deref(), Some("abc"));
        assert!(snapshot.headers.iter().any(|(k, _)| k == "host"));
    }

    #[test]
    fn test_respond_marks_context() {
        let mut ctx = RequestContext::for_path(Method::GET, "/a");
        assert!(!ctx.has_response());
        ctx.respond(
            StatusCode::OK,
            "text/plain",
            crate::render::stream::once_bytes("hi"),
        );
        assert!(ctx.has_response());
        assert_eq!(ctx.res.headers[header::CONTENT_TYPE], "text/plain");
    }
}
