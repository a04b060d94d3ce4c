//! Per-request context handed to the application pipeline.
//!
//! # Responsibilities
//! - Carry the buffered request (method, uri, headers, body)
//! - Assign a trace identifier (incoming `x-request-id` or a fresh UUID)
//! - Expose the request service scope once the scope filter attached one
//!
//! # Design Decisions
//! - Bodies are fully buffered (`Bytes`); the servers enforce a size limit
//! - `Response` is a plain value; servers convert it with `into_http`

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Extensions, HeaderMap, Method, StatusCode, Uri, Version};
use uuid::Uuid;

use crate::hosting::services::ServiceProvider;

pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub trace_identifier: String,
    /// Per-request service scope, set by the request services filter.
    pub request_services: Option<ServiceProvider>,
    pub extensions: Extensions,
}

impl RequestContext {
    pub fn new(request: http::Request<Bytes>, trace_identifier: impl Into<String>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            trace_identifier: trace_identifier.into(),
            request_services: None,
            extensions: parts.extensions,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn request_services(&self) -> Option<&ServiceProvider> {
        self.request_services.as_ref()
    }
}

/// Builds [`RequestContext`]s for the host's request handler.
#[derive(Debug, Clone, Default)]
pub struct RequestContextFactory;

impl RequestContextFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn create(&self, request: http::Request<Bytes>) -> RequestContext {
        let trace_identifier = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        RequestContext::new(request, trace_identifier)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text UTF-8 response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.body = Bytes::from(body.into());
        response
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.body = Bytes::from(value.to_string());
        response
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn into_http(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
