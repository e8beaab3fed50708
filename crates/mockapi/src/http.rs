// File: src/http.rs
// Purpose: Raw request/response pair the host chain hands to every middleware

use crate::error::ResponseError;
use axum::body::{Body, Bytes};
use axum::http::{
    header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri,
};
use axum::response::{IntoResponse, Response};

/// Inbound request as received by the host, before any adaptation.
#[derive(Debug, Default)]
pub struct RawRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Slot for values produced by earlier middlewares (e.g. a parsed body).
    pub extensions: Extensions,
}

impl RawRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            ..Self::default()
        }
    }

    /// Add a header, ignoring names or values that are not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path plus query string, as it appeared on the request line.
    pub fn url(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }
}

impl From<Request<Bytes>> for RawRequest {
    fn from(req: Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            extensions: parts.extensions,
        }
    }
}

/// Outgoing response. Terminates exactly once through [`RawResponse::end`].
#[derive(Debug, Default)]
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    ended: bool,
}

impl RawResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.status = status;
        Ok(())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Set (replace) a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ResponseError> {
        self.ensure_open()?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ResponseError::InvalidHeader(name.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ResponseError::InvalidHeader(name.as_str().to_string()))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Append a chunk to the body without terminating the response.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.body.extend_from_slice(chunk.as_ref());
        Ok(())
    }

    /// Final write. A second call fails instead of silently appending.
    pub fn end(&mut self, chunk: impl AsRef<[u8]>) -> Result<(), ResponseError> {
        self.write(chunk)?;
        self.ended = true;
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn ensure_open(&self) -> Result<(), ResponseError> {
        if self.ended {
            Err(ResponseError::AlreadyEnded)
        } else {
            Ok(())
        }
    }
}

impl IntoResponse for RawResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
