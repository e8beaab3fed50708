// File: src/adapter.rs
// Purpose: Wraps the raw request/response pair into the shape mock handlers use

use crate::error::{RequestAdaptationError, ResponseError};
use crate::http::{RawRequest, RawResponse};
use axum::body::Bytes;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use url::Url;

/// Base used to resolve request URLs when no `Origin` header is present.
pub const FALLBACK_ORIGIN: &str = "http://localhost:5173";

/// A request body decoded by an earlier middleware.
///
/// The adapter hands this through untouched; it never parses bodies itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody(pub JsonValue);

/// Query parameters from URL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    params: HashMap<String, String>,
}

impl QueryParams {
    /// Create from HashMap
    pub fn new(params: HashMap<String, String>) -> Self {
        Self { params }
    }

    /// Get a query parameter value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Get a query parameter as a specific type
    pub fn get_as<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.params.get(key)?.parse().ok()
    }

    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.params
    }
}

/// Request as seen by a mock handler.
///
/// Dereferences to the raw request, so every original field stays reachable.
#[derive(Debug)]
pub struct MockRequest<'a> {
    raw: &'a RawRequest,
    pub query: QueryParams,
    /// Same mapping as `query`; path segments are not extracted.
    pub params: QueryParams,
    pub body: Option<&'a JsonValue>,
}

impl<'a> MockRequest<'a> {
    pub fn raw(&self) -> &'a RawRequest {
        self.raw
    }

    /// Bytes of the request body exactly as received.
    pub fn raw_body(&self) -> &'a Bytes {
        &self.raw.body
    }
}

impl Deref for MockRequest<'_> {
    type Target = RawRequest;

    fn deref(&self) -> &RawRequest {
        self.raw
    }
}

/// Response as seen by a mock handler: the raw response plus [`MockResponse::json`].
#[derive(Debug)]
pub struct MockResponse<'a> {
    raw: &'a mut RawResponse,
}

impl MockResponse<'_> {
    /// Serialize `data`, mark it as JSON and end the response with it.
    pub fn json<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<(), ResponseError> {
        if self.raw.is_ended() {
            return Err(ResponseError::AlreadyEnded);
        }
        let payload =
            serde_json::to_vec(data).map_err(|e| ResponseError::Serialize(e.to_string()))?;
        self.raw.set_header("content-type", "application/json")?;
        self.raw.end(payload)
    }
}

impl Deref for MockResponse<'_> {
    type Target = RawResponse;

    fn deref(&self) -> &RawResponse {
        self.raw
    }
}

impl DerefMut for MockResponse<'_> {
    fn deref_mut(&mut self) -> &mut RawResponse {
        self.raw
    }
}

/// Build the handler view of a request.
///
/// The URL is resolved against the `Origin` header, or [`FALLBACK_ORIGIN`]
/// without one. For every distinct key only the first value is looked at,
/// and empty values are dropped.
pub fn adapt_request(raw: &RawRequest) -> Result<MockRequest<'_>, RequestAdaptationError> {
    let origin = raw.header("origin").unwrap_or(FALLBACK_ORIGIN);
    let full = format!("{}{}", origin, raw.url());
    let url = Url::parse(&full).map_err(|source| RequestAdaptationError { url: full, source })?;

    let mut params = HashMap::new();
    let mut seen = Vec::new();
    for (key, value) in url.query_pairs() {
        if seen.contains(&key) {
            continue;
        }
        if !value.is_empty() {
            params.insert(key.to_string(), value.to_string());
        }
        seen.push(key);
    }

    let query = QueryParams::new(params);
    Ok(MockRequest {
        raw,
        params: query.clone(),
        query,
        body: raw.extensions.get::<ParsedBody>().map(|b| &b.0),
    })
}

/// Build the handler view of a response.
pub fn adapt_response(raw: &mut RawResponse) -> MockResponse<'_> {
    MockResponse { raw }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Uri};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request(uri: &'static str) -> RawRequest {
        RawRequest::new(Method::GET, Uri::from_static(uri))
    }

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_values_are_dropped() {
        let raw = request("/foo?a=1&b=");
        let req = adapt_request(&raw).unwrap();
        assert_eq!(req.query.as_map(), &map(&[("a", "1")]));
        assert_eq!(req.params, req.query);
    }

    #[test]
    fn test_origin_header_is_used_as_base() {
        let raw = request("/x?y=2").with_header("origin", "https://example.com");
        let req = adapt_request(&raw).unwrap();
        assert_eq!(req.query.as_map(), &map(&[("y", "2")]));
    }

    #[test]
    fn test_first_value_of_repeated_key_wins() {
        let raw = request("/list?tag=a&tag=b");
        let req = adapt_request(&raw).unwrap();
        assert_eq!(req.query.get("tag"), Some("a"));
    }

    #[test]
    fn test_repeated_key_with_empty_first_value_is_dropped() {
        let raw = request("/list?tag=&tag=b");
        let req = adapt_request(&raw).unwrap();
        assert!(!req.query.has("tag"));
    }

    #[test]
    fn test_percent_encoded_values_are_decoded() {
        let raw = request("/search?q=hello%20world&n=3");
        let req = adapt_request(&raw).unwrap();
        assert_eq!(req.query.get("q"), Some("hello world"));
        assert_eq!(req.query.get_as::<u32>("n"), Some(3));
    }

    #[test]
    fn test_unparsable_origin_is_an_adaptation_error() {
        let raw = request("/x?y=2").with_header("origin", "null");
        let err = adapt_request(&raw).unwrap_err();
        assert_eq!(err.url, "null/x?y=2");
    }

    #[test]
    fn test_body_is_passed_through_from_extensions() {
        let mut raw = request("/submit").with_body(r#"{"name":"ann"}"#);
        assert!(adapt_request(&raw).unwrap().body.is_none());

        raw.extensions.insert(ParsedBody(json!({ "name": "ann" })));
        let req = adapt_request(&raw).unwrap();
        assert_eq!(req.body, Some(&json!({ "name": "ann" })));
        assert_eq!(req.raw_body().as_ref(), br#"{"name":"ann"}"#);
    }

    #[test]
    fn test_original_fields_stay_reachable() {
        let raw = request("/foo?a=1").with_header("x-trace", "abc");
        let req = adapt_request(&raw).unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.path(), "/foo");
        assert_eq!(req.header("x-trace"), Some("abc"));
    }

    #[test]
    fn test_json_sets_content_type_and_ends() {
        let mut raw = RawResponse::new();
        let mut res = adapt_response(&mut raw);
        res.json(&json!({ "ok": true })).unwrap();

        assert!(raw.is_ended());
        assert_eq!(raw.header("content-type"), Some("application/json"));
        assert_eq!(raw.body_text(), r#"{"ok":true}"#);
    }

    #[test]
    fn test_json_twice_is_an_error() {
        let mut raw = RawResponse::new();
        let mut res = adapt_response(&mut raw);
        res.json(&json!({ "ok": true })).unwrap();
        assert_eq!(res.json(&json!({ "ok": false })), Err(ResponseError::AlreadyEnded));
        assert_eq!(raw.body_text(), r#"{"ok":true}"#);
    }

    #[test]
    fn test_other_response_methods_are_untouched() {
        let mut raw = RawResponse::new();
        let mut res = adapt_response(&mut raw);
        res.set_header("x-mock", "1").unwrap();
        res.write("partial ").unwrap();
        res.end("done").unwrap();
        assert_eq!(raw.body_text(), "partial done");
        assert_eq!(raw.header("x-mock"), Some("1"));
    }
}
