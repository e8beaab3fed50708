// File: src/definition.rs
// Purpose: Declarative handler tables from a mock module, turned into handlers

use crate::adapter::{MockRequest, MockResponse};
use crate::error::ShapeError;
use crate::handler::{Handler, HandlerEntry};
use anyhow::Result;
use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_\.\-]*)\s*\}\}").expect("placeholder pattern")
});

/// One handler table as it appears in a bundled module.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerDefinition {
    pub path: String,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Served through `res.json`.
    #[serde(default)]
    pub json: Option<JsonValue>,

    /// Served as text.
    #[serde(default)]
    pub body: Option<String>,

    /// Latency simulation for this handler only.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

fn default_status() -> u16 {
    200
}

impl HandlerDefinition {
    /// Parse the `index`-th element of an exported handler list.
    pub fn from_value(index: usize, value: JsonValue) -> Result<Self, ShapeError> {
        let invalid = |reason: String| ShapeError::InvalidEntry { index, reason };

        if !value.is_object() {
            return Err(invalid("expected a table".to_string()));
        }
        if value.get("path").and_then(JsonValue::as_str).is_none() {
            return Err(invalid("missing string field 'path'".to_string()));
        }

        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
    }

    /// Validate and turn the declaration into a registered entry.
    pub fn into_entry(self, index: usize) -> Result<HandlerEntry, ShapeError> {
        let invalid = |reason: String| ShapeError::InvalidEntry { index, reason };

        if !self.path.starts_with('/') {
            return Err(invalid(format!("path '{}' must start with '/'", self.path)));
        }
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| invalid(format!("invalid status {}", self.status)))?;
        let method = self
            .method
            .as_deref()
            .map(|m| Method::from_bytes(m.to_uppercase().as_bytes()))
            .transpose()
            .map_err(|_| invalid(format!("invalid method {:?}", self.method)))?;

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(format!("invalid header name '{}'", name)))?;
            // Placeholders are filled per request; the literal text around them must be valid.
            HeaderValue::from_str(&PLACEHOLDER.replace_all(value, ""))
                .map_err(|_| invalid(format!("invalid value for header '{}'", name)))?;
        }

        let payload = match (self.json, self.body) {
            (Some(_), Some(_)) => {
                return Err(invalid("only one of 'json' and 'body' may be set".to_string()))
            }
            (Some(json), None) => Payload::Json(json),
            (None, Some(text)) => Payload::Text(text),
            (None, None) => Payload::Empty,
        };

        let handler = DeclaredHandler {
            status,
            headers: self.headers,
            payload,
            delay: self.delay_ms.map(Duration::from_millis),
        };

        let mut entry = HandlerEntry::new(self.path, Arc::new(handler));
        entry.method = method;
        Ok(entry)
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Json(JsonValue),
    Text(String),
    Empty,
}

/// Handler produced from a [`HandlerDefinition`].
#[derive(Debug, Clone)]
pub struct DeclaredHandler {
    status: StatusCode,
    headers: BTreeMap<String, String>,
    payload: Payload,
    delay: Option<Duration>,
}

#[async_trait]
impl Handler for DeclaredHandler {
    async fn handle(&self, req: &MockRequest<'_>, res: &mut MockResponse<'_>) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        res.set_status(self.status)?;
        for (name, value) in &self.headers {
            res.set_header(name, &render_str(value, req))?;
        }

        match &self.payload {
            Payload::Json(value) => res.json(&render_value(value, req))?,
            Payload::Text(text) => {
                if res.header("content-type").is_none() {
                    res.set_header("content-type", "text/plain; charset=utf-8")?;
                }
                res.end(render_str(text, req))?;
            }
            Payload::Empty => res.end("")?,
        }

        Ok(())
    }
}

/// Substitute every `{{name}}` placeholder in `template`.
pub fn render_str(template: &str, req: &MockRequest<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            match lookup(&caps[1], req) {
                Some(JsonValue::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            }
        })
        .into_owned()
}

/// Render placeholders inside every string of a JSON tree.
///
/// A string that is exactly one placeholder is replaced by the looked-up
/// value itself, so `"{{body}}"` echoes the parsed body as JSON.
pub fn render_value(value: &JsonValue, req: &MockRequest<'_>) -> JsonValue {
    match value {
        JsonValue::String(s) => {
            if let Some(caps) = PLACEHOLDER.captures(s) {
                if caps[0].len() == s.len() {
                    return lookup(&caps[1], req).unwrap_or(JsonValue::Null);
                }
            }
            JsonValue::String(render_str(s, req))
        }
        JsonValue::Array(items) => {
            JsonValue::Array(items.iter().map(|v| render_value(v, req)).collect())
        }
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, req)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn lookup(name: &str, req: &MockRequest<'_>) -> Option<JsonValue> {
    let (head, rest) = match name.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (name, None),
    };

    match (head, rest) {
        ("method", None) => Some(JsonValue::String(req.method.to_string())),
        ("path", None) => Some(JsonValue::String(req.path().to_string())),
        ("body", None) => req.body.cloned(),
        ("body", Some(field)) => req.body?.get(field).cloned(),
        ("query", Some(key)) => req.query.get(key).map(|v| JsonValue::String(v.to_string())),
        ("params", Some(key)) => req.params.get(key).map(|v| JsonValue::String(v.to_string())),
        _ => None,
    }
}
