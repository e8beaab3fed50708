// File: src/middleware.rs
// Purpose: Built-in extra middlewares that run ahead of the mock handlers

use crate::adapter::ParsedBody;
use crate::chain::{Flow, Middleware};
use crate::error::ChainError;
use crate::http::{RawRequest, RawResponse};
use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

/// Look up a built-in middleware by its configuration name.
pub fn by_name(name: &str) -> Option<Arc<dyn Middleware>> {
    match name {
        "json-body" => Some(Arc::new(JsonBodyParser)),
        "form-body" => Some(Arc::new(FormBodyParser)),
        "request-log" => Some(Arc::new(RequestLogger)),
        _ => None,
    }
}

/// Decodes `application/json` bodies into [`ParsedBody`].
///
/// Malformed JSON is answered with `400` and stops the chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBodyParser;

#[async_trait]
impl Middleware for JsonBodyParser {
    async fn handle(
        &self,
        req: &mut RawRequest,
        res: &mut RawResponse,
    ) -> Result<Flow, ChainError> {
        let is_json = req
            .content_type()
            .map_or(false, |ct| ct.contains("application/json"));
        if !is_json || req.body.is_empty() {
            return Ok(Flow::Next);
        }

        match serde_json::from_slice::<JsonValue>(&req.body) {
            Ok(value) => {
                req.extensions.insert(ParsedBody(value));
                Ok(Flow::Next)
            }
            Err(e) => {
                tracing::warn!("Rejected malformed JSON body on {}: {}", req.path(), e);
                reject(res, StatusCode::BAD_REQUEST, "Invalid JSON body")?;
                Ok(Flow::Done)
            }
        }
    }
}

/// Decodes `application/x-www-form-urlencoded` bodies into a [`ParsedBody`] object.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormBodyParser;

#[async_trait]
impl Middleware for FormBodyParser {
    async fn handle(
        &self,
        req: &mut RawRequest,
        _res: &mut RawResponse,
    ) -> Result<Flow, ChainError> {
        let is_form = req
            .content_type()
            .map_or(false, |ct| ct.contains("application/x-www-form-urlencoded"));
        if !is_form {
            return Ok(Flow::Next);
        }

        // First value wins for repeated keys; a bare `flag` is an empty field.
        let mut fields = Map::new();
        for (key, value) in url::form_urlencoded::parse(&req.body) {
            fields
                .entry(key.into_owned())
                .or_insert_with(|| JsonValue::String(value.into_owned()));
        }

        req.extensions.insert(ParsedBody(JsonValue::Object(fields)));
        Ok(Flow::Next)
    }
}

/// Logs every request passing through the chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogger;

#[async_trait]
impl Middleware for RequestLogger {
    async fn handle(
        &self,
        req: &mut RawRequest,
        _res: &mut RawResponse,
    ) -> Result<Flow, ChainError> {
        info!("{} {}", req.method, req.url());
        Ok(Flow::Next)
    }
}

fn reject(res: &mut RawResponse, status: StatusCode, message: &str) -> Result<(), ChainError> {
    let wrap = |e: crate::error::ResponseError| ChainError::Middleware(e.into());
    res.set_status(status).map_err(wrap)?;
    res.set_header("content-type", "text/plain; charset=utf-8")
        .map_err(wrap)?;
    res.end(message).map_err(wrap)
}
