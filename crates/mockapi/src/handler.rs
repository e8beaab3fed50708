// File: src/handler.rs
// Purpose: Mock handler trait and the path -> handler entries a module exports

use crate::adapter::{MockRequest, MockResponse};
use anyhow::Result;
use async_trait::async_trait;
use axum::http::Method;
use std::fmt;
use std::sync::Arc;

/// A mock handler. Answers a request by acting on the response.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: &MockRequest<'_>, res: &mut MockResponse<'_>) -> Result<()>;
}

/// Adapter turning a synchronous closure into a [`Handler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&MockRequest<'_>, &mut MockResponse<'_>) -> Result<()> + Send + Sync,
{
    async fn handle(&self, req: &MockRequest<'_>, res: &mut MockResponse<'_>) -> Result<()> {
        (self.0)(req, res)
    }
}

/// Wrap a closure as a handler.
///
/// ```ignore
/// let hello = handler_fn(|_req, res| Ok(res.json(&json!({ "hello": "world" }))?));
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&MockRequest<'_>, &mut MockResponse<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// One exported `{ path, handler }` pair.
#[derive(Clone)]
pub struct HandlerEntry {
    pub path: String,
    /// Restricts the entry to one HTTP method; other methods fall through.
    pub method: Option<Method>,
    pub handler: Arc<dyn Handler>,
}

impl HandlerEntry {
    pub fn new(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            path: path.into(),
            method: None,
            handler,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn accepts(&self, method: &Method) -> bool {
        self.method.as_ref().map_or(true, |m| m == method)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("path", &self.path)
            .field("method", &self.method)
            .finish()
    }
}
