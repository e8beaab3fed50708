// File: src/chain.rs
// Purpose: Ordered, path-scoped middleware chain maintained by the dev server

use crate::error::ChainError;
use crate::http::{RawRequest, RawResponse};
use async_trait::async_trait;
use axum::http::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// What the chain should do after a middleware returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Pass the request on to the next matching binding.
    Next,
    /// The request has been answered; stop here.
    Done,
}

/// A request processor in the host chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: &mut RawRequest, res: &mut RawResponse)
        -> Result<Flow, ChainError>;
}

/// Handle returned for every registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

struct Binding {
    id: BindingId,
    prefix: Option<String>,
    middleware: Arc<dyn Middleware>,
}

impl Binding {
    fn matches(&self, path: &str) -> bool {
        match &self.prefix {
            Some(prefix) => matches_prefix(prefix, path),
            None => true,
        }
    }
}

/// Connect-style mount matching: `/api` matches `/api`, `/api/x` and
/// `/api.json`, but not `/apix`. Comparison ignores ASCII case.
pub fn matches_prefix(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }

    let Some(head) = path.get(..prefix.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(prefix) {
        return false;
    }

    matches!(path.as_bytes().get(prefix.len()), None | Some(b'/') | Some(b'.'))
}

/// The host's ordered request-processing chain.
///
/// Bindings are snapshotted at the start of each dispatch, so registrations
/// made while a request is in flight only affect later requests.
#[derive(Default)]
pub struct MiddlewareChain {
    bindings: RwLock<Vec<Arc<Binding>>>,
    next_id: AtomicU64,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware that sees every request.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) -> BindingId {
        self.push(None, middleware)
    }

    /// Register a middleware mounted at a path prefix.
    pub fn use_at(&self, prefix: impl Into<String>, middleware: Arc<dyn Middleware>) -> BindingId {
        self.push(Some(prefix.into()), middleware)
    }

    /// Remove bindings. Unknown ids are ignored.
    pub fn remove(&self, ids: &[BindingId]) {
        let mut bindings = self.write();
        bindings.retain(|b| !ids.contains(&b.id));
    }

    /// Swap `old` bindings for `new` ones in a single step.
    ///
    /// The new bindings take the position of the first removed one, or go to
    /// the end of the chain when nothing was removed.
    pub fn replace(
        &self,
        old: &[BindingId],
        new: Vec<(String, Arc<dyn Middleware>)>,
    ) -> Vec<BindingId> {
        let fresh: Vec<Arc<Binding>> = new
            .into_iter()
            .map(|(prefix, middleware)| {
                Arc::new(Binding {
                    id: self.allocate_id(),
                    prefix: Some(prefix),
                    middleware,
                })
            })
            .collect();
        let ids = fresh.iter().map(|b| b.id).collect();

        let mut bindings = self.write();
        let position = bindings
            .iter()
            .position(|b| old.contains(&b.id))
            .unwrap_or(bindings.len());
        bindings.retain(|b| !old.contains(&b.id));
        let position = position.min(bindings.len());
        bindings.splice(position..position, fresh);

        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mount prefixes in chain order (`None` for unscoped middlewares).
    pub fn prefixes(&self) -> Vec<Option<String>> {
        self.read().iter().map(|b| b.prefix.clone()).collect()
    }

    /// Run a request through every matching binding in order.
    ///
    /// Requests no binding answers get a `404`.
    pub async fn dispatch(&self, mut req: RawRequest) -> Result<RawResponse, ChainError> {
        let snapshot: Vec<Arc<Binding>> = self.read().clone();
        let mut res = RawResponse::new();

        for binding in &snapshot {
            if !binding.matches(req.path()) {
                continue;
            }

            let flow = binding.middleware.handle(&mut req, &mut res).await?;
            if flow == Flow::Done || res.is_ended() {
                return Ok(res);
            }
        }

        let message = format!("Cannot {} {}", req.method, req.path());
        // A fresh response cannot already be ended, and the status is valid.
        let mut not_found = RawResponse::new();
        let _ = not_found.set_status(StatusCode::NOT_FOUND);
        let _ = not_found.set_header("content-type", "text/plain; charset=utf-8");
        let _ = not_found.end(message);
        Ok(not_found)
    }

    fn push(&self, prefix: Option<String>, middleware: Arc<dyn Middleware>) -> BindingId {
        let id = self.allocate_id();
        self.write().push(Arc::new(Binding {
            id,
            prefix,
            middleware,
        }));
        id
    }

    fn allocate_id(&self) -> BindingId {
        BindingId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Binding>>> {
        self.bindings.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Binding>>> {
        self.bindings.write().unwrap_or_else(|e| e.into_inner())
    }
}
