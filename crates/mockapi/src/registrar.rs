// File: src/registrar.rs
// Purpose: Binds loaded handler entries into the host chain and rebuilds them

use crate::adapter::{adapt_request, adapt_response};
use crate::chain::{BindingId, Flow, Middleware, MiddlewareChain};
use crate::diagnostics::DiagnosticsSink;
use crate::error::{ChainError, MockError};
use crate::handler::HandlerEntry;
use crate::http::{RawRequest, RawResponse};
use crate::loader::ModuleLoader;
use anyhow::bail;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::info;

/// Chain binding for one handler entry.
///
/// Adapts the raw pair, then calls the handler. The handler's own errors are
/// passed to the host untouched.
pub struct MockDispatch {
    entry: HandlerEntry,
}

impl MockDispatch {
    pub fn new(entry: HandlerEntry) -> Self {
        Self { entry }
    }
}

#[async_trait]
impl Middleware for MockDispatch {
    async fn handle(
        &self,
        req: &mut RawRequest,
        res: &mut RawResponse,
    ) -> Result<Flow, ChainError> {
        if !self.entry.accepts(&req.method) {
            return Ok(Flow::Next);
        }

        let mock_req = adapt_request(req)?;
        let mut mock_res = adapt_response(res);

        self.entry
            .handler
            .handle(&mock_req, &mut mock_res)
            .await
            .map_err(|source| ChainError::Handler {
                path: self.entry.path.clone(),
                source,
            })?;

        Ok(Flow::Done)
    }
}

/// Whether a handler set is live on the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrarState {
    Unregistered,
    Registered {
        /// Paths of the active entries, in registration order.
        paths: Vec<String>,
        /// Number of successful registrations so far.
        generation: u64,
    },
}

#[derive(Default)]
struct Bindings {
    extras: Option<Vec<BindingId>>,
    handlers: Vec<BindingId>,
}

/// Owns the mock bindings on a chain and replaces them on every rebuild.
pub struct Registrar {
    chain: Arc<MiddlewareChain>,
    loader: Arc<dyn ModuleLoader>,
    sink: Arc<dyn DiagnosticsSink>,
    entry: PathBuf,
    // Held for the whole of a cycle, so cycles never overlap.
    cycle: Mutex<Bindings>,
    state: RwLock<RegistrarState>,
}

impl Registrar {
    pub fn new(
        chain: Arc<MiddlewareChain>,
        loader: Arc<dyn ModuleLoader>,
        sink: Arc<dyn DiagnosticsSink>,
        entry: impl Into<PathBuf>,
    ) -> Self {
        Self {
            chain,
            loader,
            sink,
            entry: entry.into(),
            cycle: Mutex::new(Bindings::default()),
            state: RwLock::new(RegistrarState::Unregistered),
        }
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry
    }

    pub fn state(&self) -> RegistrarState {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Install the extra middlewares, once, ahead of any mock binding.
    pub async fn install_extra_middlewares(
        &self,
        middlewares: &[Arc<dyn Middleware>],
    ) -> anyhow::Result<()> {
        let mut bindings = self.cycle.lock().await;
        if bindings.extras.is_some() {
            bail!("extra middlewares are already installed");
        }
        if !bindings.handlers.is_empty() {
            bail!("extra middlewares must be installed before mock handlers");
        }

        let ids = middlewares
            .iter()
            .map(|mw| self.chain.use_middleware(Arc::clone(mw)))
            .collect::<Vec<_>>();
        info!("Installed {} extra middleware(s)", ids.len());
        bindings.extras = Some(ids);
        Ok(())
    }

    /// Run one compile -> persist -> load -> register cycle.
    ///
    /// On failure the error goes to the diagnostics sink and the previous
    /// bindings stay active; the error is also returned for callers that
    /// want to react to it.
    pub async fn rebuild(&self) -> Result<usize, MockError> {
        let mut bindings = self.cycle.lock().await;

        match self.loader.load(&self.entry).await {
            Ok(entries) => Ok(self.bind(&mut bindings, entries)),
            Err(e) => {
                let err = MockError::from(e);
                self.sink.report(&err);
                if self.state() != RegistrarState::Unregistered {
                    tracing::warn!("Keeping the last working mock handlers");
                }
                Err(err)
            }
        }
    }

    /// Register an already loaded handler sequence, replacing the current one.
    pub async fn register(&self, entries: Vec<HandlerEntry>) -> usize {
        let mut bindings = self.cycle.lock().await;
        self.bind(&mut bindings, entries)
    }

    fn bind(&self, bindings: &mut Bindings, entries: Vec<HandlerEntry>) -> usize {
        let paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
        let fresh: Vec<(String, Arc<dyn Middleware>)> = entries
            .into_iter()
            .map(|entry| {
                let path = entry.path.clone();
                (path, Arc::new(MockDispatch::new(entry)) as Arc<dyn Middleware>)
            })
            .collect();

        bindings.handlers = self.chain.replace(&bindings.handlers, fresh);

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let generation = match &*state {
            RegistrarState::Registered { generation, .. } => generation + 1,
            RegistrarState::Unregistered => 1,
        };

        info!(
            "Registered {} mock handler(s) from {:?} (generation {})",
            paths.len(),
            self.entry,
            generation
        );
        for path in &paths {
            info!("  {} -> mock", path);
        }

        let count = paths.len();
        *state = RegistrarState::Registered { paths, generation };
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::error::{BuildError, LoadError};
    use crate::handler::handler_fn;
    use axum::http::{Method, StatusCode, Uri};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Loader that hands out scripted results, one per call.
    struct ScriptedLoader {
        results: StdMutex<VecDeque<Result<Vec<HandlerEntry>, LoadError>>>,
    }

    impl ScriptedLoader {
        fn new(results: Vec<Result<Vec<HandlerEntry>, LoadError>>) -> Arc<Self> {
            Arc::new(Self {
                results: StdMutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl ModuleLoader for ScriptedLoader {
        async fn load(&self, _source: &Path) -> Result<Vec<HandlerEntry>, LoadError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn reply(path: &str, text: &'static str) -> HandlerEntry {
        HandlerEntry::new(
            path,
            handler_fn(move |_req, res| {
                res.end(text)?;
                Ok(())
            }),
        )
    }

    fn build_failure() -> LoadError {
        LoadError::Build(BuildError::Syntax {
            path: PathBuf::from("index.toml"),
            message: "expected value".into(),
        })
    }

    async fn body_of(chain: &MiddlewareChain, uri: &'static str) -> String {
        let req = RawRequest::new(Method::GET, Uri::from_static(uri));
        chain.dispatch(req).await.unwrap().body_text()
    }

    fn setup(
        results: Vec<Result<Vec<HandlerEntry>, LoadError>>,
    ) -> (Arc<MiddlewareChain>, Arc<MemorySink>, Registrar) {
        let chain = Arc::new(MiddlewareChain::new());
        let sink = Arc::new(MemorySink::new());
        let registrar = Registrar::new(
            chain.clone(),
            ScriptedLoader::new(results),
            sink.clone(),
            "mock-api/index.toml",
        );
        (chain, sink, registrar)
    }

    /// Loader that takes a while and records how many loads overlap.
    #[derive(Default)]
    struct SlowLoader {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ModuleLoader for SlowLoader {
        async fn load(&self, _source: &Path) -> Result<Vec<HandlerEntry>, LoadError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![reply("/slow", "done")])
        }
    }

    #[tokio::test]
    async fn test_starts_unregistered() {
        let (_chain, _sink, registrar) = setup(vec![]);
        assert_eq!(registrar.state(), RegistrarState::Unregistered);
    }

    #[tokio::test]
    async fn test_rebuild_registers_every_entry() {
        let (chain, sink, registrar) =
            setup(vec![Ok(vec![reply("/a", "A"), reply("/b", "B")])]);

        assert_eq!(registrar.rebuild().await.unwrap(), 2);
        assert_eq!(
            registrar.state(),
            RegistrarState::Registered {
                paths: vec!["/a".into(), "/b".into()],
                generation: 1
            }
        );
        assert_eq!(body_of(&chain, "/a").await, "A");
        assert_eq!(body_of(&chain, "/b/nested").await, "B");
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_bindings() {
        let (chain, _sink, registrar) = setup(vec![
            Ok(vec![reply("/a", "old")]),
            Ok(vec![reply("/a", "new")]),
        ]);

        registrar.rebuild().await.unwrap();
        registrar.rebuild().await.unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(body_of(&chain, "/a").await, "new");
        assert!(matches!(
            registrar.state(),
            RegistrarState::Registered { generation: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_run_one_at_a_time() {
        let loader = Arc::new(SlowLoader::default());
        let chain = Arc::new(MiddlewareChain::new());
        let registrar = Registrar::new(
            chain.clone(),
            loader.clone(),
            Arc::new(MemorySink::new()),
            "mock-api/index.toml",
        );

        let (first, second) = tokio::join!(registrar.rebuild(), registrar.rebuild());
        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 1);

        assert_eq!(loader.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(chain.len(), 1);
        assert!(matches!(
            registrar.state(),
            RegistrarState::Registered { generation: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_state_reads_through_a_poisoned_lock() {
        let (_chain, _sink, registrar) = setup(vec![]);
        registrar.register(vec![reply("/a", "A")]).await;

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registrar.state.write().unwrap();
            panic!("poison the state lock");
        }));
        assert!(registrar.state.is_poisoned());

        assert_eq!(
            registrar.state(),
            RegistrarState::Registered {
                paths: vec!["/a".into()],
                generation: 1
            }
        );
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_last_good_set() {
        let (chain, sink, registrar) =
            setup(vec![Ok(vec![reply("/a", "good")]), Err(build_failure())]);

        registrar.rebuild().await.unwrap();
        let err = registrar.rebuild().await.unwrap_err();

        assert!(err.is_build_error());
        assert_eq!(sink.count(), 1);
        assert!(sink.reports()[0].contains("expected value"));
        assert_eq!(body_of(&chain, "/a").await, "good");
        assert!(matches!(
            registrar.state(),
            RegistrarState::Registered { generation: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_first_build_stays_unregistered() {
        let (chain, sink, registrar) = setup(vec![Err(build_failure())]);

        assert!(registrar.rebuild().await.is_err());
        assert_eq!(registrar.state(), RegistrarState::Unregistered);
        assert!(chain.is_empty());
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_extra_middlewares_run_before_handlers() {
        let (chain, _sink, registrar) = setup(vec![
            Ok(vec![reply("/a", "A")]),
            Ok(vec![reply("/a", "A2")]),
        ]);
        registrar
            .install_extra_middlewares(&[crate::middleware::by_name("request-log").unwrap()])
            .await
            .unwrap();
        registrar.rebuild().await.unwrap();
        registrar.rebuild().await.unwrap();

        assert_eq!(chain.prefixes(), vec![None, Some("/a".to_string())]);
    }

    #[tokio::test]
    async fn test_extra_middlewares_install_once() {
        let (_chain, _sink, registrar) = setup(vec![]);
        registrar.install_extra_middlewares(&[]).await.unwrap();
        assert!(registrar.install_extra_middlewares(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_extra_middlewares_rejected_after_handlers() {
        let (_chain, _sink, registrar) = setup(vec![]);
        registrar.register(vec![reply("/a", "A")]).await;
        assert!(registrar.install_extra_middlewares(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_method_mismatch_falls_through() {
        let (chain, _sink, registrar) = setup(vec![]);
        registrar
            .register(vec![
                reply("/items", "created").with_method(Method::POST),
                reply("/items", "listed"),
            ])
            .await;

        assert_eq!(body_of(&chain, "/items").await, "listed");
        let post = RawRequest::new(Method::POST, Uri::from_static("/items"));
        assert_eq!(chain.dispatch(post).await.unwrap().body_text(), "created");
    }

    #[tokio::test]
    async fn test_handler_errors_reach_the_host() {
        let (chain, sink, registrar) = setup(vec![]);
        registrar
            .register(vec![HandlerEntry::new(
                "/boom",
                handler_fn(|_req, _res| anyhow::bail!("handler exploded")),
            )])
            .await;

        let req = RawRequest::new(Method::GET, Uri::from_static("/boom"));
        let err = chain.dispatch(req).await.unwrap_err();
        match err {
            ChainError::Handler { path, source } => {
                assert_eq!(path, "/boom");
                assert_eq!(source.to_string(), "handler exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_adaptation_failure_skips_the_handler() {
        let (chain, _sink, registrar) = setup(vec![]);
        let called = Arc::new(StdMutex::new(false));
        let flag = called.clone();
        registrar
            .register(vec![HandlerEntry::new(
                "/x",
                handler_fn(move |_req, res| {
                    *flag.lock().unwrap() = true;
                    res.json(&json!({}))?;
                    Ok(())
                }),
            )])
            .await;

        let req = RawRequest::new(Method::GET, Uri::from_static("/x?y=1"))
            .with_header("origin", "null");
        let err = chain.dispatch(req).await.unwrap_err();
        assert!(matches!(err, ChainError::Adaptation(_)));
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_handler_sees_adapted_request() {
        let (chain, _sink, registrar) = setup(vec![]);
        registrar
            .register(vec![HandlerEntry::new(
                "/foo",
                handler_fn(|req, res| {
                    res.json(&json!({ "query": req.query.as_map(), "params": req.params.as_map() }))?;
                    Ok(())
                }),
            )])
            .await;

        let req = RawRequest::new(Method::GET, Uri::from_static("/foo?a=1&b="));
        let res = chain.dispatch(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(res.body()).unwrap(),
            json!({ "query": { "a": "1" }, "params": { "a": "1" } })
        );
    }
}
