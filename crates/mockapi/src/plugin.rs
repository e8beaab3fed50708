// File: src/plugin.rs
// Purpose: Dev-server plugin descriptor that wires the mock pipeline into a host

use crate::chain::{Middleware, MiddlewareChain};
use crate::compiler::{build_bundler, Bundler, TomlBundler};
use crate::config::MockConfig;
use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::loader::FsModuleLoader;
use crate::middleware;
use crate::registrar::Registrar;
use crate::watcher::EntryWatcher;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Host settings a plugin may inspect before activating.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub mode: String,
    pub root: PathBuf,
}

/// What the host exposes to `configure_server`.
#[derive(Clone)]
pub struct ServerContext {
    /// Project root.
    pub root: PathBuf,
    pub chain: Arc<MiddlewareChain>,
}

/// A dev-server plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the plugin takes part for this host configuration.
    fn apply(&self, config: &HostConfig) -> bool;

    /// Called once, when the server starts.
    async fn configure_server(&self, server: &ServerContext) -> Result<()>;
}

/// Options of the mock API plugin.
#[derive(Clone)]
pub struct MockApiOptions {
    pub mock_files_dir: String,
    pub entry_file: String,
    pub watch: bool,
    pub bundler: Arc<dyn Bundler>,
    pub extra_middlewares: Vec<Arc<dyn Middleware>>,
    pub sink: Arc<dyn DiagnosticsSink>,
}

impl Default for MockApiOptions {
    fn default() -> Self {
        Self {
            mock_files_dir: "mock-api".to_string(),
            entry_file: "index.toml".to_string(),
            watch: true,
            bundler: Arc::new(TomlBundler),
            extra_middlewares: Vec::new(),
            sink: Arc::new(TracingSink),
        }
    }
}

impl MockApiOptions {
    /// Build options from the `[mock]` configuration section.
    pub fn from_config(config: &MockConfig) -> Result<Self> {
        let extra_middlewares = config
            .extra_middlewares
            .iter()
            .map(|name| {
                middleware::by_name(name).ok_or_else(|| anyhow!("unknown middleware '{}'", name))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            mock_files_dir: config.mock_files_dir.clone(),
            entry_file: config.entry_file.clone(),
            watch: config.watch,
            bundler: build_bundler(&config.bundler)?,
            extra_middlewares,
            sink: Arc::new(TracingSink),
        })
    }

    pub fn with_mock_files_dir(mut self, dir: impl Into<String>) -> Self {
        self.mock_files_dir = dir.into();
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.extra_middlewares.push(middleware);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }
}

struct Active {
    registrar: Arc<Registrar>,
    _watcher: Option<EntryWatcher>,
}

/// Serves mock handlers from `<root>/<mock_files_dir>/<entry_file>`.
pub struct MockApiPlugin {
    options: MockApiOptions,
    active: Mutex<Option<Active>>,
}

impl MockApiPlugin {
    pub const NAME: &'static str = "mock-api";

    pub fn new(options: MockApiOptions) -> Self {
        Self {
            options,
            active: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &MockApiOptions {
        &self.options
    }

    /// Registrar created by `configure_server`, if it ran.
    pub async fn registrar(&self) -> Option<Arc<Registrar>> {
        self.active.lock().await.as_ref().map(|a| a.registrar.clone())
    }
}

impl Default for MockApiPlugin {
    fn default() -> Self {
        Self::new(MockApiOptions::default())
    }
}

#[async_trait]
impl Plugin for MockApiPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, config: &HostConfig) -> bool {
        config.mode == "development"
    }

    async fn configure_server(&self, server: &ServerContext) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            warn!("{} is already configured", Self::NAME);
            return Ok(());
        }

        let entry = server
            .root
            .join(&self.options.mock_files_dir)
            .join(&self.options.entry_file);
        let loader = Arc::new(FsModuleLoader::new(self.options.bundler.clone()));
        let registrar = Arc::new(Registrar::new(
            server.chain.clone(),
            loader,
            self.options.sink.clone(),
            entry.clone(),
        ));

        registrar
            .install_extra_middlewares(&self.options.extra_middlewares)
            .await?;

        if registrar.rebuild().await.is_err() {
            warn!("Mock handlers unavailable until {:?} builds", entry);
        }

        let watcher = if self.options.watch {
            match EntryWatcher::spawn(registrar.clone()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    self.options.sink.report(&e);
                    None
                }
            }
        } else {
            info!("Watching disabled for {:?}", entry);
            None
        };

        *active = Some(Active {
            registrar,
            _watcher: watcher,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BundlerConfig;

    fn host(mode: &str) -> HostConfig {
        HostConfig {
            mode: mode.to_string(),
            root: PathBuf::from("."),
        }
    }

    #[test]
    fn test_descriptor() {
        let plugin = MockApiPlugin::default();
        assert_eq!(plugin.name(), "mock-api");
        assert!(plugin.apply(&host("development")));
        assert!(!plugin.apply(&host("production")));
        assert!(!plugin.apply(&host("test")));
    }

    #[test]
    fn test_default_options() {
        let options = MockApiOptions::default();
        assert_eq!(options.mock_files_dir, "mock-api");
        assert_eq!(options.entry_file, "index.toml");
        assert!(options.extra_middlewares.is_empty());
        assert_eq!(options.bundler.name(), "toml");
    }

    #[test]
    fn test_options_from_config() {
        let config = MockConfig {
            extra_middlewares: vec!["json-body".into(), "request-log".into()],
            bundler: BundlerConfig::Command {
                command: vec!["cat".into(), "{entry}".into()],
            },
            ..MockConfig::default()
        };
        let options = MockApiOptions::from_config(&config).unwrap();
        assert_eq!(options.extra_middlewares.len(), 2);
        assert_eq!(options.bundler.name(), "command");
    }

    #[test]
    fn test_unknown_middleware_is_rejected() {
        let config = MockConfig {
            extra_middlewares: vec!["cors".into()],
            ..MockConfig::default()
        };
        assert!(MockApiOptions::from_config(&config).is_err());
    }
}
