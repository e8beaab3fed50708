// mockapi - hot-reloadable mock API handlers for development servers
// A handler module is bundled, loaded and bound into the server's middleware
// chain, then rebuilt whenever the entry module changes.

pub mod adapter;
pub mod chain;
pub mod compiler;
pub mod config;
pub mod definition;
pub mod diagnostics;
pub mod error;
pub mod handler;
pub mod host;
pub mod http;
pub mod loader;
pub mod middleware;
pub mod plugin;
pub mod registrar;
pub mod watcher;

// Re-export core types
pub use adapter::{adapt_request, adapt_response, MockRequest, MockResponse, ParsedBody, QueryParams};
pub use chain::{BindingId, Flow, Middleware, MiddlewareChain};
pub use compiler::{Artifact, Bundler, CommandBundler, TomlBundler};
pub use config::Config;
pub use diagnostics::{DiagnosticsSink, MemorySink, TracingSink};
pub use error::{
    BuildError, ChainError, LoadError, MockError, RequestAdaptationError, ResponseError, ShapeError,
};
pub use handler::{handler_fn, Handler, HandlerEntry};
pub use host::DevServer;
pub use http::{RawRequest, RawResponse};
pub use loader::{FsModuleLoader, ModuleLoader};
pub use plugin::{HostConfig, MockApiOptions, MockApiPlugin, Plugin, ServerContext};
pub use registrar::{Registrar, RegistrarState};
pub use watcher::EntryWatcher;

// Re-export commonly used types from dependencies
pub use axum;
pub use axum::http::StatusCode;
