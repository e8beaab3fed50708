// File: src/error.rs
// Purpose: Error taxonomy for the build, load, adapt and dispatch stages

use std::path::PathBuf;
use thiserror::Error;

/// Compiling the entry module into an artifact failed.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("entry module not found: {}", .0.display())]
    EntryNotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("syntax error in {}: {message}", path.display())]
    Syntax { path: PathBuf, message: String },

    #[error("unresolved import '{import}' in {}", from.display())]
    UnresolvedImport { from: PathBuf, import: String },

    #[error("import cycle through {}", .0.display())]
    ImportCycle(PathBuf),

    #[error("invalid export in imported module {}: {reason}", path.display())]
    ImportShape { path: PathBuf, reason: String },

    #[error("bundler command failed: {0}")]
    Command(String),

    #[error("bundler task failed: {0}")]
    Task(String),
}

/// The loaded module does not export a handler sequence.
#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("artifact is not valid JSON: {0}")]
    NotJson(String),

    #[error("module has no default export")]
    MissingDefault,

    #[error("default export is neither a handler list nor {{ default: [...] }}")]
    NotHandlerList,

    #[error("handler entry #{index} is invalid: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// Any failure of a compile + persist + import cycle.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("artifact I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The inbound request URL could not be parsed.
#[derive(Debug, Error)]
#[error("cannot parse request url '{url}': {source}")]
pub struct RequestAdaptationError {
    pub url: String,
    #[source]
    pub source: url::ParseError,
}

/// Misuse of a raw response.
#[derive(Debug, Error, PartialEq)]
pub enum ResponseError {
    #[error("response already ended")]
    AlreadyEnded,

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("cannot serialize JSON payload: {0}")]
    Serialize(String),
}

/// Failures surfaced by a middleware while the host chain dispatches a request.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Adaptation(#[from] RequestAdaptationError),

    /// A user handler failed. Carried unchanged to the host's error path.
    #[error("handler for '{path}' failed: {source}")]
    Handler {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("middleware failed: {0}")]
    Middleware(#[source] anyhow::Error),
}

/// Everything the diagnostics sink can be told about.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("cannot set mock handlers: {0}")]
    Load(#[from] LoadError),

    #[error("file watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

impl MockError {
    pub fn is_build_error(&self) -> bool {
        matches!(self, MockError::Load(LoadError::Build(_)))
    }

    pub fn is_shape_error(&self) -> bool {
        matches!(self, MockError::Load(LoadError::Shape(_)))
    }
}
