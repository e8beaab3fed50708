// File: src/loader.rs
// Purpose: Persists the bundled artifact, loads it back and normalizes its export

use crate::compiler::Bundler;
use crate::definition::HandlerDefinition;
use crate::error::{LoadError, ShapeError};
use crate::handler::HandlerEntry;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Loads the handler sequence a module source exports.
///
/// Implementations decide how code is compiled and brought into the
/// process; callers only see the resulting entries.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, source: &Path) -> Result<Vec<HandlerEntry>, LoadError>;
}

/// Loader that goes through an on-disk artifact next to the entry module.
pub struct FsModuleLoader {
    bundler: Arc<dyn Bundler>,
}

impl FsModuleLoader {
    pub fn new(bundler: Arc<dyn Bundler>) -> Self {
        Self { bundler }
    }

    /// `<dir>/index.toml` -> `<dir>/index.json`. Never the source itself.
    pub fn artifact_path(source: &Path, extension: &str) -> PathBuf {
        let path = source.with_extension(extension);
        if path == source {
            source.with_extension(format!("bundle.{}", extension))
        } else {
            path
        }
    }
}

#[async_trait]
impl ModuleLoader for FsModuleLoader {
    async fn load(&self, source: &Path) -> Result<Vec<HandlerEntry>, LoadError> {
        let artifact = self.bundler.bundle(source).await?;
        let path = Self::artifact_path(source, artifact.extension);

        // The write is awaited to completion before the artifact is read back.
        tokio::fs::write(&path, artifact.text.as_bytes())
            .await
            .map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Loaded artifact {:?} ({} bytes)", path, text.len());

        let module: JsonValue =
            serde_json::from_str(&text).map_err(|e| ShapeError::NotJson(e.to_string()))?;
        Ok(entries_from_module(module)?)
    }
}

/// Unwrap a module's default export into its handler list.
///
/// Accepts `{ default: [...] }` and `{ default: { default: [...] } }`;
/// exactly one wrapper level is removed.
pub fn normalize_export(module: JsonValue) -> Result<Vec<JsonValue>, ShapeError> {
    let JsonValue::Object(mut module) = module else {
        return Err(ShapeError::MissingDefault);
    };
    let export = module.remove("default").ok_or(ShapeError::MissingDefault)?;

    match export {
        JsonValue::Array(list) => Ok(list),
        JsonValue::Object(mut wrapper) => match wrapper.remove("default") {
            Some(JsonValue::Array(list)) => Ok(list),
            _ => Err(ShapeError::NotHandlerList),
        },
        _ => Err(ShapeError::NotHandlerList),
    }
}

/// Turn a loaded module into handler entries, keeping export order.
pub fn entries_from_module(module: JsonValue) -> Result<Vec<HandlerEntry>, ShapeError> {
    normalize_export(module)?
        .into_iter()
        .enumerate()
        .map(|(index, value)| HandlerDefinition::from_value(index, value)?.into_entry(index))
        .collect()
}
