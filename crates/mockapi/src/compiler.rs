// File: src/compiler.rs
// Purpose: Bundles the entry module and its imports into one loadable artifact

use crate::config::BundlerConfig;
use crate::error::BuildError;
use crate::loader::normalize_export;
use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Extension of every artifact the bundlers here produce.
pub const ARTIFACT_EXTENSION: &str = "json";

/// Self-contained output of a bundler run.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub text: String,
    pub extension: &'static str,
}

/// Turns an entry module into a single artifact.
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(&self, entry: &Path) -> Result<Artifact, BuildError>;

    fn name(&self) -> &'static str;
}

/// Build the bundler selected in configuration.
pub fn build_bundler(config: &BundlerConfig) -> anyhow::Result<Arc<dyn Bundler>> {
    match config {
        BundlerConfig::Named(name) if name == "toml" => Ok(Arc::new(TomlBundler)),
        BundlerConfig::Named(name) => bail!("unknown bundler '{}'", name),
        BundlerConfig::Command { command } => match command.split_first() {
            Some((program, args)) => Ok(Arc::new(CommandBundler::new(program, args.to_vec()))),
            None => bail!("bundler command is empty"),
        },
    }
}

/// Built-in bundler for TOML mock modules.
///
/// Every handler-list element of the form `{ import = "file.toml" }` is
/// replaced by the handlers the imported module exports, recursively.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlBundler;

#[async_trait]
impl Bundler for TomlBundler {
    async fn bundle(&self, entry: &Path) -> Result<Artifact, BuildError> {
        let entry = entry.to_path_buf();
        let module = tokio::task::spawn_blocking(move || bundle_module(&entry))
            .await
            .map_err(|e| BuildError::Task(e.to_string()))??;

        let text = serde_json::to_string_pretty(&module)
            .map_err(|e| BuildError::Task(e.to_string()))?;
        Ok(Artifact {
            text,
            extension: ARTIFACT_EXTENSION,
        })
    }

    fn name(&self) -> &'static str {
        "toml"
    }
}

/// Read the entry module and inline all of its imports.
pub fn bundle_module(entry: &Path) -> Result<JsonValue, BuildError> {
    if !entry.is_file() {
        return Err(BuildError::EntryNotFound(entry.to_path_buf()));
    }

    let mut module = read_module(entry)?;
    let mut stack = vec![canonical(entry)?];

    // Imports are resolved in whichever list the default export holds;
    // anything else is left for the loader to reject.
    let list = match module.get_mut("default") {
        Some(JsonValue::Array(list)) => Some(list),
        Some(JsonValue::Object(wrapper)) => match wrapper.get_mut("default") {
            Some(JsonValue::Array(list)) => Some(list),
            _ => None,
        },
        _ => None,
    };

    if let Some(list) = list {
        let items = std::mem::take(list);
        *list = inline_imports(items, entry, &mut stack)?;
    }

    Ok(module)
}

fn inline_imports(
    items: Vec<JsonValue>,
    from: &Path,
    stack: &mut Vec<PathBuf>,
) -> Result<Vec<JsonValue>, BuildError> {
    let mut out = Vec::with_capacity(items.len());

    for item in items {
        let Some(import) = import_target(&item) else {
            out.push(item);
            continue;
        };

        let base = from.parent().unwrap_or_else(|| Path::new("."));
        let target = base.join(import);
        if !target.is_file() {
            return Err(BuildError::UnresolvedImport {
                from: from.to_path_buf(),
                import: import.to_string(),
            });
        }

        let key = canonical(&target)?;
        if stack.contains(&key) {
            return Err(BuildError::ImportCycle(target));
        }

        let imported = read_module(&target)?;
        let handlers = normalize_export(imported).map_err(|e| BuildError::ImportShape {
            path: target.clone(),
            reason: e.to_string(),
        })?;

        stack.push(key);
        out.extend(inline_imports(handlers, &target, stack)?);
        stack.pop();
    }

    Ok(out)
}

fn import_target(item: &JsonValue) -> Option<&str> {
    let table = item.as_object()?;
    if table.len() != 1 {
        return None;
    }
    table.get("import")?.as_str()
}

fn read_module(path: &Path) -> Result<JsonValue, BuildError> {
    let source = fs::read_to_string(path).map_err(|source| BuildError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed: toml::Value = toml::from_str(&source).map_err(|e| BuildError::Syntax {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(toml_to_json(parsed))
}

/// Datetimes become their RFC 3339 text.
fn toml_to_json(value: toml::Value) -> JsonValue {
    match value {
        toml::Value::String(s) => JsonValue::String(s),
        toml::Value::Integer(i) => JsonValue::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        toml::Value::Boolean(b) => JsonValue::Bool(b),
        toml::Value::Datetime(d) => JsonValue::String(d.to_string()),
        toml::Value::Array(items) => JsonValue::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => JsonValue::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn canonical(path: &Path) -> Result<PathBuf, BuildError> {
    path.canonicalize().map_err(|source| BuildError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Delegates bundling to an external program.
///
/// `{entry}` in the arguments is replaced by the entry module path; the
/// program's stdout is the artifact.
#[derive(Debug, Clone)]
pub struct CommandBundler {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBundler {
    /// Longest a bundler run may take before it is killed.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Bundler for CommandBundler {
    async fn bundle(&self, entry: &Path) -> Result<Artifact, BuildError> {
        if !entry.is_file() {
            return Err(BuildError::EntryNotFound(entry.to_path_buf()));
        }

        // The program runs inside the entry's directory, so hand it an absolute path.
        let absolute = entry
            .canonicalize()
            .unwrap_or_else(|_| entry.to_path_buf());
        let entry_arg = absolute.to_string_lossy().into_owned();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{entry}", &entry_arg))
            .collect();

        let mut command = Command::new(&self.program);
        command.args(&args).kill_on_drop(true);
        if let Some(dir) = entry.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        // kill_on_drop ends the child when the timeout drops the future.
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                BuildError::Command(format!(
                    "'{}' did not finish within {:?}",
                    self.program, self.timeout
                ))
            })?
            .map_err(|e| BuildError::Command(format!("cannot run '{}': {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::Command(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| BuildError::Command(format!("'{}' wrote non-UTF-8 output", self.program)))?;
        if text.trim().is_empty() {
            return Err(BuildError::Command(format!(
                "'{}' produced no output",
                self.program
            )));
        }

        Ok(Artifact {
            text,
            extension: ARTIFACT_EXTENSION,
        })
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
