// File: src/config.rs
// Purpose: Configuration parsing from mockapi.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub mock: MockConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Project root the mock directory is resolved against
    #[serde(default = "default_root")]
    pub root: String,

    /// Execution mode; the mock plugin only runs in "development"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Largest request body the server buffers
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Mock handler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockConfig {
    /// Directory holding the mock modules (default: "mock-api")
    #[serde(default = "default_mock_files_dir")]
    pub mock_files_dir: String,

    /// Entry module inside that directory (default: "index.toml")
    #[serde(default = "default_entry_file")]
    pub entry_file: String,

    /// Rebuild when the entry module changes
    #[serde(default = "default_true")]
    pub watch: bool,

    #[serde(default)]
    pub bundler: BundlerConfig,

    /// Built-in middlewares installed before the mock handlers, in order
    #[serde(default)]
    pub extra_middlewares: Vec<String>,
}

/// Which bundler compiles the entry module.
///
/// ```toml
/// bundler = "toml"
/// # or
/// bundler = { command = ["node", "bundle.js", "{entry}"] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BundlerConfig {
    Named(String),
    Command { command: Vec<String> },
}

impl Default for BundlerConfig {
    fn default() -> Self {
        BundlerConfig::Named("toml".to_string())
    }
}

// Default values
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5173
}

fn default_root() -> String {
    ".".to_string()
}

fn default_mode() -> String {
    "development".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_mock_files_dir() -> String {
    "mock-api".to_string()
}

fn default_entry_file() -> String {
    "index.toml".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            root: default_root(),
            mode: default_mode(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            mock_files_dir: default_mock_files_dir(),
            entry_file: default_entry_file(),
            watch: true,
            bundler: BundlerConfig::default(),
            extra_middlewares: Vec::new(),
        }
    }
}

impl MockConfig {
    /// `<root>/<mock_files_dir>/<entry_file>`
    pub fn entry_path(&self, root: &Path) -> PathBuf {
        root.join(&self.mock_files_dir).join(&self.entry_file)
    }
}

impl Config {
    /// Load configuration from mockapi.toml
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // If file doesn't exist or is empty, return default config
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Apply MOCKAPI_MODE / MOCKAPI_PORT overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(
            std::env::var("MOCKAPI_MODE").ok(),
            std::env::var("MOCKAPI_PORT").ok(),
        )
    }

    fn apply_overrides(&mut self, mode: Option<String>, port: Option<String>) -> Result<()> {
        if let Some(mode) = mode {
            self.server.mode = mode;
        }
        if let Some(port) = port {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid MOCKAPI_PORT: {:?}", port))?;
        }
        Ok(())
    }
}
