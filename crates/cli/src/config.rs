//! Configuration management for the CLI

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration, read from `~/.config/importctl/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// API endpoint URL
    pub api_url: Option<String>,
    /// Namespace for workload references without one
    pub default_namespace: Option<String>,
    /// Output format when `--format` is not given
    pub default_format: Option<OutputFormat>,
}

impl Config {
    /// Load configuration from the default file; missing file means defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// API URL from the flag or environment, then the file, then the default
    pub fn api_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn format(&self, flag: Option<OutputFormat>) -> OutputFormat {
        flag.or(self.default_format).unwrap_or_default()
    }

    /// Split `namespace/name`; a bare name uses the configured namespace
    pub fn workload_ref(&self, reference: &str) -> Result<(String, String)> {
        let (namespace, name) = match reference.split_once('/') {
            Some((namespace, name)) => (namespace.to_string(), name.to_string()),
            None => (
                self.default_namespace
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
                reference.to_string(),
            ),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            anyhow::bail!("expected <namespace>/<name>, got '{}'", reference);
        }
        Ok((namespace, name))
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("importctl").join("config.json"))
    }
}
