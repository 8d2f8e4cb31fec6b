//! CLI configuration

use std::path::{Path, PathBuf};

use anyhow::Context;
use graft_core::DEFAULT_DEPTH;
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "GRAFT_CONFIG";

/// Location of `graft.toml`; `GRAFT_CONFIG` overrides it
pub fn config_file_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("graft")
        .join("graft.toml")
}

/// Get default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("graft")
}

/// Configuration for the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub default_depth: i32,
    /// Schema file used when `--schema` is not given
    pub schema: Option<PathBuf>,
    pub output: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_depth: DEFAULT_DEPTH,
            schema: None,
            output: "table".to_string(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when missing or unreadable
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&config_file_path())
    }

    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }

    pub fn keys() -> &'static [&'static str] {
        &["data_dir", "default_depth", "schema", "output"]
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let path_value = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string())
        };
        match key {
            "data_dir" => Some(path_value(&self.data_dir)),
            "default_depth" => Some(self.default_depth.to_string()),
            "schema" => Some(path_value(&self.schema)),
            "output" => Some(self.output.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "data_dir" => self.data_dir = Some(PathBuf::from(value)),
            "schema" => self.schema = Some(PathBuf::from(value)),
            "default_depth" => {
                let depth: i32 = value
                    .parse()
                    .with_context(|| format!("'{}' is not an integer", value))?;
                if depth < 0 {
                    anyhow::bail!("default_depth must be zero or greater, got {}", depth);
                }
                self.default_depth = depth;
            }
            "output" => match value {
                "table" | "json" => self.output = value.to_string(),
                other => anyhow::bail!("output must be 'table' or 'json', got '{}'", other),
            },
            other => anyhow::bail!(
                "Unknown config key: {} (available: {})",
                other,
                Self::keys().join(", ")
            ),
        }
        Ok(())
    }
}
