//! Plugin launch configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{PluginError, Result};

/// Time a plugin gets to exit after the graceful-stop signal before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

fn default_stop_timeout_ms() -> u64 {
    1000
}

/// Launch configuration for a single plugin, parsed from TOML.
///
/// ```toml
/// path = "/usr/local/bin/echo-plugin"
/// args = ["--name", "Echo"]
/// stop_timeout_ms = 500
///
/// [env]
/// RUST_LOG = "debug"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PluginConfig {
    /// Executable to launch.
    pub path: PathBuf,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Grace period between the stop signal and the forced kill.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Extra environment variables set on the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory of the child; inherited when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl PluginConfig {
    /// Configuration for `path` with every other field defaulted.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            stop_timeout_ms: default_stop_timeout_ms(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| PluginError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Stop timeout as a [`Duration`].
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Check field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(PluginError::Config("path must not be empty".into()));
        }

        if self.stop_timeout_ms == 0 {
            return Err(PluginError::Config(
                "stop_timeout_ms must be greater than zero".into(),
            ));
        }

        if let Some(ref dir) = self.working_dir {
            if !dir.is_dir() {
                return Err(PluginError::Config(format!(
                    "working_dir is not a directory: {}",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}
