//! Launcher configuration: built-in defaults, an optional TOML file, then
//! command-line / environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::hotspot::{DEFAULT_ATTACH_TIMEOUT, HotSpotProvider};
use crate::Agent;

/// Agent loaded when nothing else is configured.
pub const DEFAULT_LIBRARY_PATH: &str = "/usr/local/scope/lib/libscope.so";

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one launcher run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Absolute path of the native agent, as seen by the target.
    pub library_path: PathBuf,
    /// Option string passed to `Agent_OnAttach`.
    pub options: Option<String>,
    /// Milliseconds to wait for the target's attach listener.
    pub attach_timeout_ms: u64,
    /// Override for the directory holding attach sockets and perf data.
    pub tmp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            library_path: PathBuf::from(DEFAULT_LIBRARY_PATH),
            options: None,
            attach_timeout_ms: DEFAULT_ATTACH_TIMEOUT.as_millis() as u64,
            tmp_dir: None,
        }
    }
}

/// Values that take precedence over the file, usually from the CLI.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub library_path: Option<PathBuf>,
    pub options: Option<String>,
    pub attach_timeout_ms: Option<u64>,
    pub tmp_dir: Option<PathBuf>,
}

impl Config {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(src: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let src = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Layer `overrides` over this configuration.
    pub fn merge(mut self, overrides: ConfigOverrides) -> Config {
        if let Some(path) = overrides.library_path {
            self.library_path = path;
        }
        if overrides.options.is_some() {
            self.options = overrides.options;
        }
        if let Some(ms) = overrides.attach_timeout_ms {
            self.attach_timeout_ms = ms;
        }
        if overrides.tmp_dir.is_some() {
            self.tmp_dir = overrides.tmp_dir;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.library_path.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "library_path must be absolute: {}",
                self.library_path.display()
            )));
        }
        if self.attach_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "attach_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    /// Provider honouring the timeout and temp dir settings.
    pub fn provider(&self) -> HotSpotProvider {
        let provider = HotSpotProvider::new().with_attach_timeout(self.attach_timeout());
        match &self.tmp_dir {
            Some(dir) => provider.with_tmp_dir(dir),
            None => provider,
        }
    }

    /// The agent this configuration loads.
    pub fn agent(&self) -> crate::Result<Agent> {
        let agent = Agent::from_path(&self.library_path)?;
        Ok(match &self.options {
            Some(options) => agent.with_options(options),
            None => agent,
        })
    }
}
