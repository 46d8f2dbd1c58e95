//! Backend presets and the JSON settings file.
//!
//! Settings file lookup order:
//! 1. `--config <path>` on the command line
//! 2. `FINDER_IPC_CONFIG` environment variable
//! 3. `<config_dir>/finder-ipc/config.json` (e.g. `~/.config/finder-ipc/config.json`)
//! 4. Built-in presets for `pop-launcher` and `gf`
//!
//! ```json
//! {
//!   "default_backend": "gf",
//!   "backends": [
//!     { "name": "gf", "command": "gf", "protocol": "text", "resolve_mime": true }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ipc::{BackendCommand, ClientOptions, ProtocolKind, StderrMode};

/// Environment variable naming a settings file.
pub const CONFIG_ENV: &str = "FINDER_IPC_CONFIG";

/// Environment variable naming the backend to use.
pub const BACKEND_ENV: &str = "FINDER_IPC_BACKEND";

/// Default per-search deadline.
const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown backend `{0}`")]
    UnknownBackend(String),

    #[error("No backends configured")]
    NoBackends,
}

/// How to start and talk to one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub protocol: ProtocolKind,
    #[serde(default)]
    pub stderr: StderrMode,
    #[serde(default)]
    pub query_prefix: String,
    #[serde(default)]
    pub resolve_mime: bool,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
}

fn default_search_timeout_ms() -> u64 {
    DEFAULT_SEARCH_TIMEOUT_MS
}

impl BackendConfig {
    /// pop-launcher speaking JSON lines; the `find ` prefix selects its file
    /// search plugin.
    pub fn pop_launcher() -> Self {
        Self {
            name: "pop-launcher".into(),
            command: "pop-launcher".into(),
            args: Vec::new(),
            protocol: ProtocolKind::Json,
            stderr: StderrMode::Piped,
            query_prefix: "find ".into(),
            resolve_mime: false,
            search_timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
        }
    }

    /// gf fuzzy file finder speaking the delimited-text protocol.
    pub fn fuzzy_finder() -> Self {
        Self {
            name: "gf".into(),
            command: "gf".into(),
            args: Vec::new(),
            protocol: ProtocolKind::Text,
            stderr: StderrMode::Null,
            query_prefix: String::new(),
            resolve_mime: true,
            search_timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
        }
    }

    pub fn command(&self) -> BackendCommand {
        BackendCommand::new(&self.command)
            .args(self.args.iter().cloned())
            .stderr(self.stderr)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            query_prefix: self.query_prefix.clone(),
            resolve_mime: self.resolve_mime,
        }
    }
}

/// Top-level settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default = "preset_backends")]
    pub backends: Vec<BackendConfig>,
}

fn preset_backends() -> Vec<BackendConfig> {
    vec![BackendConfig::pop_launcher(), BackendConfig::fuzzy_finder()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_backend: None,
            backends: preset_backends(),
        }
    }
}

impl Settings {
    /// Load settings following the documented lookup order.
    ///
    /// An explicitly named file (flag or environment) must exist; the default
    /// location is optional and falls back to the presets.
    pub fn load(cli_path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        if let Some(path) = cli_path.map(Path::to_path_buf).or(env_path) {
            return Self::from_path(&path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_path(&path),
            _ => {
                debug!("No settings file found, using built-in backends");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// `<config_dir>/finder-ipc/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("finder-ipc").join("config.json"))
    }

    /// Pick a backend: `requested`, then `FINDER_IPC_BACKEND`, then
    /// `default_backend`, then the first configured one.
    pub fn select_backend(&self, requested: Option<&str>) -> Result<&BackendConfig, ConfigError> {
        let from_env = std::env::var(BACKEND_ENV).ok();
        self.select_backend_from(requested.or(from_env.as_deref()))
    }

    fn select_backend_from(&self, requested: Option<&str>) -> Result<&BackendConfig, ConfigError> {
        match requested.or(self.default_backend.as_deref()) {
            Some(name) => self
                .backends
                .iter()
                .find(|backend| backend.name == name)
                .ok_or_else(|| ConfigError::UnknownBackend(name.to_string())),
            None => self.backends.first().ok_or(ConfigError::NoBackends),
        }
    }
}
