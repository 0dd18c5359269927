//! Configuration system for the `taskboard` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskboard_proto::task::{ValidationError, WorkspaceId};
use url::Url;

use crate::bus_client::{BusOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_JOIN_TIMEOUT, DEFAULT_MAX_FRAME_SIZE};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The server URL cannot be turned into a bus URL.
    #[error("invalid server url {0}")]
    InvalidUrl(String),

    /// The configured workspace id is unusable.
    #[error("invalid workspace: {0}")]
    InvalidWorkspace(#[from] ValidationError),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    client: ClientFileConfig,
}

/// `[client]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientFileConfig {
    server_url: Option<String>,
    bus_url: Option<String>,
    workspace: Option<String>,
    token: Option<String>,
    connect_timeout_secs: Option<u64>,
    join_timeout_secs: Option<u64>,
    max_frame_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    pub server_url: String,
    /// Event Bus URL; derived from `server_url` when not set.
    pub bus_url: Option<String>,
    /// Workspace opened by session commands.
    pub workspace: String,
    /// Bearer token from a previous `login`.
    pub token: Option<String>,
    /// Timeout for the bus upgrade plus `Welcome`.
    pub connect_timeout: Duration,
    /// Timeout for a `Joined` acknowledgment.
    pub join_timeout: Duration,
    /// Largest inbound bus frame accepted.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            bus_url: None,
            workspace: "default".to_string(),
            token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/taskboard/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let section = &file.client;

        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| section.server_url.clone())
                .unwrap_or(defaults.server_url),
            bus_url: cli.bus_url.clone().or_else(|| section.bus_url.clone()),
            workspace: cli
                .workspace
                .clone()
                .or_else(|| section.workspace.clone())
                .unwrap_or(defaults.workspace),
            token: cli.token.clone().or_else(|| section.token.clone()),
            connect_timeout: section
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            join_timeout: section
                .join_timeout_secs
                .map_or(defaults.join_timeout, Duration::from_secs),
            max_frame_size: section.max_frame_size.unwrap_or(defaults.max_frame_size),
        }
    }

    /// The Event Bus URL: the configured one, or `/ws` on the server with
    /// the scheme switched to `ws`/`wss`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidUrl`] if `server_url` is not an http(s) URL.
    pub fn resolved_bus_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.bus_url {
            return Ok(url.clone());
        }
        let invalid = || ConfigError::InvalidUrl(self.server_url.clone());
        let mut url = Url::parse(&self.server_url).map_err(|_| invalid())?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            _ => return Err(invalid()),
        };
        url.set_scheme(scheme).map_err(|()| invalid())?;
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .push("ws");
        Ok(url.into())
    }

    /// The configured workspace as a validated id.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidWorkspace`] if it is blank.
    pub fn workspace_id(&self) -> Result<WorkspaceId, ConfigError> {
        Ok(WorkspaceId::parse(self.workspace.clone())?)
    }

    /// Bus timeouts and limits.
    #[must_use]
    pub const fn bus_options(&self) -> BusOptions {
        BusOptions {
            connect_timeout: self.connect_timeout,
            join_timeout: self.join_timeout,
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Global CLI arguments shared by every subcommand.
#[derive(clap::Args, Debug, Default)]
pub struct CliArgs {
    /// Base URL of the Taskboard server.
    #[arg(long, global = true, env = "TASKBOARD_SERVER_URL")]
    pub server_url: Option<String>,

    /// Event Bus URL (default: `/ws` on the server).
    #[arg(long, global = true, env = "TASKBOARD_BUS_URL")]
    pub bus_url: Option<String>,

    /// Workspace to open.
    #[arg(short, long, global = true, env = "TASKBOARD_WORKSPACE")]
    pub workspace: Option<String>,

    /// Bearer token printed by `login`.
    #[arg(long, global = true, env = "TASKBOARD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "TASKBOARD_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskboard.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskboard").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
