//! File server configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/swiftlink/fileserver.toml`
//! - Windows: `%APPDATA%/swiftlink/fileserver.toml`
//!
//! Command-line flags override individual values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use swiftlink_client::ClientConfig;
use swiftlink_server::ServerConfig;
use swiftlink_transfer::{DEFAULT_MAX_JOBS, DEFAULT_RECEIVE_DIR};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listening port for `serve` (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret for frame encryption. Empty disables encryption.
    #[serde(default)]
    pub shared_secret: String,

    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Seconds of silence before the server evicts a client.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Seconds between client keep-alives.
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_secs: u64,

    /// Directory incoming files are stored under.
    #[serde(default = "default_receive_dir")]
    pub receive_dir: PathBuf,

    #[serde(default = "default_true")]
    pub auto_receive: bool,

    /// Transfer jobs per connection.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_max_clients() -> usize {
    64
}

fn default_keep_alive() -> u64 {
    30
}

fn default_keep_alive_interval() -> u64 {
    10
}

fn default_receive_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RECEIVE_DIR)
}

fn default_true() -> bool {
    true
}

fn default_max_jobs() -> usize {
    DEFAULT_MAX_JOBS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            shared_secret: String::new(),
            max_clients: default_max_clients(),
            keep_alive_secs: default_keep_alive(),
            keep_alive_interval_secs: default_keep_alive_interval(),
            receive_dir: default_receive_dir(),
            auto_receive: default_true(),
            max_jobs: default_max_jobs(),
        }
    }
}

impl Config {
    /// Loads `path`, or the platform config file when `path` is `None`.
    ///
    /// An explicit path must exist. The platform file is created with
    /// defaults if missing.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        let path = config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            if let Err(e) = config.save_to(&path) {
                tracing::debug!(path = %path.display(), "could not write default config: {e:#}");
            }
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;

        // The file may hold the shared secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn secret(&self) -> Option<String> {
        Some(self.shared_secret.clone()).filter(|s| !s.is_empty())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            max_clients: self.max_clients,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            shared_secret: self.secret(),
            receive_dir: self.receive_dir.clone(),
            auto_receive: self.auto_receive,
            max_jobs: self.max_jobs,
            ..ServerConfig::default()
        }
    }

    pub fn client_config(&self, address: &str) -> ClientConfig {
        ClientConfig {
            shared_secret: self.secret(),
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval_secs),
            receive_dir: self.receive_dir.clone(),
            auto_receive: self.auto_receive,
            ..ClientConfig::new(address)
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("swiftlink").join("fileserver.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("swiftlink")
            .join("fileserver.toml")
    }
}
