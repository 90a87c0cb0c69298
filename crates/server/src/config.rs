use std::path::PathBuf;
use std::time::Duration;

use swiftlink_transfer::{DEFAULT_MAX_JOBS, DEFAULT_RECEIVE_DIR};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Clients beyond this count are kicked right after connecting.
    pub max_clients: usize,
    /// Silence allowed before a client is evicted.
    pub keep_alive: Duration,
    /// How often keep-alives are checked and job pools ticked.
    pub sweep_interval: Duration,
    /// Enables AES-256-CBC framing when set and non-empty.
    pub shared_secret: Option<String>,
    pub receive_dir: PathBuf,
    pub auto_receive: bool,
    /// Per-client job capacity.
    pub max_jobs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: 64,
            keep_alive: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            shared_secret: None,
            receive_dir: PathBuf::from(DEFAULT_RECEIVE_DIR),
            auto_receive: true,
            max_jobs: DEFAULT_MAX_JOBS,
        }
    }
}
