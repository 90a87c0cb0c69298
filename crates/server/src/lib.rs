//! SwiftLink connection manager.
//!
//! Accepts any number of TCP clients, gives each a short ID and its own
//! transfer job pool, answers control commands and evicts clients that stop
//! sending keep-alives.

use std::time::Duration;

mod config;
mod events;
mod registry;
mod server;
mod session;

pub use config::ServerConfig;
pub use events::ServerEvent;
pub use registry::{ClientInfo, SessionRegistry};
pub use server::ConnectionManager;

/// Outbound frames buffered per client before sends are dropped.
pub const SEND_BUFFER_SIZE: usize = 1024;

/// Socket read size.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound on a single socket write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Kick reasons sent to clients.
pub mod reason {
    pub const TOO_MANY_CLIENTS: &str = "too many clients";
    pub const KEEP_ALIVE_TIMEOUT: &str = "keep-alive timeout";
    pub const REQUESTED: &str = "requested";
    pub const SHUTTING_DOWN: &str = "server shutting down";
    /// Peer closed the socket; no kick is sent.
    pub const CONNECTION_CLOSED: &str = "connection closed";
}

/// Errors produced by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] swiftlink_protocol::CodecError),

    #[error("transfer error: {0}")]
    Transfer(#[from] swiftlink_transfer::TransferError),

    #[error("server already running")]
    AlreadyRunning,

    #[error("server not running")]
    NotRunning,

    #[error("client not found: {0}")]
    ClientNotFound(String),
}
