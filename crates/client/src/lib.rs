//! SwiftLink client.
//!
//! Connects to a SwiftLink server, keeps the session alive and runs file
//! transfers through its own job pool.

use std::time::Duration;

mod client;
mod config;
mod events;

pub use client::SwiftClient;
pub use config::ClientConfig;
pub use events::ClientEvent;

/// Delay between connect attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single socket write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reason reported when the server closes the socket without a kick.
pub const CONNECTION_CLOSED: &str = "connection closed";

/// Reason reported after [`SwiftClient::disconnect`].
pub const CLIENT_DISCONNECT: &str = "client disconnect";

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {address} after {attempts} attempts")]
    Connect { address: String, attempts: u32 },

    #[error("codec error: {0}")]
    Codec(#[from] swiftlink_protocol::CodecError),

    #[error("transfer error: {0}")]
    Transfer(#[from] swiftlink_transfer::TransferError),

    #[error("not connected")]
    NotConnected,
}
