use std::path::PathBuf;
use std::time::Duration;

use swiftlink_transfer::DEFAULT_RECEIVE_DIR;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub address: String,
    /// Must match the server's secret; `None` or empty disables encryption.
    pub shared_secret: Option<String>,
    pub keep_alive_interval: Duration,
    /// How often the job pool is ticked without input.
    pub poll_interval: Duration,
    pub connect_attempts: u32,
    pub connect_timeout: Duration,
    pub receive_dir: PathBuf,
    pub auto_receive: bool,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            shared_secret: None,
            keep_alive_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            connect_attempts: 3,
            connect_timeout: Duration::from_secs(5),
            receive_dir: PathBuf::from(DEFAULT_RECEIVE_DIR),
            auto_receive: true,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("127.0.0.1:8080").with_secret("s3cret");
        assert_eq!(config.address, "127.0.0.1:8080");
        assert_eq!(config.shared_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.connect_attempts, 3);
        assert!(config.auto_receive);
        assert_eq!(config.receive_dir, PathBuf::from("Received"));
    }
}
