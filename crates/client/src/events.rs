use swiftlink_transfer::JobEvent;

/// Notifications from a [`SwiftClient`](crate::SwiftClient).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server assigned this client its ID.
    Connected { client_id: String },
    /// The connection ended. Fired once.
    Disconnected { reason: String },
    /// A non-command payload arrived.
    MessageReceived { message: String },
    Transfer(JobEvent),
}
