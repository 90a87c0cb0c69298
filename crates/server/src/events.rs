use swiftlink_transfer::JobEvent;

use crate::registry::ClientInfo;

/// Notifications from the connection manager.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected(ClientInfo),
    /// Emitted once per client, whatever ended the session.
    ClientDisconnected { client: ClientInfo, reason: String },
    /// A non-command payload arrived.
    MessageReceived { client_id: String, message: String },
    /// A job in the client's pool changed.
    Transfer { client_id: String, event: JobEvent },
}

impl ServerEvent {
    pub fn client_id(&self) -> &str {
        match self {
            Self::ClientConnected(client) | Self::ClientDisconnected { client, .. } => &client.id,
            Self::MessageReceived { client_id, .. } | Self::Transfer { client_id, .. } => client_id,
        }
    }
}
