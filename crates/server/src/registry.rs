//! Connected-client registry.
//!
//! The only state shared between the coordinating loop and API callers.
//! All access goes through one mutex; readers get copies.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use swiftlink_protocol::{IdError, generate_unique_id};

/// Public view of a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    clients: Mutex<HashMap<String, ClientInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientInfo>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generates an ID unused by any connected client and registers `addr`
    /// under it, atomically.
    pub fn allocate_id(&self, addr: SocketAddr) -> Result<ClientInfo, IdError> {
        let mut clients = self.lock();
        let id = generate_unique_id(|id| clients.contains_key(id))?;
        let info = ClientInfo {
            id: id.clone(),
            addr,
            connected_at: Utc::now(),
        };
        clients.insert(id, info.clone());
        Ok(info)
    }

    pub fn remove(&self, id: &str) -> Option<ClientInfo> {
        self.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<ClientInfo> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Copies of all clients, oldest connection first.
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self.lock().values().cloned().collect();
        clients.sort_by_key(|c| c.connected_at);
        clients
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn allocate_registers_client() {
        let registry = SessionRegistry::new();
        let info = registry.allocate_id(addr()).unwrap();
        assert_eq!(info.id.len(), 4);
        assert_eq!(registry.get(&info.id), Some(info.clone()));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove(&info.id), Some(info.clone()));
        assert!(registry.remove(&info.id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = SessionRegistry::new();
        let a = registry.allocate_id(addr()).unwrap();
        let snapshot = registry.snapshot();
        registry.remove(&a.id);
        assert_eq!(snapshot, vec![a]);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn ids_unique_under_concurrent_accepts() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| registry.allocate_id(addr()).unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(ids.len(), 800);
        assert_eq!(registry.len(), 800);
    }
}
