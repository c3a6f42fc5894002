//! Client registry and control grant
//!
//! Tracks every client that completed the handshake and the single name currently allowed to
//! drive the actuators. Both live behind one lock so a disconnect and a grant can never
//! interleave into a grant naming a departed client.

use crate::error::{RigError, RigResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A connected client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
    /// Connection handle, unique per live TCP connection
    pub id: Uuid,
    /// Peer address
    pub address: SocketAddr,
    /// Display name announced in the handshake
    pub name: String,
    /// Handshake completion time
    pub connected_at: DateTime<Utc>,
}

/// Outcome of removing a client
#[derive(Debug, Clone)]
pub struct RemovedClient {
    /// The record that was removed
    pub client: Client,
    /// Whether the client held the control grant (now cleared)
    pub held_grant: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Connection order
    clients: Vec<Client>,
    grantee: Option<String>,
}

/// Shared roster of connected clients plus the control grant
#[derive(Clone, Default)]
pub struct ClientRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with control pre-granted to `name`
    pub fn with_grantee(name: Option<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                clients: Vec::new(),
                grantee: name.filter(|n| !n.is_empty()),
            })),
        }
    }

    /// Record a client that finished its handshake
    ///
    /// Empty names and names already in use are rejected with `ClientHandshakeRejected`.
    pub async fn register_client(&self, name: String, address: SocketAddr) -> RigResult<Client> {
        let mut state = self.state.write().await;
        if name.is_empty() || state.clients.iter().any(|c| c.name == name) {
            return Err(RigError::ClientHandshakeRejected { name, address });
        }

        let client = Client {
            id: Uuid::new_v4(),
            address,
            name,
            connected_at: Utc::now(),
        };
        state.clients.push(client.clone());
        Ok(client)
    }

    /// Evict a client; clears the grant if that client held it
    pub async fn remove_client(&self, id: Uuid) -> Option<RemovedClient> {
        let mut state = self.state.write().await;
        let index = state.clients.iter().position(|c| c.id == id)?;
        let client = state.clients.remove(index);
        let held_grant = state.grantee.as_deref() == Some(client.name.as_str());
        if held_grant {
            state.grantee = None;
        }
        Some(RemovedClient { client, held_grant })
    }

    /// Hand control to `name`, replacing any previous grantee
    ///
    /// Returns the previous grantee.
    pub async fn grant(&self, name: impl Into<String>) -> Option<String> {
        let name = name.into();
        let mut state = self.state.write().await;
        state.grantee.replace(name)
    }

    /// Withdraw control from whoever holds it; returns the previous grantee
    pub async fn revoke(&self) -> Option<String> {
        self.state.write().await.grantee.take()
    }

    pub async fn current_grantee(&self) -> Option<String> {
        self.state.read().await.grantee.clone()
    }

    /// Whether `name` currently holds control
    pub async fn is_grantee(&self, name: &str) -> bool {
        self.state.read().await.grantee.as_deref() == Some(name)
    }

    /// Roster snapshot, oldest connection first
    pub async fn clients(&self) -> Vec<Client> {
        self.state.read().await.clients.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<Client> {
        self.state.read().await.clients.iter().find(|c| c.id == id).cloned()
    }

    /// Whether a client with this name is connected
    pub async fn is_connected(&self, name: &str) -> bool {
        self.state.read().await.clients.iter().any(|c| c.name == name)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = ClientRegistry::new();
        let client = registry
            .register_client("scope-1".to_string(), addr(4000))
            .await
            .unwrap();

        assert_eq!(client.name, "scope-1");
        assert!(registry.is_connected("scope-1").await);
        assert_eq!(registry.len().await, 1);

        let removed = registry.remove_client(client.id).await.unwrap();
        assert_eq!(removed.client.id, client.id);
        assert!(!removed.held_grant);
        assert!(registry.is_empty().await);

        // Removing twice is harmless
        assert!(registry.remove_client(client.id).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = ClientRegistry::new();
        registry
            .register_client("scope-1".to_string(), addr(4000))
            .await
            .unwrap();

        let err = registry
            .register_client("scope-1".to_string(), addr(4001))
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::ClientHandshakeRejected { .. }));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let registry = ClientRegistry::new();
        assert!(registry
            .register_client(String::new(), addr(4000))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_single_grantee() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.grant("scope-1").await, None);
        assert_eq!(registry.grant("scope-2").await.as_deref(), Some("scope-1"));

        assert!(registry.is_grantee("scope-2").await);
        assert!(!registry.is_grantee("scope-1").await);

        assert_eq!(registry.revoke().await.as_deref(), Some("scope-2"));
        assert_eq!(registry.current_grantee().await, None);
    }

    #[tokio::test]
    async fn test_removing_grantee_clears_grant() {
        let registry = ClientRegistry::new();
        let holder = registry
            .register_client("scope-1".to_string(), addr(4000))
            .await
            .unwrap();
        let other = registry
            .register_client("scope-2".to_string(), addr(4001))
            .await
            .unwrap();
        registry.grant("scope-1").await;

        // Another client leaving keeps the grant
        assert!(!registry.remove_client(other.id).await.unwrap().held_grant);
        assert!(registry.is_grantee("scope-1").await);

        assert!(registry.remove_client(holder.id).await.unwrap().held_grant);
        assert_eq!(registry.current_grantee().await, None);
    }

    #[tokio::test]
    async fn test_roster_is_ordered_by_connection() {
        let registry = ClientRegistry::with_grantee(Some("scope-2".to_string()));
        for (i, name) in ["scope-1", "scope-2", "scope-3"].iter().enumerate() {
            registry
                .register_client(name.to_string(), addr(4000 + i as u16))
                .await
                .unwrap();
        }

        let names: Vec<String> = registry.clients().await.into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["scope-1", "scope-2", "scope-3"]);
        assert_eq!(registry.current_grantee().await.as_deref(), Some("scope-2"));
    }
}
