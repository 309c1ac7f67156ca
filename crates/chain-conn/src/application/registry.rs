//! # Client Registry
//!
//! Concurrency-safe map from client id to client. Fan-out code takes a
//! snapshot and delivers without holding the lock, so a client being
//! removed concurrently at worst receives one extra event, which it drops.

use std::collections::HashMap;
use std::sync::Arc;

use conn_telemetry::CLIENTS_REGISTERED;
use parking_lot::RwLock;

use super::rescan_client::RescanClient;
use crate::domain::ClientId;

/// Registered rescan clients of one connection.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<RescanClient>>>,
}

impl ClientRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client`, replacing any entry with the same id.
    pub fn insert(&self, client: Arc<RescanClient>) {
        let mut clients = self.clients.write();
        clients.insert(client.id(), client);
        CLIENTS_REGISTERED.set(clients.len() as i64);
    }

    /// Unregister a client. Removing an unknown id is a no-op.
    pub fn remove(&self, id: ClientId) -> Option<Arc<RescanClient>> {
        let mut clients = self.clients.write();
        let removed = clients.remove(&id);
        CLIENTS_REGISTERED.set(clients.len() as i64);
        removed
    }

    /// Look up a client.
    pub fn get(&self, id: ClientId) -> Option<Arc<RescanClient>> {
        self.clients.read().get(&id).cloned()
    }

    /// Point-in-time copy of every registered client.
    pub fn snapshot(&self) -> Vec<Arc<RescanClient>> {
        self.clients.read().values().cloned().collect()
    }

    /// Unregister and return every client.
    pub fn drain(&self) -> Vec<Arc<RescanClient>> {
        let mut clients = self.clients.write();
        let drained = clients.drain().map(|(_, client)| client).collect();
        CLIENTS_REGISTERED.set(0);
        drained
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
