//! Connection registry — identity to live connection lookup.
//!
//! DESIGN
//! ======
//! Targeted notifications (rematch invites, their responses) bypass room
//! broadcast and go straight to every open connection of one identity.
//! One identity may hold several connections (two tabs); delivery fans out
//! to all of them. The registry has its own lock, independent of any room
//! lock, because connect/disconnect storms must never contend with moves.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::frame::Frame;

/// Concurrent identity → connection map. Cheap to clone, shared freely.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, HashMap<Uuid, mpsc::Sender<Frame>>>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for an identity.
    pub async fn insert(&self, identity: &str, client_id: Uuid, tx: mpsc::Sender<Frame>) {
        let mut inner = self.inner.write().await;
        inner.entry(identity.to_string()).or_default().insert(client_id, tx);
        debug!(identity, %client_id, "registry: connection added");
    }

    /// Remove one connection. The identity entry disappears with its last
    /// connection.
    pub async fn remove(&self, identity: &str, client_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(connections) = inner.get_mut(identity) {
            connections.remove(&client_id);
            if connections.is_empty() {
                inner.remove(identity);
            }
        }
        debug!(identity, %client_id, "registry: connection removed");
    }

    /// Whether the identity holds at least one live connection.
    pub async fn is_online(&self, identity: &str) -> bool {
        self.inner.read().await.contains_key(identity)
    }

    /// Deliver a frame to every connection of `identity`. Best-effort: a
    /// full or closed channel drops that copy silently.
    pub async fn send_to(&self, identity: &str, frame: &Frame) {
        let inner = self.inner.read().await;
        let Some(connections) = inner.get(identity) else {
            return;
        };
        for tx in connections.values() {
            let _ = tx.try_send(frame.clone());
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
