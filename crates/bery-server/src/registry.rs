//! Connection registry.
//!
//! The single source of truth for who is reachable right now and on which
//! connection. Holds two maps: connection id to connection record, and
//! logical identity to the connection id it is currently bound to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use bery_shared::{ConnectionId, Envelope};

/// Registry shared between the transport handlers, the router and
/// deferred status tasks. The lock is never held across an `.await`.
pub type SharedRegistry = Arc<RwLock<ConnectionRegistry>>;

/// A live transport session.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Logical identity, `None` until the client registers.
    pub identity: Option<String>,
    pub display_name: Option<String>,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Envelope>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    identities: HashMap<String, ConnectionId>,
    /// Every identity that has ever registered in this process.
    seen: HashSet<String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a freshly accepted connection and return its id.
    pub fn accept(&mut self, outbound: mpsc::Sender<Envelope>) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            Connection {
                id,
                identity: None,
                display_name: None,
                connected_at: Utc::now(),
                outbound,
            },
        );
        debug!(conn = %id, total = self.connections.len(), "Connection accepted");
        id
    }

    /// Bind `identity` to the connection.
    ///
    /// Last registration wins: a previous connection bound to the same
    /// identity silently stops receiving routed messages but stays open.
    /// Returns `false` if the connection is unknown.
    pub fn register(&mut self, id: ConnectionId, identity: &str, display_name: &str) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };

        // Re-registering under a different name releases the old one.
        if let Some(previous) = conn.identity.replace(identity.to_string()) {
            if previous != identity && self.identities.get(&previous) == Some(&id) {
                self.identities.remove(&previous);
            }
        }
        conn.display_name = Some(display_name.to_string());

        if let Some(superseded) = self.identities.insert(identity.to_string(), id) {
            if superseded != id {
                info!(
                    user = %identity,
                    old = %superseded,
                    new = %id,
                    "Identity moved to a new connection"
                );
            }
        }
        self.seen.insert(identity.to_string());

        info!(conn = %id, user = %identity, name = %display_name, "User registered");
        true
    }

    /// Current connection for a logical identity.
    pub fn resolve(&self, identity: &str) -> Option<ConnectionId> {
        self.identities.get(identity).copied()
    }

    /// Remove a closed connection.
    ///
    /// The identity mapping is only dropped while it still points at this
    /// connection, so a stale disconnect cannot erase a newer binding.
    pub fn close(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&id)?;

        if let Some(identity) = &conn.identity {
            if self.identities.get(identity) == Some(&id) {
                self.identities.remove(identity);
                info!(conn = %id, user = %identity, "User went offline");
            } else {
                debug!(
                    conn = %id,
                    user = %identity,
                    "Closed connection no longer owned its identity"
                );
            }
        }

        debug!(conn = %id, total = self.connections.len(), "Connection removed");
        Some(conn)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn is_open(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Whether `identity` has registered at any point since startup.
    pub fn has_seen(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }

    /// How the connection is named to others: its identity when bound,
    /// otherwise the raw connection id.
    pub fn label(&self, id: &ConnectionId) -> String {
        self.connections
            .get(id)
            .and_then(|c| c.identity.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Queue an envelope on a connection without waiting.
    ///
    /// Returns `false` if the connection is gone or its queue is full.
    pub fn send(&self, id: &ConnectionId, envelope: Envelope) -> bool {
        let Some(conn) = self.connections.get(id) else {
            return false;
        };
        match conn.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                debug!(conn = %id, error = %e, "Dropping envelope for connection");
                false
            }
        }
    }

    /// Queue an envelope on every connection except `sender`.
    /// Returns how many connections accepted it.
    pub fn broadcast_except(&self, sender: &ConnectionId, envelope: &Envelope) -> usize {
        self.connections
            .keys()
            .filter(|id| *id != sender)
            .filter(|id| self.send(id, envelope.clone()))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of identities with a live binding.
    pub fn online_count(&self) -> usize {
        self.identities.len()
    }

    pub fn online_identities(&self) -> Vec<String> {
        self.identities.keys().cloned().collect()
    }
}
