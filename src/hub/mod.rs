//! Live status fan-out hub.
//!
//! Tracks every open connection, routes envelopes to individual
//! clients, roles, or everyone, and reaps connections whose heartbeat
//! has gone quiet. Delivery is best-effort: a client whose outbound
//! queue is full is evicted rather than allowed to stall the pipeline.

pub mod protocol;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use protocol::{ClientRole, Envelope};

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue depth per connection
    pub queue_capacity: usize,
    /// Seconds of heartbeat silence before a connection is reaped
    pub heartbeat_timeout_secs: u64,
    /// Seconds between reaper sweeps
    pub reap_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            heartbeat_timeout_secs: 60,
            reap_interval_secs: 10,
        }
    }
}

/// Opaque identifier for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who an envelope should reach.
#[derive(Debug, Clone)]
pub enum Audience {
    /// Every connected client
    All,
    /// The connection(s) registered under a client id; the monitored
    /// user's device registers under its user id
    Client(String),
    /// Every connection registered with a role
    Role(ClientRole),
}

struct Connection {
    sender: mpsc::Sender<Envelope>,
    client_id: Option<String>,
    role: Option<ClientRole>,
    last_heartbeat: Instant,
}

/// Connection registry and fan-out router.
pub struct ConnectionHub {
    config: HubConfig,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionHub {
    /// Create an empty hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Admit a new connection and hand back its outbound queue.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let id = ConnectionId::new();
        self.connections.write().insert(
            id,
            Connection {
                sender: tx,
                client_id: None,
                role: None,
                last_heartbeat: Instant::now(),
            },
        );
        tracing::debug!(connection_id = %id, "Connection admitted");
        (id, rx)
    }

    /// Register a connection under a stable client id.
    ///
    /// Re-registration is idempotent: if the client id is already bound
    /// to another live connection, that older binding is cleared so a
    /// reconnect supersedes its predecessor.
    pub fn register(&self, id: ConnectionId, client_id: &str, role: Option<ClientRole>) {
        let mut connections = self.connections.write();
        for (other_id, conn) in connections.iter_mut() {
            if *other_id != id && conn.client_id.as_deref() == Some(client_id) {
                conn.client_id = None;
                tracing::debug!(
                    connection_id = %other_id,
                    client_id,
                    "Superseded stale registration"
                );
            }
        }
        if let Some(conn) = connections.get_mut(&id) {
            conn.client_id = Some(client_id.to_string());
            conn.role = role;
            tracing::info!(connection_id = %id, client_id, ?role, "Client registered");
        }
    }

    /// Record a heartbeat from a connection.
    pub fn heartbeat(&self, id: ConnectionId) {
        if let Some(conn) = self.connections.write().get_mut(&id) {
            conn.last_heartbeat = Instant::now();
        }
    }

    /// Remove a connection.
    pub fn disconnect(&self, id: ConnectionId) {
        if self.connections.write().remove(&id).is_some() {
            tracing::debug!(connection_id = %id, "Connection closed");
        }
    }

    /// Send an envelope to an audience.
    ///
    /// Connections whose queue is full or closed are evicted; one slow
    /// consumer must not hold back the rest.
    pub fn broadcast(&self, audience: &Audience, envelope: &Envelope) {
        let mut dead = Vec::new();
        {
            let connections = self.connections.read();
            for (id, conn) in connections.iter() {
                let wanted = match audience {
                    Audience::All => true,
                    Audience::Client(client_id) => {
                        conn.client_id.as_deref() == Some(client_id.as_str())
                    }
                    Audience::Role(role) => conn.role == Some(*role),
                };
                if !wanted {
                    continue;
                }
                if let Err(e) = conn.sender.try_send(envelope.clone()) {
                    tracing::warn!(connection_id = %id, error = %e, "Evicting unresponsive connection");
                    dead.push(*id);
                }
            }
        }
        let mut connections = self.connections.write();
        for id in dead {
            connections.remove(&id);
        }
    }

    /// Send an envelope to every connection registered under a client id.
    pub fn send_to_client(&self, client_id: &str, envelope: &Envelope) {
        self.broadcast(&Audience::Client(client_id.to_string()), envelope);
    }

    /// Send an envelope to a single connection.
    pub fn send_to_connection(&self, id: ConnectionId, envelope: Envelope) {
        let dead = {
            let connections = self.connections.read();
            match connections.get(&id) {
                Some(conn) => conn.sender.try_send(envelope).is_err(),
                None => false,
            }
        };
        if dead {
            tracing::warn!(connection_id = %id, "Evicting unresponsive connection");
            self.connections.write().remove(&id);
        }
    }

    /// Drop every connection whose last heartbeat is older than the
    /// configured timeout. Returns how many were reaped.
    pub fn evict_stale(&self) -> usize {
        let timeout = Duration::from_secs(self.config.heartbeat_timeout_secs);
        let now = Instant::now();
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|id, conn| {
            let alive = now.duration_since(conn.last_heartbeat) < timeout;
            if !alive {
                tracing::info!(connection_id = %id, "Reaping stale connection");
            }
            alive
        });
        before - connections.len()
    }

    /// Spawn the background reaper loop; it stops when `cancel` fires.
    pub fn spawn_reaper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(hub.config.reap_interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        hub.evict_stale();
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether any live connection is registered under a client id.
    pub fn client_connected(&self, client_id: &str) -> bool {
        self.connections
            .read()
            .values()
            .any(|c| c.client_id.as_deref() == Some(client_id))
    }
}
