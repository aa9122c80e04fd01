use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{ConversationId, Principal};

pub mod handshake;
pub mod message_types;
pub mod session;

pub use handshake::{AdmissionError, HandshakeSupervisor};
pub use message_types::WsOutboundEvent;

/// Unique identifier of one admitted WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("send timed out")]
    Timeout,
}

/// Server-to-client half of a live connection.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Hand one text frame to the connection.
    async fn deliver(&self, payload: Arc<str>) -> Result<(), SinkError>;

    /// Ask the transport to close. Must not block.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// An admitted connection.
///
/// Conversation and principal are bound once at admission and never change.
/// The registry only holds clones of this handle; the socket itself belongs to
/// its session.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    conversation_id: ConversationId,
    principal: Principal,
    sink: Arc<dyn ConnectionSink>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        conversation_id: ConversationId,
        principal: Principal,
        sink: Arc<dyn ConnectionSink>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            principal,
            sink,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn principal(&self) -> Principal {
        self.principal
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    pub fn close(&self) {
        self.sink.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("conversation_id", &self.conversation_id)
            .field("user_id", &self.principal.user_id)
            .finish()
    }
}

/// Result of one broadcast, for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Default)]
struct RegistryState {
    // conversation_id -> connections subscribed to it
    entries: HashMap<ConversationId, HashMap<ConnectionId, Connection>>,
    // connection -> the single conversation it is subscribed to
    index: HashMap<ConnectionId, ConversationId>,
    // set by close_all; later subscribers are closed instead of added
    closing: bool,
}

impl RegistryState {
    fn remove(&mut self, conversation_id: ConversationId, id: ConnectionId) -> Option<Connection> {
        let subscribers = self.entries.get_mut(&conversation_id)?;
        let removed = subscribers.remove(&id);
        if subscribers.is_empty() {
            self.entries.remove(&conversation_id);
        }
        if removed.is_some() {
            self.index.remove(&id);
        }
        removed
    }
}

/// Live subscribers per conversation.
///
/// A connection sits in at most one entry, entries are created on first
/// subscribe and dropped as soon as they empty. Broadcast works on a snapshot
/// taken under the lock and sends with the lock released, so a slow peer never
/// blocks subscribe/unsubscribe.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::default())),
            send_timeout,
        }
    }

    /// Add `connection` to the entry of `conversation_id`, creating the entry
    /// if needed. A connection already subscribed elsewhere is moved.
    ///
    /// After [`close_all`](Self::close_all) the connection is closed instead
    /// and `false` is returned.
    pub async fn subscribe(&self, conversation_id: ConversationId, connection: Connection) -> bool {
        let id = connection.id;
        let mut guard = self.inner.write().await;

        if guard.closing {
            drop(guard);
            tracing::debug!(connection_id = %id, conversation_id, "registry closed, refusing subscriber");
            connection.close();
            return false;
        }

        if let Some(previous) = guard.index.get(&id).copied() {
            if previous != conversation_id {
                guard.remove(previous, id);
            }
        }

        guard
            .entries
            .entry(conversation_id)
            .or_default()
            .insert(id, connection);
        guard.index.insert(id, conversation_id);

        tracing::debug!(
            connection_id = %id,
            conversation_id,
            subscribers = guard.entries.get(&conversation_id).map(|s| s.len()).unwrap_or(0),
            "subscriber added"
        );
        true
    }

    /// Remove a connection from the entry of `conversation_id`. Idempotent;
    /// returns whether anything was removed.
    pub async fn unsubscribe(&self, conversation_id: ConversationId, id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        let removed = guard.remove(conversation_id, id).is_some();

        if removed {
            tracing::debug!(
                connection_id = %id,
                conversation_id,
                remaining = guard.entries.get(&conversation_id).map(|s| s.len()).unwrap_or(0),
                "subscriber removed"
            );
        }
        removed
    }

    /// Deliver `payload` once to every connection subscribed at call time.
    ///
    /// Sends run concurrently, each bounded by the send timeout. Connections
    /// that fail or time out are unsubscribed; nothing is reported to the
    /// caller beyond the outcome counts.
    pub async fn broadcast(&self, conversation_id: ConversationId, payload: &str) -> BroadcastOutcome {
        let snapshot: Vec<Connection> = {
            let guard = self.inner.read().await;
            match guard.entries.get(&conversation_id) {
                Some(subscribers) => subscribers.values().cloned().collect(),
                None => return BroadcastOutcome::default(),
            }
        };

        let payload: Arc<str> = Arc::from(payload);
        let timeout = self.send_timeout;
        let results = join_all(snapshot.iter().map(|conn| {
            let payload = payload.clone();
            async move {
                match tokio::time::timeout(timeout, conn.sink.deliver(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout),
                }
            }
        }))
        .await;

        let mut outcome = BroadcastOutcome::default();
        for (conn, result) in snapshot.iter().zip(results) {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn.id,
                        conversation_id,
                        error = %e,
                        "dropping subscriber after failed send"
                    );
                    if self.unsubscribe(conversation_id, conn.id).await {
                        outcome.evicted += 1;
                    }
                    conn.close();
                }
            }
        }

        if outcome.evicted > 0 {
            tracing::info!(
                conversation_id,
                delivered = outcome.delivered,
                evicted = outcome.evicted,
                "broadcast evicted dead subscribers"
            );
        }
        outcome
    }

    /// Empty the registry and close every connection. Used on shutdown; the
    /// registry accepts no subscribers afterwards.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Connection> = {
            let mut guard = self.inner.write().await;
            guard.closing = true;
            guard.index.clear();
            guard
                .entries
                .drain()
                .flat_map(|(_, subscribers)| subscribers.into_values())
                .collect()
        };

        for conn in &drained {
            conn.close();
        }
        drained.len()
    }

    pub async fn subscriber_count(&self, conversation_id: ConversationId) -> usize {
        let guard = self.inner.read().await;
        guard
            .entries
            .get(&conversation_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Number of conversations with at least one live subscriber
    pub async fn conversation_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_subscribed(&self, conversation_id: ConversationId, id: ConnectionId) -> bool {
        let guard = self.inner.read().await;
        guard.index.get(&id) == Some(&conversation_id)
    }
}
