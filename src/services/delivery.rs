//! Persist-then-broadcast pipeline for new messages.
//!
//! A message reaches subscribers only after it is durable, and never when
//! persistence fails. Posts to one conversation are serialized from append
//! through broadcast so every subscriber sees them in persisted order; posts
//! to different conversations do not contend.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::models::{ConversationId, Message, NewMessage, Principal};
use crate::websocket::{ConnectionRegistry, WsOutboundEvent};

use super::{MembershipOracle, MessageStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("conversation {0} not found")]
    NotAMember(ConversationId),

    #[error("message store failure: {0}")]
    Store(String),
}

impl From<AppError> for DeliveryError {
    fn from(err: AppError) -> Self {
        DeliveryError::Store(err.to_string())
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            // Non-members cannot tell a foreign conversation from a missing one.
            DeliveryError::NotAMember(_) => AppError::NotFound,
            DeliveryError::Store(msg) => AppError::Database(msg),
        }
    }
}

#[derive(Clone)]
pub struct MessageDelivery {
    members: Arc<dyn MembershipOracle>,
    messages: Arc<dyn MessageStore>,
    registry: ConnectionRegistry,
    locks: Arc<DashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl MessageDelivery {
    pub fn new(
        members: Arc<dyn MembershipOracle>,
        messages: Arc<dyn MessageStore>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            members,
            messages,
            registry,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Persist a message from `sender` and fan it out to live subscribers.
    ///
    /// Returns the persisted message once the broadcast finished. Broadcast
    /// failures only evict the affected connections and never surface here.
    /// The persist and broadcast steps run on their own task, so a caller that
    /// goes away midway cannot leave a durable message undelivered.
    pub async fn post_message(
        &self,
        conversation_id: ConversationId,
        sender: Principal,
        content: String,
    ) -> Result<Message, DeliveryError> {
        self.require_member(conversation_id, sender).await?;

        let pipeline = self.clone();
        let task = tokio::spawn(async move {
            let lease = pipeline.lease(conversation_id);
            let _guard = lease.lock.lock().await;
            pipeline
                .persist_and_broadcast(conversation_id, sender, content)
                .await
        });

        task.await.map_err(|e| {
            tracing::error!(conversation_id, error = %e, "delivery task failed");
            DeliveryError::Store(format!("delivery task failed: {e}"))
        })?
    }

    /// Messages of a conversation the caller participates in, oldest first.
    pub async fn list_messages(
        &self,
        conversation_id: ConversationId,
        caller: Principal,
    ) -> Result<Vec<Message>, DeliveryError> {
        self.require_member(conversation_id, caller).await?;
        Ok(self.messages.list(conversation_id).await?)
    }

    async fn persist_and_broadcast(
        &self,
        conversation_id: ConversationId,
        sender: Principal,
        content: String,
    ) -> Result<Message, DeliveryError> {
        let message = self
            .messages
            .append(NewMessage::sent(conversation_id, sender.user_id, content))
            .await
            .map_err(|e| {
                tracing::error!(conversation_id, user_id = sender.user_id, error = %e, "failed to persist message");
                DeliveryError::from(e)
            })?;

        match WsOutboundEvent::message_created(message.clone()).to_json() {
            Ok(payload) => {
                let outcome = self.registry.broadcast(conversation_id, &payload).await;
                tracing::debug!(
                    conversation_id,
                    message_id = message.id,
                    delivered = outcome.delivered,
                    evicted = outcome.evicted,
                    "message broadcast"
                );
            }
            Err(e) => {
                tracing::error!(message_id = message.id, error = %e, "failed to encode message event");
            }
        }

        Ok(message)
    }

    async fn require_member(
        &self,
        conversation_id: ConversationId,
        principal: Principal,
    ) -> Result<(), DeliveryError> {
        if self
            .members
            .is_member(conversation_id, principal.user_id)
            .await?
        {
            Ok(())
        } else {
            Err(DeliveryError::NotAMember(conversation_id))
        }
    }

    fn lease(&self, conversation_id: ConversationId) -> LockLease {
        let lock = self
            .locks
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        LockLease {
            locks: self.locks.clone(),
            conversation_id,
            lock,
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.len()
    }
}

/// Holds one conversation's ordering lock and drops the map entry once no
/// other post holds or waits on it.
struct LockLease {
    locks: Arc<DashMap<ConversationId, Arc<Mutex<()>>>>,
    conversation_id: ConversationId,
    lock: Arc<Mutex<()>>,
}

impl Drop for LockLease {
    fn drop(&mut self) {
        // Our clone plus the map's own.
        self.locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
