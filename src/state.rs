use std::sync::Arc;

use crate::{
    config::Config,
    services::{
        ConversationService, ConversationStore, MembershipOracle, MessageDelivery, MessageStore,
        TokenVerifier,
    },
    websocket::{ConnectionRegistry, HandshakeSupervisor},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub tokens: Arc<dyn TokenVerifier>,
    pub supervisor: HandshakeSupervisor,
    pub delivery: MessageDelivery,
    pub conversations: ConversationService,
}

impl AppState {
    /// Wire the realtime core onto its external interfaces. One registry is
    /// shared by admission and delivery.
    pub fn new(
        config: Arc<Config>,
        tokens: Arc<dyn TokenVerifier>,
        members: Arc<dyn MembershipOracle>,
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        let registry = ConnectionRegistry::new(config.broadcast_send_timeout);
        let supervisor = HandshakeSupervisor::new(tokens.clone(), members.clone(), registry.clone());
        let delivery = MessageDelivery::new(members.clone(), messages, registry.clone());
        let conversations = ConversationService::new(conversations, members);

        Self {
            config,
            registry,
            tokens,
            supervisor,
            delivery,
            conversations,
        }
    }
}
