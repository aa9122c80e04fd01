use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    #[serde(rename = "message_created")]
    MessageCreated { message: Message },
}

impl WsOutboundEvent {
    pub fn message_created(message: Message) -> Self {
        Self::MessageCreated { message }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
