//! Connection admission.
//!
//! Each gate is final: a missing credential, a rejected token or a
//! non-participant ends the attempt before anything is opened or registered.

use actix_web_actors::ws::CloseCode;
use std::sync::Arc;
use thiserror::Error;

use crate::error::AppError;
use crate::models::{ConversationId, Principal};
use crate::services::{MembershipOracle, TokenError, TokenVerifier};

use super::{Connection, ConnectionId, ConnectionRegistry, ConnectionSink};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("missing credential")]
    MissingCredential,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("not a participant of this conversation")]
    NotAMember,

    #[error("membership lookup failed: {0}")]
    MembershipLookup(String),

    #[error("failed to open connection: {0}")]
    Transport(String),
}

impl AdmissionError {
    /// Authentication/authorization rejections, as opposed to server faults
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            AdmissionError::MissingCredential
                | AdmissionError::InvalidToken
                | AdmissionError::NotAMember
        )
    }

    /// Close code sent to the client when the attempt is rejected
    pub fn close_code(&self) -> CloseCode {
        if self.is_policy_violation() {
            CloseCode::Policy
        } else {
            CloseCode::Error
        }
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::MissingCredential | AdmissionError::InvalidToken => {
                AppError::Unauthorized
            }
            AdmissionError::NotAMember => AppError::NotFound,
            AdmissionError::MembershipLookup(msg) => AppError::Database(msg),
            AdmissionError::Transport(_) => AppError::Internal,
        }
    }
}

impl From<TokenError> for AdmissionError {
    fn from(_: TokenError) -> Self {
        AdmissionError::InvalidToken
    }
}

#[derive(Clone)]
pub struct HandshakeSupervisor {
    tokens: Arc<dyn TokenVerifier>,
    members: Arc<dyn MembershipOracle>,
    registry: ConnectionRegistry,
}

impl HandshakeSupervisor {
    pub fn new(
        tokens: Arc<dyn TokenVerifier>,
        members: Arc<dyn MembershipOracle>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            tokens,
            members,
            registry,
        }
    }

    /// Run the credential and membership gates.
    pub async fn authorize(
        &self,
        conversation_id: ConversationId,
        credential: Option<&str>,
    ) -> Result<Principal, AdmissionError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AdmissionError::MissingCredential)?;

        let principal = self.tokens.verify(token).map_err(|e| {
            tracing::debug!(conversation_id, error = %e, "token rejected");
            AdmissionError::from(e)
        })?;

        let is_member = self
            .members
            .is_member(conversation_id, principal.user_id)
            .await
            .map_err(|e| AdmissionError::MembershipLookup(e.to_string()))?;

        if !is_member {
            return Err(AdmissionError::NotAMember);
        }
        Ok(principal)
    }

    /// Authorize, open the channel through `open` and register it under
    /// `conversation_id`.
    ///
    /// `open` runs only after every gate passed; it receives the identity the
    /// connection is bound to.
    pub async fn admit<F>(
        &self,
        conversation_id: ConversationId,
        credential: Option<&str>,
        open: F,
    ) -> Result<Connection, AdmissionError>
    where
        F: FnOnce(ConnectionId, Principal) -> Result<Arc<dyn ConnectionSink>, AdmissionError>,
    {
        let principal = match self.authorize(conversation_id, credential).await {
            Ok(principal) => principal,
            Err(e) => {
                tracing::warn!(conversation_id, reason = %e, "websocket admission rejected");
                return Err(e);
            }
        };

        let id = ConnectionId::new();
        let sink = open(id, principal)?;
        let connection = Connection::new(id, conversation_id, principal, sink);

        if !self
            .registry
            .subscribe(conversation_id, connection.clone())
            .await
        {
            tracing::info!(connection_id = %id, conversation_id, "websocket closed during shutdown");
            return Ok(connection);
        }

        // The peer may have gone away while we were registering; its session
        // release could have run before the subscribe above.
        if !connection.is_open() {
            self.registry.unsubscribe(conversation_id, id).await;
        }

        tracing::info!(
            connection_id = %id,
            conversation_id,
            user_id = principal.user_id,
            "websocket admitted"
        );
        Ok(connection)
    }

    /// Terminal step of a connection's life. Safe to call more than once.
    pub async fn release(&self, conversation_id: ConversationId, id: ConnectionId) {
        if self.registry.unsubscribe(conversation_id, id).await {
            tracing::info!(connection_id = %id, conversation_id, "websocket released");
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}
