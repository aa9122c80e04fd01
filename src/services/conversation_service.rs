//! Conversation bootstrap and participant management.
//!
//! Validation and authorization run before any write: a self-targeted 1:1 or
//! an empty group is rejected up front, non-members get `NotFound`, and only a
//! group admin may add users (`Forbidden` otherwise).

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{
    ConversationId, ConversationSummary, MemberRole, Participant, Principal, UserId, UserSummary,
};

use super::{ConversationStore, MembershipOracle};

const USER_SEARCH_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    members: Arc<dyn MembershipOracle>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>, members: Arc<dyn MembershipOracle>) -> Self {
        Self { store, members }
    }

    /// Find or create the 1:1 conversation between the caller and `other`.
    pub async fn start_direct(
        &self,
        caller: Principal,
        other: UserId,
    ) -> AppResult<ConversationSummary> {
        if caller.user_id == other {
            return Err(AppError::BadRequest(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let other_user = self.store.find_user(other).await?.ok_or(AppError::NotFound)?;
        let conversation = self
            .store
            .find_or_create_direct(caller.user_id, other)
            .await?;

        tracing::info!(
            conversation_id = conversation.id,
            user_id = caller.user_id,
            other_user_id = other,
            "direct conversation ready"
        );

        Ok(ConversationSummary {
            conversation_id: conversation.id,
            is_group: false,
            title: None,
            display_name: other_user.display_name(),
            last_message: None,
            last_message_at: None,
        })
    }

    /// Create a group. The creator is always an admin; everyone else is a
    /// member and duplicate ids collapse.
    pub async fn create_group(
        &self,
        caller: Principal,
        title: &str,
        user_ids: &[UserId],
    ) -> AppResult<ConversationSummary> {
        if user_ids.is_empty() {
            return Err(AppError::BadRequest("Group must have users".into()));
        }

        let participants = group_roster(caller.user_id, user_ids);
        let conversation = self
            .store
            .create_group(caller.user_id, title, &participants)
            .await?;

        tracing::info!(
            conversation_id = conversation.id,
            user_id = caller.user_id,
            participants = participants.len(),
            "group created"
        );

        Ok(ConversationSummary {
            conversation_id: conversation.id,
            is_group: true,
            title: conversation.title.clone(),
            display_name: conversation.title,
            last_message: None,
            last_message_at: None,
        })
    }

    /// Add users to a group the caller administers. Users already present are
    /// skipped. Returns how many were added.
    pub async fn add_users(
        &self,
        caller: Principal,
        conversation_id: ConversationId,
        user_ids: &[UserId],
    ) -> AppResult<usize> {
        let conversation = self
            .store
            .conversation(conversation_id)
            .await?
            .filter(|c| c.is_group)
            .ok_or(AppError::NotFound)?;

        let role = self
            .store
            .member_role(conversation.id, caller.user_id)
            .await?;
        if !role.map(|r| r.is_privileged()).unwrap_or(false) {
            return Err(AppError::Forbidden);
        }

        let requested: BTreeSet<UserId> = user_ids.iter().copied().collect();
        if requested.is_empty() {
            return Ok(0);
        }

        let added = self
            .store
            .add_participants(conversation.id, &requested)
            .await?;
        tracing::info!(
            conversation_id,
            user_id = caller.user_id,
            requested = requested.len(),
            added,
            "users added to group"
        );
        Ok(added)
    }

    pub async fn participants(
        &self,
        caller: Principal,
        conversation_id: ConversationId,
    ) -> AppResult<Vec<Participant>> {
        self.require_member(caller, conversation_id).await?;
        self.store.participants(conversation_id).await
    }

    pub async fn list_for(&self, caller: Principal) -> AppResult<Vec<ConversationSummary>> {
        self.store.list_for_user(caller.user_id).await
    }

    pub async fn search_users(&self, query: Option<&str>) -> AppResult<Vec<UserSummary>> {
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        self.store.search_users(query, USER_SEARCH_LIMIT).await
    }

    async fn require_member(
        &self,
        caller: Principal,
        conversation_id: ConversationId,
    ) -> AppResult<()> {
        if self
            .members
            .is_member(conversation_id, caller.user_id)
            .await?
        {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }
}

/// Participant set of a new group: the requested users plus the creator, the
/// creator as admin.
pub fn group_roster(creator: UserId, user_ids: &[UserId]) -> Vec<(UserId, MemberRole)> {
    let mut ids: BTreeSet<UserId> = user_ids.iter().copied().collect();
    ids.insert(creator);
    ids.into_iter()
        .map(|id| {
            let role = if id == creator {
                MemberRole::Admin
            } else {
                MemberRole::Member
            };
            (id, role)
        })
        .collect()
}
