//! Conversations, participants and the user directory.
//!
//! Also answers membership for the handshake and delivery paths.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::collections::BTreeSet;
use tokio_postgres::Row;

use crate::error::AppResult;
use crate::models::conversation::direct_key;
use crate::models::{
    Conversation, ConversationId, ConversationSummary, MemberRole, Participant, UserId,
    UserSummary,
};
use crate::services::{ConversationStore, MembershipOracle};

#[derive(Clone)]
pub struct PgConversationStore {
    pool: Pool,
}

impl PgConversationStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn conversation_from_row(row: &Row) -> Conversation {
    Conversation {
        id: row.get("id"),
        is_group: row.get("is_group"),
        title: row.get("title"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    }
}

fn user_from_row(row: &Row) -> UserSummary {
    UserSummary {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
    }
}

fn role_from_db(role: &str) -> MemberRole {
    MemberRole::from_db(role).unwrap_or_else(|| {
        tracing::warn!(role, "unknown participant role, treating as member");
        MemberRole::Member
    })
}

#[async_trait]
impl MembershipOracle for PgConversationStore {
    async fn is_member(&self, conversation_id: ConversationId, user_id: UserId) -> AppResult<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2)",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn find_user(&self, user_id: UserId) -> AppResult<Option<UserSummary>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT id, name, email FROM users WHERE id = $1", &[&user_id])
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn search_users(&self, query: Option<&str>, limit: i64) -> AppResult<Vec<UserSummary>> {
        let client = self.pool.get().await?;
        let rows = match query {
            Some(q) => {
                let pattern = format!("%{q}%");
                client
                    .query(
                        r#"
                        SELECT id, name, email FROM users
                        WHERE name ILIKE $1 OR email ILIKE $1
                        ORDER BY id
                        LIMIT $2
                        "#,
                        &[&pattern, &limit],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        "SELECT id, name, email FROM users ORDER BY id LIMIT $1",
                        &[&limit],
                    )
                    .await?
            }
        };
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn find_or_create_direct(
        &self,
        initiator: UserId,
        other: UserId,
    ) -> AppResult<Conversation> {
        let key = direct_key(initiator, other);
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // A concurrent creator of the same pair makes this insert wait and then
        // do nothing; the read-back below sees its committed row.
        let inserted = tx
            .query_opt(
                r#"
                INSERT INTO conversations (is_group, created_by, direct_key)
                VALUES (FALSE, $1, $2)
                ON CONFLICT (direct_key) DO NOTHING
                RETURNING id, is_group, title, created_by, created_at
                "#,
                &[&initiator, &key],
            )
            .await?;

        let conversation = match inserted {
            Some(row) => {
                let conversation = conversation_from_row(&row);
                tx.execute(
                    r#"
                    INSERT INTO conversation_participants (conversation_id, user_id, role)
                    VALUES ($1, $2, 'member'), ($1, $3, 'member')
                    ON CONFLICT (conversation_id, user_id) DO NOTHING
                    "#,
                    &[&conversation.id, &initiator, &other],
                )
                .await?;
                tracing::debug!(conversation_id = conversation.id, key = %key, "direct conversation created");
                conversation
            }
            None => {
                let row = tx
                    .query_one(
                        "SELECT id, is_group, title, created_by, created_at FROM conversations WHERE direct_key = $1",
                        &[&key],
                    )
                    .await?;
                conversation_from_row(&row)
            }
        };

        tx.commit().await?;
        Ok(conversation)
    }

    async fn create_group(
        &self,
        creator: UserId,
        title: &str,
        participants: &[(UserId, MemberRole)],
    ) -> AppResult<Conversation> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                r#"
                INSERT INTO conversations (is_group, title, created_by)
                VALUES (TRUE, $1, $2)
                RETURNING id, is_group, title, created_by, created_at
                "#,
                &[&title, &creator],
            )
            .await?;
        let conversation = conversation_from_row(&row);

        for (user_id, role) in participants {
            // Ids with no user row are skipped.
            tx.execute(
                r#"
                INSERT INTO conversation_participants (conversation_id, user_id, role)
                SELECT $1::BIGINT, u.id, $3::TEXT FROM users u WHERE u.id = $2
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#,
                &[&conversation.id, user_id, &role.to_db()],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(conversation)
    }

    async fn conversation(
        &self,
        conversation_id: ConversationId,
    ) -> AppResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, is_group, title, created_by, created_at FROM conversations WHERE id = $1",
                &[&conversation_id],
            )
            .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn member_role(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> AppResult<Option<MemberRole>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT role FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.map(|r| role_from_db(r.get::<_, &str>("role"))))
    }

    async fn add_participants(
        &self,
        conversation_id: ConversationId,
        user_ids: &BTreeSet<UserId>,
    ) -> AppResult<usize> {
        let ids: Vec<UserId> = user_ids.iter().copied().collect();
        let client = self.pool.get().await?;
        let added = client
            .execute(
                r#"
                INSERT INTO conversation_participants (conversation_id, user_id, role)
                SELECT $1::BIGINT, u.id, 'member' FROM users u WHERE u.id = ANY($2::BIGINT[])
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#,
                &[&conversation_id, &ids],
            )
            .await?;
        Ok(added as usize)
    }

    async fn participants(&self, conversation_id: ConversationId) -> AppResult<Vec<Participant>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT u.id, u.name, u.email, p.role
                FROM conversation_participants p
                JOIN users u ON u.id = p.user_id
                WHERE p.conversation_id = $1
                ORDER BY p.id
                "#,
                &[&conversation_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Participant {
                id: row.get("id"),
                name: row.get("name"),
                email: row.get("email"),
                role: role_from_db(row.get::<_, &str>("role")),
            })
            .collect())
    }

    async fn list_for_user(&self, user_id: UserId) -> AppResult<Vec<ConversationSummary>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT c.id, c.is_group, c.title,
                       peer.name AS peer_name, peer.email AS peer_email,
                       last.content AS last_message, last.created_at AS last_message_at
                FROM conversation_participants me
                JOIN conversations c ON c.id = me.conversation_id
                LEFT JOIN LATERAL (
                    SELECT u.name, u.email
                    FROM conversation_participants op
                    JOIN users u ON u.id = op.user_id
                    WHERE op.conversation_id = c.id AND op.user_id <> me.user_id
                    ORDER BY op.id
                    LIMIT 1
                ) peer ON NOT c.is_group
                LEFT JOIN LATERAL (
                    SELECT m.content, m.created_at
                    FROM messages m
                    WHERE m.conversation_id = c.id
                    ORDER BY m.created_at DESC, m.id DESC
                    LIMIT 1
                ) last ON TRUE
                WHERE me.user_id = $1
                ORDER BY c.id
                "#,
                &[&user_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: ConversationId = row.get("id");
                let is_group: bool = row.get("is_group");
                let title: Option<String> = row.get("title");
                let display_name = if is_group {
                    Some(ConversationSummary::group_display_name(id, title.as_deref()))
                } else {
                    row.get::<_, Option<String>>("peer_name")
                        .filter(|name| !name.is_empty())
                        .or_else(|| row.get("peer_email"))
                };

                ConversationSummary {
                    conversation_id: id,
                    is_group,
                    title,
                    display_name,
                    last_message: row.get("last_message"),
                    last_message_at: row.get("last_message_at"),
                }
            })
            .collect())
    }
}
