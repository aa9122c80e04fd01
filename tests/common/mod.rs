//! In-memory stand-ins for the external interfaces, token minting and a
//! throwaway server for socket tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::{dev::ServerHandle, web, App, HttpServer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};

use chat_delivery_service::config::Config;
use chat_delivery_service::error::{AppError, AppResult};
use chat_delivery_service::middleware::{Claims, JwtVerifier};
use chat_delivery_service::models::conversation::direct_key;
use chat_delivery_service::models::message::sort_chronologically;
use chat_delivery_service::models::{
    Conversation, ConversationId, ConversationSummary, MemberRole, Message, NewMessage,
    Participant, UserId, UserSummary,
};
use chat_delivery_service::routes;
use chat_delivery_service::services::{ConversationStore, MembershipOracle, MessageStore};
use chat_delivery_service::state::AppState;
use chat_delivery_service::websocket::{ConnectionSink, SinkError};

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, UserSummary>,
    conversations: BTreeMap<ConversationId, Conversation>,
    direct: HashMap<String, ConversationId>,
    // (conversation_id, user_id) -> role, in insertion order
    participants: Vec<(ConversationId, UserId, MemberRole)>,
    messages: Vec<Message>,
    last_created_at: Option<DateTime<Utc>>,
}

impl Tables {
    fn is_member(&self, conversation_id: ConversationId, user_id: UserId) -> bool {
        self.participants
            .iter()
            .any(|(c, u, _)| *c == conversation_id && *u == user_id)
    }

    fn add_participant(
        &mut self,
        conversation_id: ConversationId,
        user_id: UserId,
        role: MemberRole,
    ) -> bool {
        if !self.users.contains_key(&user_id) || self.is_member(conversation_id, user_id) {
            return false;
        }
        self.participants.push((conversation_id, user_id, role));
        true
    }

    fn new_conversation(&mut self, is_group: bool, title: Option<String>, created_by: UserId) -> Conversation {
        let conversation = Conversation {
            id: self.conversations.len() as ConversationId + 1,
            is_group,
            title,
            created_by,
            created_at: Utc::now(),
        };
        self.conversations.insert(conversation.id, conversation.clone());
        conversation
    }
}

/// One process-local database behind every store interface.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    pub fn with_users(users: &[(UserId, &str)]) -> Arc<Self> {
        let store = Self::default();
        {
            let mut tables = store.tables.lock().unwrap();
            for (id, name) in users {
                tables.users.insert(
                    *id,
                    UserSummary {
                        id: *id,
                        name: Some(name.to_string()),
                        email: Some(format!("{}@example.com", name.to_lowercase())),
                    },
                );
            }
        }
        Arc::new(store)
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn conversation_count(&self) -> usize {
        self.tables.lock().unwrap().conversations.len()
    }

    pub fn message_count(&self) -> usize {
        self.tables.lock().unwrap().messages.len()
    }
}

#[async_trait]
impl MembershipOracle for MemoryStore {
    async fn is_member(&self, conversation_id: ConversationId, user_id: UserId) -> AppResult<bool> {
        Ok(self.tables.lock().unwrap().is_member(conversation_id, user_id))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, new: NewMessage) -> AppResult<Message> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(AppError::Database("simulated write failure".into()));
        }

        let mut tables = self.tables.lock().unwrap();
        let now = Utc::now();
        let created_at = match tables.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        tables.last_created_at = Some(created_at);

        let message = Message {
            id: tables.messages.len() as i64 + 1,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            sender_name: tables.users.get(&new.sender_id).and_then(|u| u.name.clone()),
            content: new.content,
            created_at,
            status: new.status,
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn list(&self, conversation_id: ConversationId) -> AppResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .tables
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        sort_chronologically(&mut messages);
        Ok(messages)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find_user(&self, user_id: UserId) -> AppResult<Option<UserSummary>> {
        Ok(self.tables.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn search_users(&self, query: Option<&str>, limit: i64) -> AppResult<Vec<UserSummary>> {
        let needle = query.map(str::to_lowercase);
        let matches = |field: &Option<String>, needle: &str| {
            field
                .as_deref()
                .map(|v| v.to_lowercase().contains(needle))
                .unwrap_or(false)
        };

        Ok(self
            .tables
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| match &needle {
                Some(n) => matches(&u.name, n) || matches(&u.email, n),
                None => true,
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_or_create_direct(
        &self,
        initiator: UserId,
        other: UserId,
    ) -> AppResult<Conversation> {
        let key = direct_key(initiator, other);
        let mut tables = self.tables.lock().unwrap();

        if let Some(id) = tables.direct.get(&key).copied() {
            return tables.conversations.get(&id).cloned().ok_or(AppError::Internal);
        }

        let conversation = tables.new_conversation(false, None, initiator);
        tables.direct.insert(key, conversation.id);
        tables.add_participant(conversation.id, initiator, MemberRole::Member);
        tables.add_participant(conversation.id, other, MemberRole::Member);
        Ok(conversation)
    }

    async fn create_group(
        &self,
        creator: UserId,
        title: &str,
        participants: &[(UserId, MemberRole)],
    ) -> AppResult<Conversation> {
        let mut tables = self.tables.lock().unwrap();
        let conversation = tables.new_conversation(true, Some(title.to_string()), creator);
        for (user_id, role) in participants {
            tables.add_participant(conversation.id, *user_id, *role);
        }
        Ok(conversation)
    }

    async fn conversation(
        &self,
        conversation_id: ConversationId,
    ) -> AppResult<Option<Conversation>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .conversations
            .get(&conversation_id)
            .cloned())
    }

    async fn member_role(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> AppResult<Option<MemberRole>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .participants
            .iter()
            .find(|(c, u, _)| *c == conversation_id && *u == user_id)
            .map(|(_, _, role)| *role))
    }

    async fn add_participants(
        &self,
        conversation_id: ConversationId,
        user_ids: &BTreeSet<UserId>,
    ) -> AppResult<usize> {
        let mut tables = self.tables.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter(|id| tables.add_participant(conversation_id, **id, MemberRole::Member))
            .count())
    }

    async fn participants(&self, conversation_id: ConversationId) -> AppResult<Vec<Participant>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .participants
            .iter()
            .filter(|(c, _, _)| *c == conversation_id)
            .filter_map(|(_, user_id, role)| {
                tables.users.get(user_id).map(|u| Participant {
                    id: u.id,
                    name: u.name.clone(),
                    email: u.email.clone(),
                    role: *role,
                })
            })
            .collect())
    }

    async fn list_for_user(&self, user_id: UserId) -> AppResult<Vec<ConversationSummary>> {
        let tables = self.tables.lock().unwrap();
        let mut result = Vec::new();

        for conversation in tables.conversations.values() {
            if !tables.is_member(conversation.id, user_id) {
                continue;
            }

            let display_name = if conversation.is_group {
                Some(ConversationSummary::group_display_name(
                    conversation.id,
                    conversation.title.as_deref(),
                ))
            } else {
                tables
                    .participants
                    .iter()
                    .find(|(c, u, _)| *c == conversation.id && *u != user_id)
                    .and_then(|(_, peer, _)| tables.users.get(peer))
                    .and_then(|u| u.display_name())
            };

            let last = tables
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation.id)
                .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

            result.push(ConversationSummary {
                conversation_id: conversation.id,
                is_group: conversation.is_group,
                title: conversation.title.clone(),
                display_name,
                last_message: last.map(|m| m.content.clone()),
                last_message_at: last.map(|m| m.created_at),
            });
        }
        Ok(result)
    }
}

/// Records every frame; never fails.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    /// Message ids of the received `message_created` events, in arrival order
    pub fn message_ids(&self) -> Vec<i64> {
        self.frames()
            .iter()
            .map(|f| {
                let event: serde_json::Value = serde_json::from_str(f).unwrap();
                event["message"]["id"].as_i64().unwrap()
            })
            .collect()
    }
}

#[async_trait]
impl ConnectionSink for RecordingSink {
    async fn deliver(&self, payload: Arc<str>) -> Result<(), SinkError> {
        self.frames.lock().unwrap().push(payload.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// A peer that went away without closing.
#[derive(Default)]
pub struct BrokenSink {
    pub closed: AtomicBool,
}

#[async_trait]
impl ConnectionSink for BrokenSink {
    async fn deliver(&self, _payload: Arc<str>) -> Result<(), SinkError> {
        Err(SinkError::Closed("broken pipe".into()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

pub fn token_for(user_id: UserId) -> String {
    let exp = (Utc::now().timestamp() + 3600) as usize;
    encode(
        &Header::default(),
        &Claims { user_id, exp },
        &EncodingKey::from_secret(Config::test_defaults().jwt_secret.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(user_id: UserId) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token_for(user_id)))
}

pub fn test_state(store: Arc<MemoryStore>) -> AppState {
    let config = Arc::new(Config::test_defaults());
    let tokens = Arc::new(JwtVerifier::new(&config.jwt_secret));
    AppState::new(config, tokens, store.clone(), store.clone(), store)
}

pub async fn start_server(state: AppState) -> std::io::Result<(SocketAddr, ServerHandle)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(actix_middleware::RequestId::new())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure_routes)
    })
    .workers(1)
    .disable_signals()
    .listen(listener)?
    .run();

    let handle = server.handle();
    actix_rt::spawn(server);
    Ok((addr, handle))
}
