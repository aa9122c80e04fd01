//! Conversation bootstrap endpoints

use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    middleware::guards::AuthenticatedUser,
    models::{ConversationId, UserId},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    pub other_user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub title: String,
    #[serde(default)]
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// POST /conversations/start
/// Find or create the 1:1 conversation with another user
#[post("/conversations/start")]
pub async fn start_conversation(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<StartConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let summary = state
        .conversations
        .start_direct(user.principal(), body.other_user_id)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// POST /conversations/group
#[post("/conversations/group")]
pub async fn create_group(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let summary = state
        .conversations
        .create_group(user.principal(), &body.title, &body.user_ids)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// GET /conversations
#[get("/conversations")]
pub async fn get_conversations(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let conversations = state.conversations.list_for(user.principal()).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// POST /conversations/{id}/add-users
///
/// Body is a bare JSON array of user ids. Admin only.
#[post("/conversations/{id}/add-users")]
pub async fn add_users(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    conversation_id: web::Path<ConversationId>,
    body: web::Json<Vec<UserId>>,
) -> Result<HttpResponse, AppError> {
    state
        .conversations
        .add_users(user.principal(), conversation_id.into_inner(), &body)
        .await?;
    Ok(HttpResponse::Ok().json(StatusResponse { status: "ok" }))
}

/// GET /conversations/{id}/participants
#[get("/conversations/{id}/participants")]
pub async fn get_participants(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    conversation_id: web::Path<ConversationId>,
) -> Result<HttpResponse, AppError> {
    let participants = state
        .conversations
        .participants(user.principal(), conversation_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(participants))
}
