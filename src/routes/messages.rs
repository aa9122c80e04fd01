use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;

use crate::{
    error::AppError, middleware::guards::AuthenticatedUser, models::ConversationId,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// POST /conversations/{id}/messages
///
/// Persists the message, pushes `message_created` to live subscribers and
/// returns the stored row.
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    conversation_id: web::Path<ConversationId>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .delivery
        .post_message(
            conversation_id.into_inner(),
            user.principal(),
            body.into_inner().content,
        )
        .await?;

    Ok(HttpResponse::Created().json(message))
}

/// GET /conversations/{id}/messages
#[get("/conversations/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    conversation_id: web::Path<ConversationId>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .delivery
        .list_messages(conversation_id.into_inner(), user.principal())
        .await?;

    Ok(HttpResponse::Ok().json(messages))
}
