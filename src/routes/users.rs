use actix_web::{get, web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError, middleware::guards::AuthenticatedUser, models::UserId, state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: UserId,
}

/// GET /users?search=
#[get("/users")]
pub async fn search_users(
    state: web::Data<AppState>,
    _user: AuthenticatedUser,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, AppError> {
    let users = state
        .conversations
        .search_users(query.search.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(users))
}

/// GET /me
#[get("/me")]
pub async fn me(user: AuthenticatedUser) -> HttpResponse {
    HttpResponse::Ok().json(MeResponse {
        user_id: user.principal().user_id,
    })
}
