//! Request extractors for authenticated routes

use actix_web::{dev::Payload, http::header, web, Error, FromRequest, HttpRequest};
use std::future::{ready, Ready};

use crate::error::AppError;
use crate::models::Principal;
use crate::state::AppState;

/// Caller identity taken from `Authorization: Bearer <token>`
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Principal);

impl AuthenticatedUser {
    pub fn principal(&self) -> Principal {
        self.0
    }
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>();
        let result: Result<Principal, Error> = match (state, bearer_token(req)) {
            (Some(state), Some(token)) => state.tokens.verify(token).map_err(|e| {
                tracing::debug!(path = %req.path(), error = %e, "bearer token rejected");
                AppError::Unauthorized.into()
            }),
            (None, _) => {
                tracing::error!("application state not registered");
                Err(AppError::Internal.into())
            }
            (_, None) => Err(AppError::Unauthorized.into()),
        };
        ready(result.map(AuthenticatedUser))
    }
}
