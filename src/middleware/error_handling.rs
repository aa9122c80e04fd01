//! Maps [`AppError`] onto the shared JSON error body.

use actix_web::{http::StatusCode, HttpResponse};
use ::error_types::{error_codes, error_types, ErrorResponse};

use crate::error::AppError;

fn classify(err: &AppError) -> (&'static str, &'static str) {
    match err {
        AppError::BadRequest(_) => (error_types::VALIDATION_ERROR, error_codes::VALIDATION_ERROR),
        AppError::Unauthorized => (error_types::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::Forbidden => (
            error_types::AUTHORIZATION_ERROR,
            error_codes::NOT_CONVERSATION_ADMIN,
        ),
        AppError::NotFound => (error_types::NOT_FOUND_ERROR, error_codes::CONVERSATION_NOT_FOUND),
        AppError::Database(_) => (error_types::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            (error_types::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    }
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = classify(err);

    let message = if err.is_client_error() {
        err.to_string()
    } else {
        tracing::error!(error = %err, "request failed");
        "internal server error".to_string()
    };

    let body = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    HttpResponse::build(status).json(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_hide_details() {
        let resp = into_response(&AppError::Database("password=hunter2".into()));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_rt::test]
    async fn test_body_carries_kind_and_code() {
        let resp = into_response(&AppError::Forbidden);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 403);
        assert_eq!(json["error_type"], error_types::AUTHORIZATION_ERROR);
        assert_eq!(json["code"], error_codes::NOT_CONVERSATION_ADMIN);
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            classify(&AppError::NotFound),
            (error_types::NOT_FOUND_ERROR, error_codes::CONVERSATION_NOT_FOUND)
        );
        assert_eq!(
            classify(&AppError::Forbidden).0,
            error_types::AUTHORIZATION_ERROR
        );
        assert_eq!(
            classify(&AppError::BadRequest("empty".into())).1,
            error_codes::VALIDATION_ERROR
        );
    }
}
