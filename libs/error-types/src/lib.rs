//! Shared JSON error body for the chat services.
//!
//! Every HTTP error leaves the service in the same shape so clients can branch
//! on `error_type` / `code` without parsing messages:
//!
//! ```json
//! {"error":"Not Found","message":"not found","status":404,
//!  "error_type":"not_found_error","code":"CONVERSATION_NOT_FOUND",
//!  "timestamp":"2026-01-01T00:00:00+00:00"}
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Reason phrase of the HTTP status
    pub error: String,

    /// Human readable message
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Coarse category, one of [`error_types`]
    pub error_type: String,

    /// Stable machine code, one of [`error_codes`]
    pub code: String,

    /// RFC 3339
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub mod error_codes {
    // Authentication
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";

    // Conversations
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const NOT_CONVERSATION_ADMIN: &str = "NOT_CONVERSATION_ADMIN";

    // Validation
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";

    // System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const SERVER_ERROR: &str = "server_error";
}
