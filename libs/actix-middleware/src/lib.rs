//! actix-web middleware shared by the chat services.

pub mod request_id;

pub use request_id::RequestId;
